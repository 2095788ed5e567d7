//! Package installation collaborators.
//!
//! The apply pipeline only sees [`PackageInstaller`]. Two implementations:
//! [`SandboxPackageInstaller`] runs npm inside the active sandbox, and
//! [`HttpPackageInstaller`] delegates to a sibling `/install-packages`
//! endpoint.

use crate::sandbox::{join_path, SandboxLifecycleManager};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one install request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallReport {
    pub installed: Vec<String>,
    pub already_installed: Vec<String>,
    pub failed: Vec<String>,
}

#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install `packages`. Per-package failures belong in the report; `Err`
    /// means the request as a whole could not be carried out.
    async fn install(&self, packages: &[String]) -> anyhow::Result<InstallReport>;

    fn name(&self) -> &str;
}

/// Registry package names, with an optional `@version` suffix. Local paths
/// (`../x`), git shorthands (`user/repo`) and anything with shell
/// metacharacters are refused before they reach a shell.
pub fn is_valid_package_spec(spec: &str) -> bool {
    let charset_ok = !spec.is_empty()
        && spec.len() <= 214
        && spec
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '/' | '.' | '_' | '-' | '~' | '^'));
    if !charset_ok {
        return false;
    }

    let name = bare_name(spec);
    let version = &spec[name.len()..];
    if version.contains('/') || version == "@" {
        return false;
    }

    let valid_segment = |s: &str| !s.is_empty() && !s.starts_with(['.', '-', '_']);
    match name.strip_prefix('@') {
        Some(scoped) => matches!(
            scoped.split_once('/'),
            Some((scope, pkg)) if valid_segment(scope) && valid_segment(pkg) && !pkg.contains('/')
        ),
        None => valid_segment(name) && !name.contains('/'),
    }
}

/// Package name without a trailing `@version`.
fn bare_name(spec: &str) -> &str {
    let search_from = usize::from(spec.starts_with('@'));
    match spec[search_from..].find('@') {
        Some(at) => &spec[..search_from + at],
        None => spec,
    }
}

/// Dependency names declared in a `package.json` document.
pub fn declared_dependencies(manifest: &str) -> anyhow::Result<HashSet<String>> {
    let doc: serde_json::Value = serde_json::from_str(manifest)
        .map_err(|e| anyhow::anyhow!("Failed to parse package.json: {e}"))?;

    let mut names = HashSet::new();
    for section in ["dependencies", "devDependencies"] {
        if let Some(map) = doc[section].as_object() {
            names.extend(map.keys().cloned());
        }
    }
    Ok(names)
}

/// Installs into the project directory of the active sandbox.
pub struct SandboxPackageInstaller {
    manager: Arc<SandboxLifecycleManager>,
    timeout_ms: u64,
}

impl SandboxPackageInstaller {
    pub fn new(manager: Arc<SandboxLifecycleManager>, timeout_ms: u64) -> Self {
        Self { manager, timeout_ms }
    }
}

#[async_trait]
impl PackageInstaller for SandboxPackageInstaller {
    async fn install(&self, packages: &[String]) -> anyhow::Result<InstallReport> {
        let env = self
            .manager
            .active_handle()
            .await
            .ok_or_else(|| anyhow::anyhow!("No active sandbox to install packages into"))?;
        let project_dir = self.manager.project_dir();

        let declared = match env.read_file(&join_path(project_dir, "package.json")).await {
            Ok(manifest) => declared_dependencies(&manifest).unwrap_or_else(|e| {
                tracing::warn!("{e}");
                HashSet::new()
            }),
            Err(e) => {
                tracing::debug!("No package.json in {project_dir}: {e}");
                HashSet::new()
            }
        };

        let mut report = InstallReport::default();
        let mut to_install = Vec::new();
        for spec in packages {
            if !is_valid_package_spec(spec) {
                tracing::warn!("Refusing to install invalid package name {spec:?}");
                report.failed.push(spec.clone());
            } else if declared.contains(bare_name(spec)) {
                report.already_installed.push(spec.clone());
            } else {
                to_install.push(spec.clone());
            }
        }

        if to_install.is_empty() {
            return Ok(report);
        }

        let command = format!("npm install --legacy-peer-deps {}", to_install.join(" "));
        tracing::info!("Installing {} packages in sandbox {}", to_install.len(), env.id());

        let output = env.run_command(&command, project_dir, self.timeout_ms).await?;
        if output.success() {
            report.installed.extend(to_install);
        } else {
            tracing::warn!(
                "npm install exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            );
            report.failed.extend(to_install);
        }

        Ok(report)
    }

    fn name(&self) -> &str {
        "sandbox"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstallEndpointResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    report: InstallReport,
}

/// Delegates to a sibling `/install-packages` endpoint.
pub struct HttpPackageInstaller {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpPackageInstaller {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build reqwest client: {e}"))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            http,
        })
    }
}

#[async_trait]
impl PackageInstaller for HttpPackageInstaller {
    async fn install(&self, packages: &[String]) -> anyhow::Result<InstallReport> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&serde_json::json!({ "packages": packages }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Package install request failed: {e}"))?;

        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable>".to_string());
        anyhow::ensure!(
            status.is_success(),
            "Package installer returned {status}: {body_text}"
        );

        let parsed: InstallEndpointResponse = serde_json::from_str(&body_text).map_err(|e| {
            anyhow::anyhow!("Failed to parse installer response: {e}\nBody: {body_text}")
        })?;

        if !parsed.success {
            anyhow::bail!(
                "Package installer reported failure: {}",
                parsed.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(parsed.report)
    }

    fn name(&self) -> &str {
        "http"
    }
}
