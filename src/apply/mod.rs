//! Code apply pipeline: turns a [`ParsedResponse`] into changes in the
//! active sandbox.
//!
//! Steps, in order:
//!
//! 1. no active sandbox: return a preview, no remote calls
//! 2. merge explicit and parsed packages (or scan imports) and install them
//! 3. make sure the file cache belongs to the active sandbox
//! 4. write every file concurrently, classifying created vs updated
//! 5. record successful writes in the cache
//! 6. run parsed commands
//!
//! Per-item failures are collected in [`ApplyResult::errors`]; nothing here
//! aborts a batch or rolls back earlier steps.

pub mod imports;
pub mod installer;

use crate::parser::{ParseWarning, ParsedResponse};
use crate::sandbox::{join_path, SandboxLifecycleManager};
use crate::state::{FileCache, FileCacheSnapshot};
use futures_util::future::join_all;
use installer::PackageInstaller;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

const COMMAND_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub files_created: Vec<String>,
    pub files_updated: Vec<String>,
    pub packages_installed: Vec<String>,
    pub packages_already_installed: Vec<String>,
    pub packages_failed: Vec<String>,
    pub commands_executed: Vec<String>,
    pub errors: Vec<String>,
}

impl ApplyResult {
    /// Every path written, created first.
    pub fn touched_files(&self) -> Vec<String> {
        self.files_created
            .iter()
            .chain(&self.files_updated)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub results: ApplyResult,
    pub explanation: String,
    pub structure: Option<String>,
    pub warnings: Vec<ParseWarning>,
    /// Nothing was sent to a sandbox.
    pub preview: bool,
}

/// Project-relative, slash-separated form of a path from AI output.
/// Rejects empty paths and any `..` segment.
pub fn normalize_path(raw: &str) -> Result<String, String> {
    let mut path = raw.trim().replace('\\', "/");
    loop {
        if let Some(rest) = path.strip_prefix("./") {
            path = rest.to_string();
        } else if let Some(rest) = path.strip_prefix('/') {
            path = rest.to_string();
        } else {
            break;
        }
    }

    if path.is_empty() {
        return Err(format!("invalid file path {raw:?}"));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(format!("path {raw:?} escapes the project directory"));
    }
    Ok(path)
}

/// `first` then `second`, deduplicated, first occurrence wins.
pub fn merge_packages(first: &[String], second: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    first
        .iter()
        .chain(second)
        .map(|p| p.trim())
        .filter(|p| !p.is_empty() && seen.insert(p.to_string()))
        .map(str::to_string)
        .collect()
}

pub struct CodeApplyPipeline {
    manager: Arc<SandboxLifecycleManager>,
    installer: Arc<dyn PackageInstaller>,
    cache: Arc<FileCache>,
}

impl CodeApplyPipeline {
    pub fn new(
        manager: Arc<SandboxLifecycleManager>,
        installer: Arc<dyn PackageInstaller>,
        cache: Arc<FileCache>,
    ) -> Self {
        Self {
            manager,
            installer,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<FileCache> {
        &self.cache
    }

    pub fn installer(&self) -> &Arc<dyn PackageInstaller> {
        &self.installer
    }

    /// Apply `parsed` to the active sandbox.
    pub async fn apply(
        &self,
        parsed: &ParsedResponse,
        explicit_packages: &[String],
        is_edit: bool,
    ) -> ApplyReport {
        let Some(env) = self.manager.active_handle().await else {
            tracing::info!(
                "No active sandbox, previewing {} files",
                parsed.files.len()
            );
            return ApplyReport {
                results: ApplyResult {
                    files_created: parsed.file_paths(),
                    ..ApplyResult::default()
                },
                explanation: parsed.explanation.clone(),
                structure: parsed.structure.clone(),
                warnings: parsed.warnings.clone(),
                preview: true,
            };
        };

        let project_dir = self.manager.project_dir().to_string();
        let mut result = ApplyResult::default();
        tracing::info!(
            "Applying {} files to sandbox {} (edit: {is_edit})",
            parsed.files.len(),
            env.id()
        );

        let mut packages = merge_packages(explicit_packages, &parsed.packages);
        if packages.is_empty() {
            packages = imports::detect_packages(&parsed.files);
            if !packages.is_empty() {
                tracing::debug!("Detected packages from imports: {}", packages.join(", "));
            }
        }
        if !packages.is_empty() {
            self.install_packages(&packages, &mut result).await;
        }

        if let Err(e) = self.cache.ensure_fresh(env.as_ref(), &project_dir).await {
            tracing::warn!("File cache rebuild failed, treating all files as new: {e}");
        }

        let writes = parsed.files.iter().map(|file| {
            let env = env.clone();
            let project_dir = project_dir.as_str();
            async move {
                let rel = normalize_path(&file.path)?;
                env.write_file(&join_path(project_dir, &rel), &file.content)
                    .await
                    .map_err(|e| format!("Failed to write {rel}: {e}"))?;
                Ok::<_, String>(rel)
            }
        });
        let outcomes = join_all(writes).await;

        let mut written = Vec::new();
        for (file, outcome) in parsed.files.iter().zip(outcomes) {
            match outcome {
                Ok(rel) => {
                    if self.cache.contains(&rel) {
                        result.files_updated.push(rel.clone());
                    } else {
                        result.files_created.push(rel.clone());
                    }
                    written.push((rel, file.content.clone()));
                }
                Err(message) => {
                    tracing::warn!("{message}");
                    result.errors.push(message);
                }
            }
        }
        self.cache.record_writes(env.id(), written);

        for command in &parsed.commands {
            match env.run_command(command, &project_dir, COMMAND_TIMEOUT_MS).await {
                Ok(output) if output.success() => result.commands_executed.push(command.clone()),
                Ok(output) => result.errors.push(format!(
                    "Command `{command}` exited with {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                )),
                Err(e) => result.errors.push(format!("Command `{command}` failed: {e}")),
            }
        }

        tracing::info!(
            "Applied to sandbox {}: {} created, {} updated, {} errors",
            env.id(),
            result.files_created.len(),
            result.files_updated.len(),
            result.errors.len()
        );

        ApplyReport {
            results: result,
            explanation: parsed.explanation.clone(),
            structure: parsed.structure.clone(),
            warnings: parsed.warnings.clone(),
            preview: false,
        }
    }

    /// Cache contents for the active sandbox, rebuilt first if stale.
    /// `None` when no sandbox is active.
    pub async fn sync_files(&self) -> Option<FileCacheSnapshot> {
        let env = self.manager.active_handle().await?;
        if let Err(e) = self
            .cache
            .ensure_fresh(env.as_ref(), self.manager.project_dir())
            .await
        {
            tracing::warn!("File cache rebuild failed: {e}");
        }
        Some(self.cache.snapshot())
    }

    async fn install_packages(&self, packages: &[String], result: &mut ApplyResult) {
        tracing::info!(
            "Installing packages via {} installer: {}",
            self.installer.name(),
            packages.join(", ")
        );

        match self.installer.install(packages).await {
            Ok(report) => {
                if !report.failed.is_empty() {
                    tracing::warn!("Packages failed to install: {}", report.failed.join(", "));
                }
                result.packages_installed = report.installed;
                result.packages_already_installed = report.already_installed;
                result.packages_failed = report.failed;
            }
            Err(e) => {
                tracing::warn!("Package installation failed: {e:#}");
                result.packages_failed = packages.to_vec();
                result.errors.push(format!("Package installation failed: {e:#}"));
            }
        }
    }
}
