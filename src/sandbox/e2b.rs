//! E2B sandbox provider: HTTP client for the E2B REST API.
//!
//! [`E2bProvider`] creates and re-attaches sandboxes; every sandbox is wrapped
//! in an [`E2bEnvironment`] bound to its id, so no call ever has to look up
//! "the current sandbox" through shared state.

use super::{CommandOutput, CreateOptions, EnvironmentProvider, FileEntry, RemoteEnvironment, SKIP_DIRS};
use crate::config::E2bConfig;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Base URL for the E2B REST API.
pub const E2B_API_BASE: &str = "https://api.e2b.dev";

#[derive(Clone)]
struct E2bApi {
    api_base: String,
    api_key: String,
    domain: String,
    http: reqwest::Client,
}

impl E2bApi {
    fn url(&self, path: &str) -> String {
        format!("{}/v0{path}", self.api_base.trim_end_matches('/'))
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

/// Read a response body and fail with the status and body on non-2xx.
async fn checked_body(resp: reqwest::Response) -> anyhow::Result<String> {
    let status = resp.status();
    let body_text = resp
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable>".to_string());

    anyhow::ensure!(
        status.is_success(),
        "E2B API returned {status}: {body_text}"
    );
    Ok(body_text)
}

/// Creates E2B sandboxes.
pub struct E2bProvider {
    api: E2bApi,
}

impl E2bProvider {
    pub fn new(config: &E2bConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(!config.api_key.trim().is_empty(), "E2B_API_KEY is not set");

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build reqwest client: {e}"))?;

        Ok(Self {
            api: E2bApi {
                api_base: config.api_base.clone(),
                api_key: config.api_key.clone(),
                domain: config.domain.clone(),
                http,
            },
        })
    }

    fn environment(&self, sandbox_id: String) -> Arc<dyn RemoteEnvironment> {
        Arc::new(E2bEnvironment {
            sandbox_id,
            api: self.api.clone(),
        })
    }
}

#[async_trait]
impl EnvironmentProvider for E2bProvider {
    async fn create(&self, options: &CreateOptions) -> anyhow::Result<Arc<dyn RemoteEnvironment>> {
        let body = serde_json::json!({
            "templateID": options.template,
            "timeout": options.timeout_ms / 1000,
        });

        let resp = self
            .api
            .http
            .post(self.api.url("/sandboxes"))
            .header("Authorization", self.api.auth())
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("E2B create sandbox request failed: {e}"))?;

        let body_text = checked_body(resp).await?;
        let parsed: serde_json::Value = serde_json::from_str(&body_text)
            .map_err(|e| anyhow::anyhow!("Failed to parse E2B response: {e}\nBody: {body_text}"))?;

        let sandbox_id = parsed["sandboxID"]
            .as_str()
            .or_else(|| parsed["sandbox_id"].as_str())
            .unwrap_or("")
            .to_string();

        anyhow::ensure!(
            !sandbox_id.is_empty(),
            "E2B returned no sandbox_id. Response: {body_text}"
        );

        tracing::info!("E2B sandbox {sandbox_id} created from template {}", options.template);
        Ok(self.environment(sandbox_id))
    }

    async fn connect(&self, sandbox_id: &str) -> anyhow::Result<Arc<dyn RemoteEnvironment>> {
        let resp = self
            .api
            .http
            .get(self.api.url(&format!("/sandboxes/{sandbox_id}")))
            .header("Authorization", self.api.auth())
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("E2B connect request failed: {e}"))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            anyhow::bail!("Sandbox {sandbox_id} not found");
        }
        checked_body(resp).await?;

        Ok(self.environment(sandbox_id.to_string()))
    }

    fn name(&self) -> &str {
        "e2b"
    }
}

/// Handle to one E2B sandbox.
pub struct E2bEnvironment {
    sandbox_id: String,
    api: E2bApi,
}

impl E2bEnvironment {
    fn files_url(&self, path: &str) -> String {
        format!(
            "{}?path={encoded}",
            self.api.url(&format!("/sandboxes/{}/files", self.sandbox_id)),
            encoded = urlencoding::encode(path)
        )
    }

    async fn list_dir(&self, path: &str) -> anyhow::Result<Vec<(String, bool)>> {
        let resp = self
            .api
            .http
            .get(self.files_url(path))
            .header("Authorization", self.api.auth())
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("E2B list_files request failed: {e}"))?;

        let body_text = checked_body(resp).await?;
        let parsed: serde_json::Value =
            serde_json::from_str(&body_text).unwrap_or(serde_json::json!([]));

        let Some(entries) = parsed.as_array() else {
            return Ok(Vec::new());
        };

        Ok(entries
            .iter()
            .filter_map(|entry| {
                let name = entry["name"].as_str()?;
                let entry_type = entry["type"].as_str().unwrap_or("file");
                Some((
                    name.to_string(),
                    entry_type == "dir" || entry_type == "directory",
                ))
            })
            .collect())
    }
}

#[async_trait]
impl RemoteEnvironment for E2bEnvironment {
    fn id(&self) -> &str {
        &self.sandbox_id
    }

    async fn run_command(
        &self,
        command: &str,
        workdir: &str,
        timeout_ms: u64,
    ) -> anyhow::Result<CommandOutput> {
        let body = serde_json::json!({
            "cmd": command,
            "workdir": workdir,
            "timeout": timeout_ms / 1000,
        });

        let resp = self
            .api
            .http
            .post(self.api.url(&format!("/sandboxes/{}/commands", self.sandbox_id)))
            .header("Authorization", self.api.auth())
            .timeout(Duration::from_millis(timeout_ms.max(1_000)))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("E2B run_command request failed: {e}"))?;

        let body_text = checked_body(resp).await?;
        let parsed: serde_json::Value = serde_json::from_str(&body_text)
            .map_err(|e| anyhow::anyhow!("Failed to parse E2B response: {e}\nBody: {body_text}"))?;

        Ok(CommandOutput {
            stdout: parsed["stdout"].as_str().unwrap_or("").to_string(),
            stderr: parsed["stderr"].as_str().unwrap_or("").to_string(),
            exit_code: parsed["exitCode"]
                .as_i64()
                .or_else(|| parsed["exit_code"].as_i64())
                .unwrap_or(0),
        })
    }

    async fn write_file(&self, path: &str, content: &str) -> anyhow::Result<()> {
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();

        let form = reqwest::multipart::Form::new()
            .text("path", path.to_string())
            .part(
                "file",
                reqwest::multipart::Part::bytes(content.as_bytes().to_vec())
                    .file_name(file_name)
                    .mime_str("text/plain")
                    .map_err(|e| anyhow::anyhow!("MIME type error: {e}"))?,
            );

        let resp = self
            .api
            .http
            .post(self.api.url(&format!("/sandboxes/{}/files", self.sandbox_id)))
            .header("Authorization", self.api.auth())
            .multipart(form)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("E2B write_file request failed: {e}"))?;

        checked_body(resp).await.map(|_| ())
    }

    async fn read_file(&self, path: &str) -> anyhow::Result<String> {
        let resp = self
            .api
            .http
            .get(self.files_url(path))
            .header("Authorization", self.api.auth())
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("E2B read_file request failed: {e}"))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            anyhow::bail!("File not found: {path}");
        }

        checked_body(resp).await
    }

    async fn list_files(&self, path: &str, recursive: bool) -> anyhow::Result<Vec<FileEntry>> {
        let root = path.trim_end_matches('/').to_string();

        if !recursive {
            return Ok(self
                .list_dir(&root)
                .await?
                .into_iter()
                .map(|(name, is_dir)| FileEntry {
                    path: format!("{root}/{name}"),
                    is_dir,
                })
                .collect());
        }

        let mut files = Vec::new();
        let mut dirs_to_visit = vec![root];

        while let Some(dir) = dirs_to_visit.pop() {
            let entries = match self.list_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!("Skipping unlistable directory {dir}: {e}");
                    continue;
                }
            };

            for (name, is_dir) in entries {
                if SKIP_DIRS.contains(&name.as_str()) {
                    continue;
                }
                let full_path = format!("{dir}/{name}");
                if is_dir {
                    dirs_to_visit.push(full_path);
                } else {
                    files.push(FileEntry {
                        path: full_path,
                        is_dir: false,
                    });
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    fn get_host(&self, port: u16) -> String {
        format!("{port}-{}.{}", self.sandbox_id, self.api.domain)
    }

    async fn kill(&self) -> anyhow::Result<()> {
        let resp = self
            .api
            .http
            .delete(self.api.url(&format!("/sandboxes/{}", self.sandbox_id)))
            .header("Authorization", self.api.auth())
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("E2B kill request failed: {e}"))?;

        let status = resp.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            tracing::info!("E2B sandbox {} terminated", self.sandbox_id);
            Ok(())
        } else {
            let body_text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable>".to_string());
            anyhow::bail!("E2B API returned {status}: {body_text}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> E2bProvider {
        E2bProvider::new(&E2bConfig {
            api_key: "e2b_test".into(),
            api_base: server.uri(),
            ..E2bConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn new_fails_without_api_key() {
        let result = E2bProvider::new(&E2bConfig::default());
        assert!(result.is_err());
        assert!(result
            .err()
            .unwrap()
            .to_string()
            .contains("E2B_API_KEY is not set"));
    }

    #[tokio::test]
    async fn create_returns_environment_bound_to_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v0/sandboxes"))
            .and(header("Authorization", "Bearer e2b_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sandboxID": "sb-123"
            })))
            .mount(&server)
            .await;

        let env = provider(&server)
            .create(&CreateOptions {
                template: "code-interpreter-v1".into(),
                timeout_ms: 900_000,
            })
            .await
            .unwrap();

        assert_eq!(env.id(), "sb-123");
        assert_eq!(env.get_host(5173), "5173-sb-123.e2b.app");
    }

    #[tokio::test]
    async fn create_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v0/sandboxes"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .create(&CreateOptions {
                template: "base".into(),
                timeout_ms: 60_000,
            })
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn connect_to_missing_sandbox_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/sandboxes/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = provider(&server).connect("gone").await.err().unwrap();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn run_command_parses_output() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/sandboxes/sb-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v0/sandboxes/sb-1/commands"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "stdout": "ok\n",
                "stderr": "",
                "exitCode": 0
            })))
            .mount(&server)
            .await;

        let env = provider(&server).connect("sb-1").await.unwrap();
        let out = env.run_command("echo ok", "/", 5_000).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "ok");
    }

    #[tokio::test]
    async fn kill_tolerates_already_gone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/sandboxes/sb-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v0/sandboxes/sb-2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let env = provider(&server).connect("sb-2").await.unwrap();
        assert!(env.kill().await.is_ok());
    }

    #[tokio::test]
    async fn recursive_listing_skips_dependency_dirs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v0/sandboxes/sb-3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v0/sandboxes/sb-3/files"))
            .and(query_param("path", "/home/user/app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "name": "package.json", "type": "file" },
                { "name": "node_modules", "type": "dir" },
                { "name": "src", "type": "dir" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v0/sandboxes/sb-3/files"))
            .and(query_param("path", "/home/user/app/src"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "name": "App.jsx", "type": "file" }
            ])))
            .mount(&server)
            .await;

        let env = provider(&server).connect("sb-3").await.unwrap();
        let files = env.list_files("/home/user/app", true).await.unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["/home/user/app/package.json", "/home/user/app/src/App.jsx"]
        );
    }
}
