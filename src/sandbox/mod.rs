//! Remote environment abstraction.
//!
//! [`EnvironmentProvider`] creates or re-attaches to environments; each one
//! is handed out as an `Arc<dyn RemoteEnvironment>` exposing the narrow set of
//! operations the lifecycle manager and apply pipeline need. Two providers
//! exist:
//!
//! - [`e2b::E2bProvider`]: E2B cloud sandbox over its REST API (requires `E2B_API_KEY`)
//! - [`memory::InMemoryProvider`]: in-process double for offline runs and tests
//!
//! Ownership of the single active handle belongs to [`manager::SandboxLifecycleManager`].

pub mod bootstrap;
pub mod e2b;
pub mod manager;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

pub use bootstrap::Bootstrapper;
pub use manager::{HealthOutcome, LifecycleState, SandboxInfo, SandboxLifecycleManager, SandboxStatus};

/// Output from a command executed inside an environment.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One entry returned by [`RemoteEnvironment::list_files`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Absolute path inside the environment.
    pub path: String,
    pub is_dir: bool,
}

/// Options passed to [`EnvironmentProvider::create`].
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub template: String,
    pub timeout_ms: u64,
}

/// Factory for remote environments.
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    /// Provision a brand-new environment.
    async fn create(&self, options: &CreateOptions) -> anyhow::Result<Arc<dyn RemoteEnvironment>>;

    /// Attach to an environment created earlier, by provider id.
    async fn connect(&self, sandbox_id: &str) -> anyhow::Result<Arc<dyn RemoteEnvironment>>;

    /// Short provider name used in logs.
    fn name(&self) -> &str;
}

/// A live remote environment.
#[async_trait]
pub trait RemoteEnvironment: Send + Sync {
    /// Opaque provider identifier.
    fn id(&self) -> &str;

    /// Run a shell command and wait for it to finish.
    async fn run_command(
        &self,
        command: &str,
        workdir: &str,
        timeout_ms: u64,
    ) -> anyhow::Result<CommandOutput>;

    /// Write a file, creating parent directories as needed.
    async fn write_file(&self, path: &str, content: &str) -> anyhow::Result<()>;

    /// Read a file as UTF-8.
    async fn read_file(&self, path: &str) -> anyhow::Result<String>;

    /// List entries below `path`. With `recursive`, only files are returned
    /// and well-known build/dependency directories are skipped.
    async fn list_files(&self, path: &str, recursive: bool) -> anyhow::Result<Vec<FileEntry>>;

    /// Public hostname routed to `port` inside the environment.
    fn get_host(&self, port: u16) -> String;

    /// Terminate the environment.
    async fn kill(&self) -> anyhow::Result<()>;
}

/// Directories never descended into by recursive listings.
pub const SKIP_DIRS: &[&str] = &["node_modules", ".next", ".git", "dist", "build", ".cache"];

/// Preview URL for a host returned by [`RemoteEnvironment::get_host`].
pub fn preview_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// Join a project directory and a relative path with a single slash.
pub fn join_path(dir: &str, rel: &str) -> String {
    format!(
        "{}/{}",
        dir.trim_end_matches('/'),
        rel.trim_start_matches('/')
    )
}
