//! In-process environment provider.
//!
//! Files live in a map and commands are only recorded, never executed.
//! Used by `serve --provider memory` for offline dry runs and as the test
//! double for the lifecycle manager and apply pipeline. Failure modes can be
//! toggled at runtime through [`InMemoryProvider`].

use super::{CommandOutput, CreateOptions, EnvironmentProvider, FileEntry, RemoteEnvironment, SKIP_DIRS};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Switches shared by a provider and every environment it hands out.
#[derive(Default)]
struct Knobs {
    fail_create: AtomicBool,
    create_delay_ms: AtomicU64,
    unhealthy: AtomicBool,
    failing_commands: Mutex<Vec<String>>,
    failing_writes: Mutex<HashSet<String>>,
    remote_calls: AtomicUsize,
}

#[derive(Default)]
pub struct InMemoryProvider {
    knobs: Arc<Knobs>,
    created: Mutex<Vec<Arc<InMemoryEnvironment>>>,
    next_id: AtomicUsize,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `create` calls fail.
    pub fn set_fail_create(&self, fail: bool) {
        self.knobs.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Delay every `create` call, as a slow VM boot would.
    pub fn set_create_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.knobs.create_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Make every command in every environment fail, as a dead VM would.
    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.knobs.unhealthy.store(unhealthy, Ordering::SeqCst);
    }

    /// Commands containing `needle` exit with code 1.
    pub fn fail_commands_containing(&self, needle: &str) {
        self.knobs.failing_commands.lock().push(needle.to_string());
    }

    /// Writes to this absolute path fail.
    pub fn fail_writes_to(&self, path: &str) {
        self.knobs.failing_writes.lock().insert(path.to_string());
    }

    /// Undo every failure switch.
    pub fn clear_failures(&self) {
        self.knobs.fail_create.store(false, Ordering::SeqCst);
        self.knobs.create_delay_ms.store(0, Ordering::SeqCst);
        self.knobs.unhealthy.store(false, Ordering::SeqCst);
        self.knobs.failing_commands.lock().clear();
        self.knobs.failing_writes.lock().clear();
    }

    /// Total number of remote operations performed across all environments.
    pub fn remote_calls(&self) -> usize {
        self.knobs.remote_calls.load(Ordering::SeqCst)
    }

    /// Every environment created so far, oldest first.
    pub fn environments(&self) -> Vec<Arc<InMemoryEnvironment>> {
        self.created.lock().clone()
    }

    fn find(&self, sandbox_id: &str) -> Option<Arc<InMemoryEnvironment>> {
        self.created
            .lock()
            .iter()
            .find(|env| env.id == sandbox_id)
            .cloned()
    }
}

#[async_trait]
impl EnvironmentProvider for InMemoryProvider {
    async fn create(&self, options: &CreateOptions) -> anyhow::Result<Arc<dyn RemoteEnvironment>> {
        self.knobs.remote_calls.fetch_add(1, Ordering::SeqCst);
        anyhow::ensure!(
            !self.knobs.fail_create.load(Ordering::SeqCst),
            "in-memory provider refused to create a sandbox"
        );

        let delay_ms = self.knobs.create_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let env = Arc::new(InMemoryEnvironment {
            id: format!("mem-{n}"),
            template: options.template.clone(),
            knobs: self.knobs.clone(),
            files: Mutex::new(BTreeMap::new()),
            commands: Mutex::new(Vec::new()),
            killed: AtomicBool::new(false),
        });
        self.created.lock().push(env.clone());
        Ok(env)
    }

    async fn connect(&self, sandbox_id: &str) -> anyhow::Result<Arc<dyn RemoteEnvironment>> {
        self.knobs.remote_calls.fetch_add(1, Ordering::SeqCst);
        match self.find(sandbox_id) {
            Some(env) if !env.is_killed() => Ok(env),
            _ => anyhow::bail!("Sandbox {sandbox_id} not found"),
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}

pub struct InMemoryEnvironment {
    id: String,
    template: String,
    knobs: Arc<Knobs>,
    files: Mutex<BTreeMap<String, String>>,
    commands: Mutex<Vec<String>>,
    killed: AtomicBool,
}

impl InMemoryEnvironment {
    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Commands run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Content of a file, bypassing the call counter.
    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().get(path).cloned()
    }

    fn touch(&self) -> anyhow::Result<()> {
        self.knobs.remote_calls.fetch_add(1, Ordering::SeqCst);
        anyhow::ensure!(!self.is_killed(), "Sandbox {} has been terminated", self.id);
        Ok(())
    }
}

#[async_trait]
impl RemoteEnvironment for InMemoryEnvironment {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_command(
        &self,
        command: &str,
        _workdir: &str,
        _timeout_ms: u64,
    ) -> anyhow::Result<CommandOutput> {
        self.touch()?;
        self.commands.lock().push(command.to_string());

        anyhow::ensure!(
            !self.knobs.unhealthy.load(Ordering::SeqCst),
            "Sandbox {} is not responding",
            self.id
        );

        let fails = self
            .knobs
            .failing_commands
            .lock()
            .iter()
            .any(|needle| command.contains(needle.as_str()));

        if fails {
            return Ok(CommandOutput {
                stdout: String::new(),
                stderr: format!("command failed: {command}"),
                exit_code: 1,
            });
        }

        let stdout = command
            .strip_prefix("echo ")
            .map(|rest| format!("{}\n", rest.trim_matches('\'')))
            .unwrap_or_default();

        Ok(CommandOutput {
            stdout,
            stderr: String::new(),
            exit_code: 0,
        })
    }

    async fn write_file(&self, path: &str, content: &str) -> anyhow::Result<()> {
        self.touch()?;
        anyhow::ensure!(
            !self.knobs.failing_writes.lock().contains(path),
            "write rejected for {path}"
        );
        self.files.lock().insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> anyhow::Result<String> {
        self.touch()?;
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("File not found: {path}"))
    }

    async fn list_files(&self, path: &str, recursive: bool) -> anyhow::Result<Vec<FileEntry>> {
        self.touch()?;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let files = self.files.lock();

        let mut entries = Vec::new();
        let mut seen_dirs = HashSet::new();

        for file in files.keys() {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            let first = rest.split('/').next().unwrap_or_default();
            let nested = rest.contains('/');

            if recursive {
                if rest
                    .split('/')
                    .rev()
                    .skip(1)
                    .any(|dir| SKIP_DIRS.contains(&dir))
                {
                    continue;
                }
                entries.push(FileEntry {
                    path: file.clone(),
                    is_dir: false,
                });
            } else if nested {
                if seen_dirs.insert(first.to_string()) {
                    entries.push(FileEntry {
                        path: format!("{prefix}{first}"),
                        is_dir: true,
                    });
                }
            } else {
                entries.push(FileEntry {
                    path: file.clone(),
                    is_dir: false,
                });
            }
        }

        Ok(entries)
    }

    fn get_host(&self, port: u16) -> String {
        format!("{}.localhost:{port}", self.id)
    }

    async fn kill(&self) -> anyhow::Result<()> {
        self.knobs.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> CreateOptions {
        CreateOptions {
            template: "test".into(),
            timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn files_round_trip_and_list() {
        let provider = InMemoryProvider::new();
        let env = provider.create(&options()).await.unwrap();

        env.write_file("/app/src/App.jsx", "x").await.unwrap();
        env.write_file("/app/index.html", "<html>").await.unwrap();
        env.write_file("/app/node_modules/react/index.js", "r").await.unwrap();

        assert_eq!(env.read_file("/app/src/App.jsx").await.unwrap(), "x");

        let flat = env.list_files("/app", false).await.unwrap();
        assert!(flat.contains(&FileEntry { path: "/app/src".into(), is_dir: true }));
        assert!(flat.contains(&FileEntry { path: "/app/index.html".into(), is_dir: false }));

        let deep = env.list_files("/app", true).await.unwrap();
        let paths: Vec<_> = deep.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/app/index.html", "/app/src/App.jsx"]);
    }

    #[tokio::test]
    async fn unhealthy_commands_error() {
        let provider = InMemoryProvider::new();
        let env = provider.create(&options()).await.unwrap();
        assert_eq!(env.run_command("echo ok", "/", 100).await.unwrap().stdout, "ok\n");

        provider.set_unhealthy(true);
        assert!(env.run_command("echo ok", "/", 100).await.is_err());
    }

    #[tokio::test]
    async fn connect_rejects_killed_or_unknown() {
        let provider = InMemoryProvider::new();
        let env = provider.create(&options()).await.unwrap();
        let id = env.id().to_string();

        assert!(provider.connect(&id).await.is_ok());
        env.kill().await.unwrap();
        assert!(provider.connect(&id).await.is_err());
        assert!(provider.connect("mem-404").await.is_err());
    }
}
