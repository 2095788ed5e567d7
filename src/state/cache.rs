//! Mirror of the project files in the active sandbox.
//!
//! The cache is keyed by project-relative path and bound to one sandbox id.
//! When that id no longer matches the active sandbox the contents are stale
//! and must be rebuilt from the environment before being trusted.

use crate::sandbox::RemoteEnvironment;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;

/// Extensions read back during a rebuild.
const SOURCE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "css", "json", "html", "md"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedFile {
    pub content: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCacheSnapshot {
    pub files: BTreeMap<String, CachedFile>,
    pub last_sync: Option<DateTime<Utc>>,
    pub sandbox_id: Option<String>,
}

#[derive(Default)]
pub struct FileCache {
    inner: RwLock<FileCacheSnapshot>,
}

pub fn is_source_file(path: &str) -> bool {
    path.rsplit_once('.')
        .is_some_and(|(_, ext)| SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

impl FileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fresh_for(&self, sandbox_id: &str) -> bool {
        self.inner.read().sandbox_id.as_deref() == Some(sandbox_id)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner.read().files.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.inner.read().files.get(path).map(|f| f.content.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> FileCacheSnapshot {
        self.inner.read().clone()
    }

    /// Record files that were written to `sandbox_id`.
    pub fn record_writes(&self, sandbox_id: &str, written: Vec<(String, String)>) {
        let now = Utc::now();
        let mut inner = self.inner.write();
        if inner.sandbox_id.as_deref() != Some(sandbox_id) {
            inner.files.clear();
            inner.sandbox_id = Some(sandbox_id.to_string());
        }
        for (path, content) in written {
            inner.files.insert(
                path,
                CachedFile {
                    content,
                    last_modified: now,
                },
            );
        }
        inner.last_sync = Some(now);
    }

    pub fn clear(&self) {
        *self.inner.write() = FileCacheSnapshot::default();
    }

    /// Rebuild from `env` unless the cache already belongs to it. If the
    /// rebuild fails the cache is reset to empty for `env`, so callers can
    /// still classify writes.
    pub async fn ensure_fresh(
        &self,
        env: &dyn RemoteEnvironment,
        project_dir: &str,
    ) -> anyhow::Result<()> {
        if self.is_fresh_for(env.id()) {
            return Ok(());
        }

        match self.rebuild(env, project_dir).await {
            Ok(count) => {
                tracing::info!("File cache rebuilt from sandbox {} ({count} files)", env.id());
                Ok(())
            }
            Err(e) => {
                *self.inner.write() = FileCacheSnapshot {
                    files: BTreeMap::new(),
                    last_sync: Some(Utc::now()),
                    sandbox_id: Some(env.id().to_string()),
                };
                Err(e)
            }
        }
    }

    /// Replace the contents with the source files found under `project_dir`.
    pub async fn rebuild(&self, env: &dyn RemoteEnvironment, project_dir: &str) -> anyhow::Result<usize> {
        let root = format!("{}/", project_dir.trim_end_matches('/'));
        let entries = env.list_files(project_dir, true).await?;

        let wanted: Vec<String> = entries
            .into_iter()
            .filter(|e| !e.is_dir && is_source_file(&e.path))
            .map(|e| e.path)
            .collect();

        let reads = wanted.iter().map(|path| env.read_file(path));
        let contents = join_all(reads).await;

        let now = Utc::now();
        let mut files = BTreeMap::new();
        for (path, content) in wanted.iter().zip(contents) {
            match content {
                Ok(content) => {
                    let rel = path.strip_prefix(&root).unwrap_or(path).to_string();
                    files.insert(
                        rel,
                        CachedFile {
                            content,
                            last_modified: now,
                        },
                    );
                }
                Err(e) => tracing::debug!("Skipping {path} during cache rebuild: {e}"),
            }
        }

        let count = files.len();
        *self.inner.write() = FileCacheSnapshot {
            files,
            last_sync: Some(now),
            sandbox_id: Some(env.id().to_string()),
        };
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::memory::InMemoryProvider;
    use crate::sandbox::{CreateOptions, EnvironmentProvider};

    fn options() -> CreateOptions {
        CreateOptions {
            template: "test".into(),
            timeout_ms: 1_000,
        }
    }

    #[test]
    fn source_extension_filter() {
        assert!(is_source_file("src/App.jsx"));
        assert!(is_source_file("README.MD"));
        assert!(!is_source_file("public/logo.png"));
        assert!(!is_source_file("Makefile"));
    }

    #[test]
    fn writes_for_another_sandbox_reset_the_cache() {
        let cache = FileCache::new();
        cache.record_writes("a", vec![("src/a.js".into(), "1".into())]);
        assert!(cache.is_fresh_for("a"));
        assert_eq!(cache.get("src/a.js").as_deref(), Some("1"));

        cache.record_writes("b", vec![("src/b.js".into(), "2".into())]);
        assert!(!cache.contains("src/a.js"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn rebuild_reads_source_files_only() {
        let provider = InMemoryProvider::new();
        let env = provider.create(&options()).await.unwrap();
        env.write_file("/app/src/App.jsx", "app").await.unwrap();
        env.write_file("/app/logo.png", "png").await.unwrap();
        env.write_file("/app/node_modules/x/index.js", "dep").await.unwrap();

        let cache = FileCache::new();
        let count = cache.rebuild(env.as_ref(), "/app").await.unwrap();

        assert_eq!(count, 1);
        assert_eq!(cache.get("src/App.jsx").as_deref(), Some("app"));
        assert!(cache.is_fresh_for(env.id()));
    }

    #[tokio::test]
    async fn ensure_fresh_skips_rebuild_for_same_sandbox() {
        let provider = InMemoryProvider::new();
        let env = provider.create(&options()).await.unwrap();
        let cache = FileCache::new();

        cache.ensure_fresh(env.as_ref(), "/app").await.unwrap();
        let calls = provider.remote_calls();
        cache.ensure_fresh(env.as_ref(), "/app").await.unwrap();
        assert_eq!(provider.remote_calls(), calls);
    }

    #[tokio::test]
    async fn failed_rebuild_leaves_empty_cache_bound_to_sandbox() {
        let provider = InMemoryProvider::new();
        let env = provider.create(&options()).await.unwrap();
        let cache = FileCache::new();
        cache.record_writes("old", vec![("a.js".into(), "x".into())]);

        env.kill().await.unwrap();
        assert!(cache.ensure_fresh(env.as_ref(), "/app").await.is_err());
        assert!(cache.is_empty());
        assert!(cache.is_fresh_for(env.id()));
    }
}
