//! Configuration loading.
//!
//! Search order:
//! 1. the path passed with `--config`
//! 2. `./openlovable.toml`
//! 3. `<user config dir>/openlovable/openlovable.toml`
//!
//! Environment variables override file values afterwards.

pub mod schema;

pub use schema::{
    Config, E2bConfig, GatewayConfig, GenerationConfig, InstallerConfig, SandboxConfig,
    StoreConfig,
};

use crate::error::LifecycleError;
use std::path::{Path, PathBuf};

const CONFIG_FILENAME: &str = "openlovable.toml";

/// Load config from an explicit path, or discover it. Missing files are
/// not an error; unreadable or malformed ones are.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => find_config_file(),
    };

    let mut config = match path {
        Some(path) => {
            tracing::debug!("Loading config from {}", path.display());
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
            parse(&raw).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?
        }
        None => {
            tracing::debug!("No config file found, using defaults");
            Config::default()
        }
    };

    config.apply_env_overrides();
    Ok(config)
}

/// Parse a TOML document into a [`Config`].
pub fn parse(raw: &str) -> anyhow::Result<Config> {
    toml::from_str(raw).map_err(|e| anyhow::anyhow!("invalid config: {e}"))
}

fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }

    directories::ProjectDirs::from("", "", "openlovable")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILENAME))
        .filter(|p| p.exists())
}

impl Config {
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("E2B_API_KEY") {
            if !key.trim().is_empty() {
                self.e2b.api_key = key;
            }
        }
        if let Ok(url) = std::env::var("OPENLOVABLE_GENERATION_URL") {
            if !url.trim().is_empty() {
                self.generation.endpoint = Some(url);
            }
        }
    }

    /// Fail fast on settings the E2B provider cannot run without.
    pub fn validate_for_e2b(&self) -> Result<(), LifecycleError> {
        if self.e2b.api_key.trim().is_empty() {
            return Err(LifecycleError::Config(
                "E2B_API_KEY is not set (env or [e2b].api_key)".into(),
            ));
        }
        if self.sandbox.max_reconnect_attempts == 0 {
            return Err(LifecycleError::Config(
                "sandbox.max_reconnect_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// `store.db_path` with a leading `~` expanded.
    pub fn db_path(&self) -> Option<PathBuf> {
        self.store
            .db_path
            .as_deref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.sandbox.dev_server_port, 5173);
        assert_eq!(cfg.sandbox.max_reconnect_attempts, 3);
        assert_eq!(cfg.sandbox.health_check_interval_ms, 30_000);
        assert_eq!(cfg.e2b.domain, "e2b.app");
        assert!(cfg.installer.endpoint.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse(
            r#"
            [sandbox]
            settle_delay_ms = 0

            [installer]
            endpoint = "http://127.0.0.1:3100/install-packages"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.sandbox.settle_delay_ms, 0);
        assert_eq!(cfg.sandbox.project_dir, "/home/user/app");
        assert_eq!(
            cfg.installer.endpoint.as_deref(),
            Some("http://127.0.0.1:3100/install-packages")
        );
    }

    #[test]
    fn malformed_toml_is_rejected() {
        assert!(parse("[sandbox\nport = ").is_err());
    }

    #[test]
    fn validate_requires_api_key() {
        let cfg = Config::default();
        let err = cfg.validate_for_e2b().unwrap_err();
        assert!(matches!(err, LifecycleError::Config(_)));

        let mut cfg = Config::default();
        cfg.e2b.api_key = "e2b_test".into();
        assert!(cfg.validate_for_e2b().is_ok());
    }

    #[test]
    fn explicit_path_is_loaded() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("custom.toml");
        std::fs::write(&path, "[gateway]\nport = 4000\n").unwrap();
        let cfg = load(Some(&path)).unwrap();
        assert_eq!(cfg.gateway.port, 4000);
    }

    #[test]
    fn db_path_expands_tilde() {
        let mut cfg = Config::default();
        assert!(cfg.db_path().is_none());
        cfg.store.db_path = Some("~/openlovable/state.db".into());
        let path = cfg.db_path().unwrap();
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.ends_with("openlovable/state.db"));
    }
}
