//! Configuration schema. Every field carries a serde default so an empty
//! file (or no file at all) yields a working configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub e2b: E2bConfig,
    pub sandbox: SandboxConfig,
    pub installer: InstallerConfig,
    pub generation: GenerationConfig,
    pub store: StoreConfig,
}

/// HTTP gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for a single request, sandbox creation included.
    pub request_timeout_secs: u64,
    pub body_limit_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3100,
            request_timeout_secs: 600,
            body_limit_bytes: 8 * 1024 * 1024,
        }
    }
}

/// E2B cloud provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct E2bConfig {
    /// API key. `E2B_API_KEY` in the environment takes precedence.
    pub api_key: String,
    pub api_base: String,
    /// Public domain used to derive preview hosts (`<port>-<id>.<domain>`).
    pub domain: String,
    pub template: String,
    /// Sandbox lifetime requested from the provider.
    pub timeout_ms: u64,
}

impl Default for E2bConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: crate::sandbox::e2b::E2B_API_BASE.into(),
            domain: "e2b.app".into(),
            template: "code-interpreter-v1".into(),
            timeout_ms: 15 * 60 * 1000,
        }
    }
}

/// Lifecycle and bootstrap tuning.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SandboxConfig {
    /// Absolute project root inside the environment.
    pub project_dir: String,
    pub dev_server_port: u16,
    pub health_check_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Pause after starting the dev server before the sandbox is reported ready.
    pub settle_delay_ms: u64,
    pub install_timeout_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            project_dir: "/home/user/app".into(),
            dev_server_port: 5173,
            health_check_interval_ms: 30_000,
            probe_timeout_ms: 10_000,
            max_reconnect_attempts: 3,
            settle_delay_ms: 7_000,
            install_timeout_ms: 300_000,
        }
    }
}

/// Package installer collaborator. When `endpoint` is unset, packages are
/// installed directly inside the active sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct InstallerConfig {
    pub endpoint: Option<String>,
}

/// Upstream code-generation stream.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GenerationConfig {
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file used to remember the active sandbox across restarts.
    pub db_path: Option<String>,
}
