//! Error taxonomy for sandbox lifecycle operations.
//!
//! Only failures with no useful partial outcome live here. Per-file and
//! per-package problems during apply are recorded in
//! [`crate::apply::ApplyResult`] and never surface as a `LifecycleError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Remote create or bootstrap failed. No sandbox is registered as active.
    #[error("failed to provision sandbox: {0}")]
    Provision(String),

    /// Reconnect or liveness probe failed.
    #[error("sandbox connection failed: {0}")]
    Connection(String),

    /// Missing credentials or endpoint. Never retried.
    #[error("configuration error: {0}")]
    Config(String),
}

impl LifecycleError {
    pub fn provision(err: impl std::fmt::Display) -> Self {
        Self::Provision(err.to_string())
    }

    pub fn connection(err: impl std::fmt::Display) -> Self {
        Self::Connection(err.to_string())
    }
}
