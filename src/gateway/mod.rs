//! HTTP gateway exposing the sandbox lifecycle, apply pipeline and
//! conversation state.
//!
//! Every response is a JSON object with a `success` flag. Failures carry an
//! `error` message and a 400 (malformed input) or 500 (configuration,
//! provider or internal) status.

pub mod handlers;

use crate::apply::CodeApplyPipeline;
use crate::config::GatewayConfig;
use crate::error::LifecycleError;
use crate::generation::GenerationClient;
use crate::sandbox::SandboxLifecycleManager;
use crate::state::ConversationState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SandboxLifecycleManager>,
    pub pipeline: Arc<CodeApplyPipeline>,
    pub conversation: Arc<ConversationState>,
    /// `None` when no generation endpoint is configured.
    pub generation: Option<Arc<GenerationClient>>,
}

/// Error response: `{"success": false, "error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("API error: {} - {}", self.status, self.message);
        } else {
            tracing::debug!("API error: {} - {}", self.status, self.message);
        }
        (
            self.status,
            Json(serde_json::json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        Self::internal(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

/// Success response: `{"success": true, ...payload}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    success: bool,
    #[serde(flatten)]
    payload: T,
}

pub fn ok<T: Serialize>(payload: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        payload,
    })
}

pub type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

pub fn router(state: AppState, config: &GatewayConfig) -> Router {
    Router::new()
        .route("/create", post(handlers::create))
        .route("/status", get(handlers::status))
        .route("/kill", post(handlers::kill))
        .route("/reconnect", post(handlers::reconnect))
        .route("/apply", post(handlers::apply))
        .route("/generate", post(handlers::generate))
        .route("/install-packages", post(handlers::install_packages))
        .route("/files", get(handlers::files))
        .route(
            "/conversation",
            get(handlers::conversation).delete(handlers::clear_conversation),
        )
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.body_limit_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
}

/// Bind and serve until Ctrl-C. The active sandbox is left running so the
/// next process can restore it.
pub async fn run_gateway(config: &GatewayConfig, state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid gateway address {}:{}: {e}", config.host, config.port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}"))?;
    tracing::info!("Gateway listening on http://{addr}");

    axum::serve(listener, router(state, config))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Gateway server error: {e}"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down gateway");
}
