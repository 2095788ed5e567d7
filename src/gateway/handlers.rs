//! Route handlers.

use super::{ok, ApiError, ApiResult, AppState};
use crate::apply::{merge_packages, ApplyReport};
use crate::generation::GenerationRequest;
use crate::parser::{self, ParsedResponse};
use crate::sandbox::SandboxInfo;
use crate::state::{CachedFile, Conversation, EditKind};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSandbox {
    pub sandbox_id: String,
    pub url: String,
}

impl From<SandboxInfo> for CreatedSandbox {
    fn from(info: SandboxInfo) -> Self {
        Self {
            sandbox_id: info.sandbox_id,
            url: info.url,
        }
    }
}

/// POST /create
pub async fn create(State(state): State<AppState>) -> ApiResult<CreatedSandbox> {
    let info = state.manager.create_sandbox().await?;
    Ok(ok(info.into()))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub sandbox: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub active: bool,
    pub healthy: bool,
    pub sandbox_data: Option<SandboxInfo>,
}

/// GET /status?sandbox=<id>
pub async fn status(
    State(state): State<AppState>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> ApiResult<StatusPayload> {
    let Query(query) = query?;

    if let Some(requested) = query.sandbox.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let active_id = state.manager.info().await.map(|info| info.sandbox_id);
        if active_id.as_deref() != Some(requested) {
            if let Err(e) = state.manager.reconnect(requested).await {
                tracing::info!("Could not reconnect to sandbox {requested}: {e}");
            }
        }
    }

    let status = state.manager.get_status().await;
    Ok(ok(StatusPayload {
        active: status.active,
        healthy: status.healthy,
        sandbox_data: status.info,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KillPayload {
    pub sandbox_killed: bool,
}

/// POST /kill
pub async fn kill(State(state): State<AppState>) -> ApiResult<KillPayload> {
    let sandbox_killed = state.manager.kill_sandbox().await;
    Ok(ok(KillPayload { sandbox_killed }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectRequest {
    pub sandbox_id: String,
}

/// POST /reconnect
pub async fn reconnect(
    State(state): State<AppState>,
    payload: Result<Json<ReconnectRequest>, JsonRejection>,
) -> ApiResult<CreatedSandbox> {
    let Json(req) = payload?;
    let sandbox_id = req.sandbox_id.trim();
    if sandbox_id.is_empty() {
        return Err(ApiError::bad_request("sandboxId is required"));
    }

    let info = state.manager.reconnect(sandbox_id).await?;
    Ok(ok(info.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    pub response: String,
    #[serde(default)]
    pub is_edit: bool,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

/// POST /apply
pub async fn apply(
    State(state): State<AppState>,
    payload: Result<Json<ApplyRequest>, JsonRejection>,
) -> ApiResult<ApplyReport> {
    let Json(req) = payload?;
    if req.response.trim().is_empty() {
        return Err(ApiError::bad_request("response is required"));
    }

    let parsed = parser::parse(&req.response);
    let report = apply_and_record(&state, &parsed, &req.packages, req.is_edit, req.prompt.as_deref()).await;
    Ok(ok(report))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub is_edit: bool,
    #[serde(default)]
    pub packages: Vec<String>,
}

/// POST /generate
///
/// Dropping the request future (client disconnect) cancels the upstream
/// stream through the drop guard; nothing is applied until it completes.
pub async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> ApiResult<ApplyReport> {
    let Json(req) = payload?;
    if req.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt is required"));
    }
    let client = state.generation.clone().ok_or_else(|| {
        ApiError::internal("configuration error: generation.endpoint is not configured")
    })?;

    let sandbox_id = state.manager.info().await.map(|info| info.sandbox_id);
    let current_files = state
        .pipeline
        .cache()
        .snapshot()
        .files
        .into_keys()
        .collect();

    let request = GenerationRequest {
        prompt: req.prompt.clone(),
        is_edit: req.is_edit,
        sandbox_id,
        current_files,
    };

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let output = client
        .generate(&request, &cancel)
        .await
        .map_err(|e| ApiError::internal(format!("{e:#}")))?;

    let parsed = parser::parse(&output.text);
    let packages = merge_packages(&req.packages, &output.packages);
    let report = apply_and_record(&state, &parsed, &packages, req.is_edit, Some(&req.prompt)).await;
    Ok(ok(report))
}

async fn apply_and_record(
    state: &AppState,
    parsed: &ParsedResponse,
    packages: &[String],
    is_edit: bool,
    prompt: Option<&str>,
) -> ApplyReport {
    if let Some(prompt) = prompt {
        state.conversation.record_user(prompt);
    }

    let report = state.pipeline.apply(parsed, packages, is_edit).await;
    let touched = report.results.touched_files();

    let summary = if report.preview {
        format!("Previewed {} files", touched.len())
    } else {
        format!(
            "Applied {} files ({} created, {} updated)",
            touched.len(),
            report.results.files_created.len(),
            report.results.files_updated.len()
        )
    };
    state.conversation.record_assistant(&summary, touched.clone());

    if is_edit {
        let kind = if report.results.files_updated.is_empty() {
            EditKind::Create
        } else {
            EditKind::Edit
        };
        state
            .conversation
            .record_edit(prompt.unwrap_or_default(), kind, touched);
    }

    report
}

#[derive(Debug, Deserialize)]
pub struct InstallRequest {
    pub packages: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallPayload {
    pub installed: Vec<String>,
    pub already_installed: Vec<String>,
    pub failed: Vec<String>,
}

/// POST /install-packages
pub async fn install_packages(
    State(state): State<AppState>,
    payload: Result<Json<InstallRequest>, JsonRejection>,
) -> ApiResult<InstallPayload> {
    let Json(req) = payload?;
    let packages = merge_packages(&req.packages, &[]);
    if packages.is_empty() {
        return Err(ApiError::bad_request("packages must be a non-empty list"));
    }

    let report = state
        .pipeline
        .installer()
        .install(&packages)
        .await
        .map_err(|e| ApiError::internal(format!("{e:#}")))?;

    Ok(ok(InstallPayload {
        installed: report.installed,
        already_installed: report.already_installed,
        failed: report.failed,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesPayload {
    pub files: BTreeMap<String, String>,
    pub sandbox_id: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
}

/// GET /files
pub async fn files(State(state): State<AppState>) -> ApiResult<FilesPayload> {
    let snapshot = state
        .pipeline
        .sync_files()
        .await
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "No active sandbox"))?;

    Ok(ok(FilesPayload {
        files: snapshot
            .files
            .into_iter()
            .map(|(path, CachedFile { content, .. })| (path, content))
            .collect(),
        sandbox_id: snapshot.sandbox_id,
        last_sync: snapshot.last_sync,
    }))
}

#[derive(Debug, Serialize)]
pub struct ConversationPayload {
    pub state: Conversation,
}

/// GET /conversation
pub async fn conversation(State(state): State<AppState>) -> ApiResult<ConversationPayload> {
    Ok(ok(ConversationPayload {
        state: state.conversation.snapshot(),
    }))
}

#[derive(Debug, Serialize)]
pub struct ClearedPayload {
    pub cleared: bool,
}

/// DELETE /conversation
pub async fn clear_conversation(State(state): State<AppState>) -> ApiResult<ClearedPayload> {
    state.conversation.reset();
    Ok(ok(ClearedPayload { cleared: true }))
}
