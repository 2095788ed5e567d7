//! Client for the code-generation endpoint.
//!
//! Posts a prompt and consumes the event stream until its end marker. The
//! assembled text is handed back to the caller; nothing is applied here, so
//! abandoning a stream midway leaves no partial state behind.

pub mod stream;

use crate::config::GenerationConfig;
use crate::error::LifecycleError;
use futures_util::StreamExt;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use stream::{CodeStreamAssembler, GeneratedOutput, StreamEvent};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    pub is_edit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    /// Files currently in the sandbox, for edit context.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub current_files: Vec<String>,
}

pub struct GenerationClient {
    endpoint: String,
    http: reqwest::Client,
}

impl GenerationClient {
    pub fn new(config: &GenerationConfig) -> Result<Self, LifecycleError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                LifecycleError::Config(
                    "generation.endpoint is not configured (set OPENLOVABLE_GENERATION_URL)".into(),
                )
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LifecycleError::Config(format!("Failed to build reqwest client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            http,
        })
    }

    /// Run one generation. Returns early with an error if `cancel` fires.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> anyhow::Result<GeneratedOutput> {
        let send = self
            .http
            .post(&self.endpoint)
            .header("Accept", "text/event-stream")
            .json(request)
            .send();

        let resp = tokio::select! {
            biased;
            () = cancel.cancelled() => anyhow::bail!("Generation cancelled"),
            resp = send => resp.map_err(|e| anyhow::anyhow!("Generation request failed: {e}"))?,
        };

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable>".to_string());
            anyhow::bail!("Generation endpoint returned {status}: {body_text}");
        }

        let mut body = resp.bytes_stream();
        let mut assembler = CodeStreamAssembler::new();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!("Generation abandoned after {} bytes", assembler.text().len());
                    anyhow::bail!("Generation cancelled");
                }
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for event in assembler.push(&bytes) {
                            if let StreamEvent::Package { name } = &event {
                                tracing::debug!("Generation detected package {name}");
                            }
                        }
                        if assembler.is_done() {
                            break;
                        }
                    }
                    Some(Err(e)) => anyhow::bail!("Generation stream failed: {e}"),
                    None => {
                        assembler.finish();
                        break;
                    }
                }
            }
        }

        let output = assembler.into_output();
        if let Some(error) = &output.error {
            anyhow::bail!("Generation failed: {error}");
        }
        if !output.completed {
            tracing::warn!("Generation stream ended without an end marker; output may be truncated");
        }
        Ok(output)
    }
}
