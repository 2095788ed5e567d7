//! Incremental decoder for the code-generation event stream.
//!
//! The stream is server-sent events, one JSON object per `data:` line:
//!
//! ```text
//! data: {"type":"status","message":"Generating code..."}
//! data: {"type":"stream","text":"<file path=\"src/App.jsx\">"}
//! data: {"type":"package","name":"framer-motion"}
//! data: {"type":"complete","generatedCode":"..."}
//! ```
//!
//! Chunks may split lines, and UTF-8 sequences, anywhere. Bytes are held
//! until a full line is available; a newline byte never occurs inside a
//! multi-byte sequence, so decoding per line is safe.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Status {
        #[serde(default)]
        message: String,
    },
    Stream {
        #[serde(default)]
        text: String,
    },
    #[serde(alias = "package-detected")]
    Package {
        #[serde(default)]
        name: String,
    },
    Complete {
        #[serde(default, rename = "generatedCode")]
        generated_code: Option<String>,
        #[serde(default)]
        explanation: Option<String>,
    },
    Error {
        #[serde(default)]
        error: String,
    },
}

/// Everything assembled from one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedOutput {
    /// `generatedCode` from the `complete` event when present, otherwise the
    /// concatenated `stream` text.
    pub text: String,
    pub packages: Vec<String>,
    pub error: Option<String>,
    /// An end marker (`complete` or `[DONE]`) was seen.
    pub completed: bool,
}

#[derive(Debug, Default)]
pub struct CodeStreamAssembler {
    pending: Vec<u8>,
    text: String,
    final_code: Option<String>,
    packages: Vec<String>,
    error: Option<String>,
    done: bool,
}

impl CodeStreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk. Returns the events completed by it, in order.
    /// Input after the end marker is ignored.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        self.pending.extend_from_slice(chunk);
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if let Some(event) = self.handle_line(&line) {
                events.push(event);
            }
            if self.done {
                self.pending.clear();
                break;
            }
        }
        events
    }

    /// Flush a trailing line that had no newline.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.pending);
        if self.done || rest.is_empty() {
            return Vec::new();
        }
        self.handle_line(&rest).into_iter().collect()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Text assembled so far.
    pub fn text(&self) -> &str {
        self.final_code.as_deref().unwrap_or(&self.text)
    }

    pub fn into_output(self) -> GeneratedOutput {
        GeneratedOutput {
            text: self.final_code.unwrap_or(self.text),
            packages: self.packages,
            error: self.error,
            completed: self.done,
        }
    }

    fn handle_line(&mut self, raw: &[u8]) -> Option<StreamEvent> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);
        let data = line.strip_prefix("data:")?.trim_start();

        if data == "[DONE]" {
            self.done = true;
            return None;
        }

        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!("Ignoring unrecognised stream event: {e}");
                return None;
            }
        };

        match &event {
            StreamEvent::Status { message } => tracing::debug!("Generation status: {message}"),
            StreamEvent::Stream { text } => self.text.push_str(text),
            StreamEvent::Package { name } => {
                let name = name.trim();
                if !name.is_empty() && !self.packages.iter().any(|p| p == name) {
                    self.packages.push(name.to_string());
                }
            }
            StreamEvent::Complete { generated_code, .. } => {
                if let Some(code) = generated_code.as_ref().filter(|c| !c.is_empty()) {
                    self.final_code = Some(code.clone());
                }
                self.done = true;
            }
            StreamEvent::Error { error } => {
                self.error = Some(error.clone());
                self.done = true;
            }
        }
        Some(event)
    }
}
