//! Messages exchanged between the bridge and the execution context.
//!
//! Both directions are internally tagged by `type` with camelCase payload
//! keys, so a serialised message looks like
//! `{"type":"convert","id":2,"videoData":[...],"videoName":"clip.mp4"}`.
//! Every request carries a caller-chosen `id` that the matching responses
//! echo back.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Correlation id attached to every request.
pub type RequestId = u64;

/// Caller → execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerRequest {
    /// Make sure the engine is loaded.
    Load { id: RequestId },
    /// Convert one video.
    Convert {
        id: RequestId,
        #[serde(rename = "videoData")]
        video_data: Vec<u8>,
        #[serde(rename = "videoName")]
        video_name: String,
    },
}

impl WorkerRequest {
    pub fn id(&self) -> RequestId {
        match self {
            WorkerRequest::Load { id } | WorkerRequest::Convert { id, .. } => *id,
        }
    }
}

/// Execution context → caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerResponse {
    /// The engine is ready.
    Loaded { id: RequestId },
    /// Engine progress. `id` is the running conversion, if any.
    Progress {
        id: Option<RequestId>,
        /// Percent complete, `0..=100`.
        progress: u8,
        /// Media timestamp reached, in microseconds.
        time: Option<i64>,
    },
    /// A conversion finished.
    Complete {
        id: RequestId,
        #[serde(rename = "videoData")]
        video_data: Vec<u8>,
        #[serde(rename = "videoName")]
        video_name: String,
    },
    /// A request failed, or the context itself faulted (`id: None`).
    Error {
        id: Option<RequestId>,
        kind: FailureKind,
        message: String,
        stack: Option<String>,
    },
}

/// Machine-readable failure category carried by [`WorkerResponse::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Load,
    NotInitialized,
    Write,
    Exec,
    Timeout,
    ExitCode,
    Read,
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Load => "load",
            FailureKind::NotInitialized => "not_initialized",
            FailureKind::Write => "write",
            FailureKind::Exec => "exec",
            FailureKind::Timeout => "timeout",
            FailureKind::ExitCode => "exit_code",
            FailureKind::Read => "read",
            FailureKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Render an error and its `source()` chain, one cause per line.
pub fn error_stack(err: &(dyn std::error::Error + 'static)) -> Option<String> {
    let mut lines = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Sending half of the response channel, shared by everything inside the
/// execution context.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<WorkerResponse>,
}

impl Outbox {
    pub fn new(tx: mpsc::UnboundedSender<WorkerResponse>) -> Self {
        Self { tx }
    }

    /// Post a response. Returns `false` once the bridge has gone away.
    pub fn post(&self, message: WorkerResponse) -> bool {
        if self.tx.send(message).is_err() {
            log::debug!("worker: response dropped, bridge is gone");
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn convert_request_uses_camel_case_keys() {
        let request = WorkerRequest::Convert {
            id: 7,
            video_data: vec![1, 2],
            video_name: "clip.mp4".into(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"type": "convert", "id": 7, "videoData": [1, 2], "videoName": "clip.mp4"})
        );
    }

    #[test]
    fn load_request_parses_from_tagged_json() {
        let request: WorkerRequest = serde_json::from_value(json!({"type": "load", "id": 1})).unwrap();
        assert_eq!(request, WorkerRequest::Load { id: 1 });
        assert_eq!(request.id(), 1);
    }

    #[test]
    fn progress_without_id_or_time() {
        let value = serde_json::to_value(WorkerResponse::Progress {
            id: None,
            progress: 42,
            time: None,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"type": "progress", "id": null, "progress": 42, "time": null})
        );
    }

    #[test]
    fn error_kind_is_snake_case() {
        let value = serde_json::to_value(WorkerResponse::Error {
            id: Some(3),
            kind: FailureKind::ExitCode,
            message: "exit code 1".into(),
            stack: None,
        })
        .unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["kind"], "exit_code");
        assert_eq!(FailureKind::NotInitialized.to_string(), "not_initialized");
    }

    #[test]
    fn error_stack_renders_source_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("outer")]
        struct Outer(#[source] std::io::Error);

        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert_eq!(error_stack(&err).as_deref(), Some("caused by: disk full"));

        let plain = std::io::Error::new(std::io::ErrorKind::Other, "plain");
        assert_eq!(error_stack(&plain), None);
    }

    #[tokio::test]
    async fn outbox_reports_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbox = Outbox::new(tx);
        assert!(outbox.post(WorkerResponse::Loaded { id: 1 }));
        drop(rx);
        assert!(!outbox.post(WorkerResponse::Loaded { id: 2 }));
    }
}
