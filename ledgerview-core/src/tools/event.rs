//! Invocation event protocol
//!
//! A handler produces a finite sequence of events over a channel: any number
//! of `Progress`/`Log` events followed by exactly one terminal `Result` or
//! `Failure`. The engine is the single consumer of that channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Events flowing from a handler, through the engine, to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolEvent {
    /// Step progress
    Progress {
        /// Completed steps
        current: u32,
        /// Total steps
        total: u32,
        /// What the handler is doing
        message: String,
    },

    /// Log line forwarded to the caller
    Log {
        /// Severity
        level: LogLevel,
        /// Message
        message: String,
    },

    /// Successful terminal event
    Result {
        /// Tool output
        payload: Value,
    },

    /// Failed terminal event
    Failure {
        /// Error kind
        kind: ErrorKind,
        /// Human-readable detail
        detail: String,
    },
}

impl ToolEvent {
    /// Create a failure event
    pub fn failure(kind: ErrorKind, detail: impl Into<String>) -> Self {
        ToolEvent::Failure {
            kind,
            detail: detail.into(),
        }
    }

    /// Whether this event ends the invocation
    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolEvent::Result { .. } | ToolEvent::Failure { .. })
    }

    /// Whether this is a successful terminal event
    pub fn is_result(&self) -> bool {
        matches!(self, ToolEvent::Result { .. })
    }

    /// Error kind, if this is a failure
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            ToolEvent::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Payload, if this is a result
    pub fn payload(&self) -> Option<&Value> {
        match self {
            ToolEvent::Result { payload } => Some(payload),
            _ => None,
        }
    }
}

/// Log severity carried by `ToolEvent::Log`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Error kind taxonomy for failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input did not satisfy the tool's input schema (not retryable - fix input)
    Validation,

    /// Source failed to compile (not retryable - objective error)
    CompileError,

    /// Reasoning collaborator unreachable (recoverable by fallback)
    OracleUnavailable,

    /// Reasoning collaborator returned unusable output (treated as unavailable)
    MalformedOracleResponse,

    /// Invocation deadline expired
    Timeout,

    /// Cancelled by the caller
    Cancelled,

    /// Tool identifier is not registered
    UnknownTool,

    /// Resource referenced by the input does not exist
    NotFound,

    /// Handler defect
    Internal,
}

impl ErrorKind {
    /// Check if this error kind is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::OracleUnavailable | ErrorKind::MalformedOracleResponse
        )
    }

    /// Stable label used in logs and metering
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::CompileError => "compile_error",
            ErrorKind::OracleUnavailable => "oracle_unavailable",
            ErrorKind::MalformedOracleResponse => "malformed_oracle_response",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handler-side end of the event channel
///
/// Send failures mean the engine has stopped listening (the invocation was
/// cancelled or timed out); handlers may keep going and their output is
/// discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<ToolEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<ToolEvent>) -> Self {
        Self { tx }
    }

    /// Emit a raw event. Returns false when nobody is listening anymore.
    pub async fn emit(&self, event: ToolEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Emit a progress event
    pub async fn progress(&self, current: u32, total: u32, message: impl Into<String>) -> bool {
        self.emit(ToolEvent::Progress {
            current,
            total,
            message: message.into(),
        })
        .await
    }

    /// Emit a log event
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) -> bool {
        self.emit(ToolEvent::Log {
            level,
            message: message.into(),
        })
        .await
    }

    /// Emit the terminal result
    pub async fn result(&self, payload: Value) -> bool {
        self.emit(ToolEvent::Result { payload }).await
    }

    /// Emit the terminal failure
    pub async fn failure(&self, kind: ErrorKind, detail: impl Into<String>) -> bool {
        self.emit(ToolEvent::failure(kind, detail)).await
    }
}
