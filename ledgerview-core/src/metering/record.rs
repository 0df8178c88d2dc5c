//! Per-invocation performance records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Performance record emitted once per completed invocation
///
/// The core constructs and emits these; persisting them is the collector's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Tool identifier
    pub tool_id: String,

    /// Invocation identifier
    pub invocation_id: String,

    /// When the invocation started
    pub started_at: DateTime<Utc>,

    /// Wall-clock duration
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Whether the invocation produced a successful outcome
    pub success: bool,

    /// Error kind label when the invocation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<String>,

    /// Anonymized digest of the input parameters
    pub parameter_digest: String,

    /// Whether the invocation ran in degraded mode
    pub degraded: bool,
}

/// Digest of the input payload: first 16 hex chars of SHA-256 over its JSON
pub fn parameter_digest(input: &Value) -> String {
    let json = serde_json::to_string(input).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
