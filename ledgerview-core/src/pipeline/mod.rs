//! Safety gate pipeline
//!
//! A sequential state machine over four gates:
//!
//! ```text
//! Compile ──fail──▶ Rejected
//!    │pass
//!    ▼
//! Pattern (advisory findings carried forward as warnings)
//!    │
//!    ▼
//! AuthExtraction (reasoning, one retry, then pattern fallback)
//!    │
//!    ▼
//! Decision ──score ≥ 0.7──▶ Accepted
//!          └─score < 0.7──▶ Delegated
//! ```
//!
//! Gates never overlap within an invocation. Cancellation is observed at the
//! compile call and the reasoning call.

pub mod detectors;
mod machine;

pub use detectors::{Detector, Finding};
pub use machine::{PipelineError, SafetyPipeline};

use crate::oracle::{AuthorizationModel, ConfidenceScore, Strategy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum confidence for an automated `Accepted` verdict
pub const CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Gate identifiers, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateName {
    Compile,
    Pattern,
    AuthExtraction,
    Decision,
}

impl GateName {
    /// All gates in execution order
    pub const ALL: [GateName; 4] = [
        GateName::Compile,
        GateName::Pattern,
        GateName::AuthExtraction,
        GateName::Decision,
    ];

    /// Stable label
    pub fn as_str(&self) -> &'static str {
        match self {
            GateName::Compile => "Compile",
            GateName::Pattern => "Pattern",
            GateName::AuthExtraction => "AuthExtraction",
            GateName::Decision => "Decision",
        }
    }

    /// 1-based position, used for progress events
    pub fn step(&self) -> u32 {
        match self {
            GateName::Compile => 1,
            GateName::Pattern => 2,
            GateName::AuthExtraction => 3,
            GateName::Decision => 4,
        }
    }
}

impl std::fmt::Display for GateName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-gate verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateVerdict {
    Pass,
    Fail,
    Inconclusive,
}

impl GateVerdict {
    /// Stable label
    pub fn as_str(&self) -> &'static str {
        match self {
            GateVerdict::Pass => "pass",
            GateVerdict::Fail => "fail",
            GateVerdict::Inconclusive => "inconclusive",
        }
    }
}

/// Output of one gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    /// Gate that produced this result
    pub gate: GateName,
    /// Verdict
    pub verdict: GateVerdict,
    /// Short outcome shown in the trace, e.g. `pass` or `simple/0.8`
    pub outcome: String,
    /// Diagnostic messages
    pub messages: Vec<String>,
    /// Time spent in the gate
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl GateResult {
    /// Trace label, `Gate:outcome`
    pub fn label(&self) -> String {
        format!("{}:{}", self.gate, self.outcome)
    }
}

/// Final pipeline outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict")]
pub enum PipelineVerdict {
    /// Confidence met the threshold
    Accepted {
        /// Extracted authorization structure
        model: AuthorizationModel,
        /// Score that met the threshold
        confidence: ConfidenceScore,
        /// Non-blocking pattern-gate findings
        warnings: Vec<Finding>,
    },

    /// Confidence fell short; an alternate review path is required
    Delegated {
        /// Score that fell short
        confidence: ConfidenceScore,
        /// What the caller must do next
        instruction: String,
        /// Why confidence is low
        reasons: Vec<String>,
        /// Non-blocking pattern-gate findings
        warnings: Vec<Finding>,
    },

    /// An earlier gate failed
    Rejected {
        /// Gate that failed
        gate: GateName,
        /// Diagnostics, verbatim
        diagnostics: Vec<String>,
    },
}

impl PipelineVerdict {
    /// Stable label
    pub fn label(&self) -> &'static str {
        match self {
            PipelineVerdict::Accepted { .. } => "Accepted",
            PipelineVerdict::Delegated { .. } => "Delegated",
            PipelineVerdict::Rejected { .. } => "Rejected",
        }
    }

    /// Score behind the verdict, when one was computed
    pub fn confidence(&self) -> Option<&ConfidenceScore> {
        match self {
            PipelineVerdict::Accepted { confidence, .. }
            | PipelineVerdict::Delegated { confidence, .. } => Some(confidence),
            PipelineVerdict::Rejected { .. } => None,
        }
    }

    /// Whether the verdict is `Accepted`
    pub fn is_accepted(&self) -> bool {
        matches!(self, PipelineVerdict::Accepted { .. })
    }

    /// Whether the verdict is `Delegated`
    pub fn is_delegated(&self) -> bool {
        matches!(self, PipelineVerdict::Delegated { .. })
    }

    /// Whether the verdict is `Rejected`
    pub fn is_rejected(&self) -> bool {
        matches!(self, PipelineVerdict::Rejected { .. })
    }
}

/// Everything one pipeline run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Final verdict
    pub verdict: PipelineVerdict,
    /// Gate responsible for the verdict
    pub gate: GateName,
    /// Human-readable explanation naming the gate and the reason
    pub summary: String,
    /// Per-gate results in execution order
    pub gates: Vec<GateResult>,
    /// Whether the pattern strategy produced the score
    pub degraded: bool,
}

impl PipelineReport {
    /// Trace labels in execution order
    pub fn trace(&self) -> Vec<String> {
        self.gates.iter().map(GateResult::label).collect()
    }

    /// Strategy behind the score, when one was computed
    pub fn strategy(&self) -> Option<Strategy> {
        self.verdict.confidence().map(|c| c.strategy)
    }
}
