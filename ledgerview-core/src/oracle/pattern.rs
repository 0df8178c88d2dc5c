//! Deterministic pattern strategy
//!
//! The score is binary on purpose: any construct whose authorization semantics
//! cannot be read off the syntax caps confidence below the decision threshold.

use super::{AuthorizationModel, ConfidenceScore, Extraction, Strategy};
use crate::daml;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Score for sources with no complexity marker
pub const SIMPLE_CONFIDENCE: f64 = 0.8;

/// Score for sources with at least one complexity marker
pub const COMPLEX_CONFIDENCE: f64 = 0.5;

static CONDITIONAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(if|case)\b").unwrap());

/// Lexical constructs that make authorization hard to infer syntactically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityMarker {
    /// `++`
    ListConcatenation,
    /// `::`
    ListCons,
    /// `if`/`case` inside a signatory, observer or controller clause
    ConditionalAuthorization,
}

impl ComplexityMarker {
    /// Human-readable description
    pub fn describe(&self) -> &'static str {
        match self {
            ComplexityMarker::ListConcatenation => "list-concatenation operator `++`",
            ComplexityMarker::ListCons => "list-cons operator `::`",
            ComplexityMarker::ConditionalAuthorization => {
                "conditional branch around an authorization clause"
            }
        }
    }
}

/// A marker occurrence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerHit {
    pub marker: ComplexityMarker,
    pub line: usize,
}

/// Lexical authorization extraction
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternStrategy;

impl PatternStrategy {
    /// Create a new pattern strategy
    pub fn new() -> Self {
        Self
    }

    /// Every complexity marker in the source, in line order
    ///
    /// Operators are found line by line. Conditionals are matched against
    /// whole clauses, so a branch that starts on the line after its
    /// `signatory` keyword still counts.
    pub fn markers(&self, source: &str) -> Vec<MarkerHit> {
        let stripped = daml::strip_comments(source);
        let mut hits = Vec::new();

        for (index, line) in stripped.lines().enumerate() {
            let line_no = index + 1;
            if line.contains("++") {
                hits.push(MarkerHit {
                    marker: ComplexityMarker::ListConcatenation,
                    line: line_no,
                });
            }
            if line.contains("::") {
                hits.push(MarkerHit {
                    marker: ComplexityMarker::ListCons,
                    line: line_no,
                });
            }
        }

        for template in daml::templates(&stripped) {
            for clause in &template.clauses {
                if CONDITIONAL_RE.is_match(&clause.text) {
                    hits.push(MarkerHit {
                        marker: ComplexityMarker::ConditionalAuthorization,
                        line: clause.line,
                    });
                }
            }
        }

        hits.sort_by_key(|hit| hit.line);
        hits
    }

    /// Whether the source is free of complexity markers
    pub fn is_simple(&self, source: &str) -> bool {
        self.markers(source).is_empty()
    }

    /// Extract the model and assign the binary score
    pub fn extract(&self, source: &str) -> Extraction {
        let stripped = daml::strip_comments(source);
        let model = AuthorizationModel::from_templates(&daml::templates(&stripped));
        let hits = self.markers(source);

        let (value, rationale) = if hits.is_empty() {
            (
                SIMPLE_CONFIDENCE,
                vec!["simple: no complexity markers found".to_string()],
            )
        } else {
            let rationale = hits
                .iter()
                .map(|hit| format!("complex: {} on line {}", hit.marker.describe(), hit.line))
                .collect();
            (COMPLEX_CONFIDENCE, rationale)
        };

        tracing::debug!(
            strategy = %Strategy::Pattern,
            markers = hits.len(),
            confidence = value,
            "Pattern extraction complete"
        );

        Extraction {
            model,
            score: ConfidenceScore::new(value, Strategy::Pattern),
            rationale,
        }
    }
}
