//! Confidence oracle adapter
//!
//! One operation, `extract(source) -> (AuthorizationModel, ConfidenceScore)`,
//! over two interchangeable strategies:
//!
//! - [`ReasoningStrategy`]: asks an external reasoning collaborator with a fixed
//!   prompt and zero-variance sampling. Confidence is the collaborator's own
//!   certainty.
//! - [`PatternStrategy`]: deterministic lexical scan. Scores 0.8 when no
//!   complexity marker is present and 0.5 otherwise.
//!
//! The strategy is chosen once per invocation by [`OracleAdapter::select`] and
//! carried as a [`ConfidenceOracle`] value. Extraction never switches strategy
//! internally; falling back is the caller's decision.

mod http;
mod pattern;
mod reasoning;

pub use http::HttpReasoner;
pub use pattern::{
    COMPLEX_CONFIDENCE, ComplexityMarker, MarkerHit, PatternStrategy, SIMPLE_CONFIDENCE,
};
pub use reasoning::{EXTRACTION_PROMPT, ReasoningCollaborator, ReasoningStrategy};

use crate::config::ReasoningConfig;
use crate::daml::{ClauseKind, TemplateSource};
use crate::tools::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Errors from an extraction attempt
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    /// Collaborator could not be reached
    #[error("reasoning collaborator unavailable: {0}")]
    Unavailable(String),

    /// Collaborator answered with something other than the response contract
    #[error("malformed reasoning response: {0}")]
    MalformedResponse(String),

    /// Collaborator did not answer within its hard timeout
    #[error("reasoning collaborator timed out after {0:?}")]
    Timeout(Duration),

    /// Invocation was cancelled while waiting
    #[error("extraction cancelled")]
    Cancelled,
}

impl OracleError {
    /// Error kind for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            OracleError::Unavailable(_) | OracleError::Timeout(_) => ErrorKind::OracleUnavailable,
            OracleError::MalformedResponse(_) => ErrorKind::MalformedOracleResponse,
            OracleError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether a retry (and eventually a fallback) may help
    pub fn is_retryable(&self) -> bool {
        !matches!(self, OracleError::Cancelled)
    }
}

/// Which strategy produced a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Reasoning,
    Pattern,
}

impl Strategy {
    /// Stable label
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Reasoning => "reasoning",
            Strategy::Pattern => "pattern",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence in an extraction, in `[0.0, 1.0]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    /// Score value
    pub value: f64,
    /// Strategy that produced it
    pub strategy: Strategy,
}

impl ConfidenceScore {
    /// Create a score, clamped into range
    pub fn new(value: f64, strategy: Strategy) -> Self {
        Self {
            value: value.clamp(0.0, 1.0),
            strategy,
        }
    }

    /// Whether the score reaches a threshold
    pub fn meets(&self, threshold: f64) -> bool {
        self.value >= threshold
    }
}

/// Authorization structure of one template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateAuthorization {
    /// Signatory parties
    pub signatories: BTreeSet<String>,

    /// Every party that controls some choice
    pub controllers: BTreeSet<String>,

    /// Observer parties
    #[serde(default)]
    pub observers: BTreeSet<String>,

    /// Controllers per choice
    #[serde(default)]
    pub choices: BTreeMap<String, BTreeSet<String>>,
}

/// Extracted authorization structure, keyed by template name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorizationModel {
    pub templates: BTreeMap<String, TemplateAuthorization>,
}

impl AuthorizationModel {
    /// Build a model from lexically scanned templates
    pub fn from_templates(templates: &[TemplateSource]) -> Self {
        let mut model = Self::default();

        for template in templates.iter().filter(|t| !t.name.is_empty()) {
            let entry = model.templates.entry(template.name.clone()).or_default();

            for choice in &template.choices {
                entry.choices.entry(choice.clone()).or_default();
            }

            for clause in &template.clauses {
                let parties = clause.parties();
                match clause.kind {
                    ClauseKind::Signatory => entry.signatories.extend(parties),
                    ClauseKind::Observer => entry.observers.extend(parties),
                    ClauseKind::Controller => {
                        if let Some(choice) = &clause.choice {
                            entry
                                .choices
                                .entry(choice.clone())
                                .or_default()
                                .extend(parties.iter().cloned());
                        }
                        entry.controllers.extend(parties);
                    }
                }
            }
        }

        model
    }

    /// Look up one template
    pub fn template(&self, name: &str) -> Option<&TemplateAuthorization> {
        self.templates.get(name)
    }

    /// Whether no template was extracted
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Result of one extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    /// Extracted authorization structure
    pub model: AuthorizationModel,
    /// Confidence in the structure
    pub score: ConfidenceScore,
    /// Why the strategy assigned this score
    pub rationale: Vec<String>,
}

/// Strategy selected for one invocation
#[derive(Clone)]
pub enum ConfidenceOracle {
    Reasoning(ReasoningStrategy),
    Pattern(PatternStrategy),
}

impl std::fmt::Debug for ConfidenceOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConfidenceOracle").field(&self.strategy()).finish()
    }
}

impl ConfidenceOracle {
    /// Strategy tag
    pub fn strategy(&self) -> Strategy {
        match self {
            ConfidenceOracle::Reasoning(_) => Strategy::Reasoning,
            ConfidenceOracle::Pattern(_) => Strategy::Pattern,
        }
    }

    /// Longest a single extraction may take; zero for the local pattern strategy
    pub fn attempt_timeout(&self) -> Duration {
        match self {
            ConfidenceOracle::Reasoning(strategy) => strategy.timeout(),
            ConfidenceOracle::Pattern(_) => Duration::ZERO,
        }
    }

    /// Extract the authorization model and score
    pub async fn extract(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<Extraction, OracleError> {
        self.extract_within(source, cancel, self.attempt_timeout()).await
    }

    /// Extract, bounding any external call by `limit`
    pub async fn extract_within(
        &self,
        source: &str,
        cancel: &CancellationToken,
        limit: Duration,
    ) -> Result<Extraction, OracleError> {
        match self {
            ConfidenceOracle::Reasoning(strategy) => {
                strategy.extract_within(source, cancel, limit).await
            }
            ConfidenceOracle::Pattern(strategy) => {
                if cancel.is_cancelled() {
                    return Err(OracleError::Cancelled);
                }
                Ok(strategy.extract(source))
            }
        }
    }
}

/// Chooses a strategy per invocation and counts extractions
pub struct OracleAdapter {
    reasoning: Option<ReasoningStrategy>,
    probe_timeout: Duration,
    extractions: AtomicU64,
}

impl std::fmt::Debug for OracleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleAdapter")
            .field("reasoning", &self.reasoning.is_some())
            .field("probe_timeout", &self.probe_timeout)
            .field("extractions", &self.extractions())
            .finish()
    }
}

impl OracleAdapter {
    /// Adapter that always uses the pattern strategy
    pub fn pattern_only() -> Self {
        Self {
            reasoning: None,
            probe_timeout: Duration::from_secs(2),
            extractions: AtomicU64::new(0),
        }
    }

    /// Adapter that prefers the given reasoning strategy when reachable
    pub fn with_reasoning(strategy: ReasoningStrategy, probe_timeout: Duration) -> Self {
        Self {
            reasoning: Some(strategy),
            probe_timeout,
            extractions: AtomicU64::new(0),
        }
    }

    /// Build from configuration, wiring an [`HttpReasoner`] when configured
    pub fn from_config(config: &ReasoningConfig) -> Result<Self, OracleError> {
        match (&config.endpoint, config.is_configured()) {
            (Some(endpoint), true) => {
                let reasoner = HttpReasoner::new(endpoint, &config.model, config.timeout)?;
                let strategy = ReasoningStrategy::new(Arc::new(reasoner), config.timeout);
                Ok(Self::with_reasoning(strategy, config.probe_timeout))
            }
            _ => Ok(Self::pattern_only()),
        }
    }

    /// Whether a reasoning collaborator is configured
    pub fn has_reasoning(&self) -> bool {
        self.reasoning.is_some()
    }

    /// Select the strategy for one invocation
    ///
    /// Reasoning is chosen when configured and its probe answers in time;
    /// otherwise the pattern strategy is chosen.
    pub async fn select(&self, cancel: &CancellationToken) -> ConfidenceOracle {
        let Some(reasoning) = &self.reasoning else {
            return self.fallback();
        };

        let reachable = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            probe = tokio::time::timeout(self.probe_timeout, reasoning.probe()) => {
                probe.unwrap_or(false)
            }
        };

        if reachable {
            ConfidenceOracle::Reasoning(reasoning.clone())
        } else {
            tracing::warn!(
                strategy = %Strategy::Pattern,
                "Reasoning collaborator unreachable, degrading to pattern strategy"
            );
            self.fallback()
        }
    }

    /// The pattern strategy
    pub fn fallback(&self) -> ConfidenceOracle {
        ConfidenceOracle::Pattern(PatternStrategy::new())
    }

    /// Run one extraction through the selected strategy
    pub async fn extract(
        &self,
        oracle: &ConfidenceOracle,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<Extraction, OracleError> {
        self.extract_within(oracle, source, cancel, oracle.attempt_timeout())
            .await
    }

    /// Run one extraction, bounding any external call by `limit`
    pub async fn extract_within(
        &self,
        oracle: &ConfidenceOracle,
        source: &str,
        cancel: &CancellationToken,
        limit: Duration,
    ) -> Result<Extraction, OracleError> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        oracle.extract_within(source, cancel, limit).await
    }

    /// Number of extraction attempts so far
    pub fn extractions(&self) -> u64 {
        self.extractions.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daml;
    use async_trait::async_trait;
    use serde_json::json;

    struct Offline;

    #[async_trait]
    impl ReasoningCollaborator for Offline {
        async fn reason(&self, _prompt: &str, _source: &str) -> Result<String, OracleError> {
            Err(OracleError::Unavailable("offline".to_string()))
        }

        async fn probe(&self) -> bool {
            false
        }
    }

    struct Online;

    #[async_trait]
    impl ReasoningCollaborator for Online {
        async fn reason(&self, _prompt: &str, _source: &str) -> Result<String, OracleError> {
            Ok(json!({"templates": {}, "confidence": 0.9}).to_string())
        }

        async fn probe(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_model_from_templates() {
        let source = "template Pool with admin: Party; members: [Party] where\n  signatory admin\n  observer members\n  choice Join : ()\n    with who: Party\n    controller who\n    do pure ()";
        let model = AuthorizationModel::from_templates(&daml::templates(source));

        let pool = model.template("Pool").unwrap();
        assert_eq!(pool.signatories, BTreeSet::from(["admin".to_string()]));
        assert_eq!(pool.observers, BTreeSet::from(["members".to_string()]));
        assert_eq!(pool.controllers, BTreeSet::from(["who".to_string()]));
        assert_eq!(
            pool.choices.get("Join"),
            Some(&BTreeSet::from(["who".to_string()]))
        );
    }

    #[test]
    fn test_model_wire_format_is_keyed_by_template() {
        let source = "template Limited with owner: Party where signatory owner";
        let model = AuthorizationModel::from_templates(&daml::templates(source));
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["Limited"]["signatories"], json!(["owner"]));
    }

    #[test]
    fn test_score_is_clamped() {
        assert_eq!(ConfidenceScore::new(1.7, Strategy::Reasoning).value, 1.0);
        assert!(ConfidenceScore::new(0.7, Strategy::Pattern).meets(0.7));
        assert!(!ConfidenceScore::new(0.5, Strategy::Pattern).meets(0.7));
    }

    #[tokio::test]
    async fn test_pattern_only_adapter_selects_pattern() {
        let adapter = OracleAdapter::pattern_only();
        let oracle = adapter.select(&CancellationToken::new()).await;
        assert_eq!(oracle.strategy(), Strategy::Pattern);
    }

    #[tokio::test]
    async fn test_unreachable_reasoning_selects_pattern() {
        let strategy = ReasoningStrategy::new(Arc::new(Offline), Duration::from_secs(1));
        let adapter = OracleAdapter::with_reasoning(strategy, Duration::from_millis(100));
        let oracle = adapter.select(&CancellationToken::new()).await;
        assert_eq!(oracle.strategy(), Strategy::Pattern);
    }

    #[tokio::test]
    async fn test_reachable_reasoning_is_selected() {
        let strategy = ReasoningStrategy::new(Arc::new(Online), Duration::from_secs(1));
        let adapter = OracleAdapter::with_reasoning(strategy, Duration::from_millis(100));
        let cancel = CancellationToken::new();

        let oracle = adapter.select(&cancel).await;
        assert_eq!(oracle.strategy(), Strategy::Reasoning);

        let extraction = adapter.extract(&oracle, "template T", &cancel).await.unwrap();
        assert_eq!(extraction.score.value, 0.9);
        assert_eq!(adapter.extractions(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_pattern_extraction() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = OracleAdapter::pattern_only()
            .fallback()
            .extract("template T", &cancel)
            .await;
        assert_eq!(result, Err(OracleError::Cancelled));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            OracleError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::OracleUnavailable
        );
        assert_eq!(
            OracleError::MalformedResponse("x".into()).kind(),
            ErrorKind::MalformedOracleResponse
        );
        assert!(!OracleError::Cancelled.is_retryable());
    }

    #[test]
    fn test_from_config_without_endpoint_is_pattern_only() {
        let adapter = OracleAdapter::from_config(&ReasoningConfig::default()).unwrap();
        assert!(!adapter.has_reasoning());
    }
}
