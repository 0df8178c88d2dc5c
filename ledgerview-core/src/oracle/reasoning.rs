//! Reasoning strategy
//!
//! The prompt is a constant and the collaborator is asked for zero-variance
//! sampling, so identical source yields an identical request. The response
//! contract is JSON only; anything else is rejected rather than guessed at.

use super::{
    AuthorizationModel, ConfidenceScore, Extraction, OracleError, Strategy, TemplateAuthorization,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fixed extraction prompt sent with every request
pub const EXTRACTION_PROMPT: &str = "\
You are an authorization analyzer for DAML smart contracts.
Extract, for every template in the source, its signatory parties, controller parties,
observer parties, and the controllers bound to each choice.
Respond with a single JSON object and nothing else, shaped exactly as:
{\"templates\": {\"<Template>\": {\"signatories\": [..], \"controllers\": [..], \
\"observers\": [..], \"choices\": {\"<Choice>\": [..]}}}, \"confidence\": <0.0-1.0>}
Set confidence to your own certainty that the extraction is complete and correct.";

/// External reasoning collaborator
#[async_trait]
pub trait ReasoningCollaborator: Send + Sync {
    /// Send the prompt and source; returns the raw response body
    async fn reason(&self, prompt: &str, source: &str) -> Result<String, OracleError>;

    /// Whether the collaborator is reachable
    async fn probe(&self) -> bool;
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ReasoningResponse {
    templates: BTreeMap<String, TemplateAuthorization>,
    confidence: f64,
}

/// Authorization extraction through a reasoning collaborator
#[derive(Clone)]
pub struct ReasoningStrategy {
    collaborator: Arc<dyn ReasoningCollaborator>,
    timeout: Duration,
}

impl ReasoningStrategy {
    /// Create a strategy with a hard per-call timeout
    pub fn new(collaborator: Arc<dyn ReasoningCollaborator>, timeout: Duration) -> Self {
        Self {
            collaborator,
            timeout,
        }
    }

    /// Hard timeout for one call
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check collaborator reachability
    pub async fn probe(&self) -> bool {
        self.collaborator.probe().await
    }

    /// Ask the collaborator and parse its answer strictly
    pub async fn extract(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<Extraction, OracleError> {
        self.extract_within(source, cancel, self.timeout).await
    }

    /// Like [`extract`](Self::extract), but never waits longer than `limit`
    pub async fn extract_within(
        &self,
        source: &str,
        cancel: &CancellationToken,
        limit: Duration,
    ) -> Result<Extraction, OracleError> {
        let limit = limit.min(self.timeout);
        let call = tokio::time::timeout(limit, self.collaborator.reason(EXTRACTION_PROMPT, source));

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OracleError::Cancelled),
            result = call => match result {
                Ok(body) => body?,
                Err(_) => return Err(OracleError::Timeout(limit)),
            },
        };

        let extraction = parse_response(&body)?;
        tracing::debug!(
            strategy = %Strategy::Reasoning,
            templates = extraction.model.templates.len(),
            confidence = extraction.score.value,
            "Reasoning extraction complete"
        );
        Ok(extraction)
    }
}

/// Parse a collaborator response, rejecting anything outside the contract
fn parse_response(body: &str) -> Result<Extraction, OracleError> {
    let response: ReasoningResponse = serde_json::from_str(body.trim())
        .map_err(|e| OracleError::MalformedResponse(e.to_string()))?;

    if !response.confidence.is_finite() || !(0.0..=1.0).contains(&response.confidence) {
        return Err(OracleError::MalformedResponse(format!(
            "confidence {} is outside [0, 1]",
            response.confidence
        )));
    }

    Ok(Extraction {
        model: AuthorizationModel {
            templates: response.templates,
        },
        score: ConfidenceScore::new(response.confidence, Strategy::Reasoning),
        rationale: vec![format!(
            "reasoning collaborator reported certainty {:.2}",
            response.confidence
        )],
    })
}
