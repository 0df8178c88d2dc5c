//! Reasoning collaborator over HTTP

use super::OracleError;
use super::reasoning::ReasoningCollaborator;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Reasoning collaborator reached with a JSON POST
///
/// Request body: `{model, prompt, source, temperature: 0, seed: 0}`. The
/// response body is returned as-is for strict parsing by the strategy.
pub struct HttpReasoner {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl std::fmt::Debug for HttpReasoner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpReasoner")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Serialize)]
struct ReasonRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    source: &'a str,
    temperature: f32,
    seed: u64,
}

impl HttpReasoner {
    /// Create a reasoner for an endpoint
    ///
    /// `timeout` bounds every request at the HTTP client level as well.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
        })
    }

    /// Endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Model name
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ReasoningCollaborator for HttpReasoner {
    async fn reason(&self, prompt: &str, source: &str) -> Result<String, OracleError> {
        let request = ReasonRequest {
            model: &self.model,
            prompt,
            source,
            temperature: 0.0,
            seed: 0,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Unavailable(format!("request to {} timed out", self.endpoint))
                } else {
                    OracleError::Unavailable(format!(
                        "failed to send request to {}: {}",
                        self.endpoint, e
                    ))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(OracleError::Unavailable(format!(
                "reasoning API error ({}): {}",
                status, text
            )));
        }

        response
            .text()
            .await
            .map_err(|e| OracleError::Unavailable(format!("failed to read response: {}", e)))
    }

    async fn probe(&self) -> bool {
        match self.client.get(&self.endpoint).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                tracing::debug!(endpoint = %self.endpoint, "Reasoning probe failed: {}", e);
                false
            }
        }
    }
}
