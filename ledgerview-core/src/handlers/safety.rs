//! `analyze_daml_safety`: the safety gate pipeline as a tool

use crate::pipeline::SafetyPipeline;
use crate::tools::{ErrorKind, EventSink, HandlerContext, ToolHandler, ToolSchema};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

/// Tool identifier
pub const TOOL_ID: &str = "analyze_daml_safety";

/// Runs the safety gate pipeline over `input.source`
#[derive(Debug)]
pub struct AnalyzeSafetyHandler {
    pipeline: Arc<SafetyPipeline>,
}

impl AnalyzeSafetyHandler {
    /// Create a handler over a shared pipeline
    pub fn new(pipeline: Arc<SafetyPipeline>) -> Self {
        Self { pipeline }
    }

    /// Input schema
    pub fn input_schema() -> ToolSchema {
        ToolSchema::new(json!({
            "type": "object",
            "properties": {
                "source": {
                    "type": "string",
                    "minLength": 1,
                    "description": "DAML source to analyze"
                }
            },
            "required": ["source"],
            "additionalProperties": false
        }))
    }

    /// Output schema
    pub fn output_schema() -> ToolSchema {
        ToolSchema::new(json!({
            "type": "object",
            "properties": {
                "verdict": {
                    "type": "object",
                    "properties": {
                        "verdict": { "enum": ["Accepted", "Delegated", "Rejected"] }
                    },
                    "required": ["verdict"]
                },
                "gate": { "enum": ["Compile", "Pattern", "AuthExtraction", "Decision"] },
                "summary": { "type": "string" },
                "gates": { "type": "array" },
                "degraded": { "type": "boolean" }
            },
            "required": ["verdict", "gate", "summary", "gates", "degraded"]
        }))
    }
}

#[async_trait]
impl ToolHandler for AnalyzeSafetyHandler {
    async fn run(&self, input: Value, ctx: HandlerContext, events: EventSink) {
        let Some(source) = input.get("source").and_then(Value::as_str) else {
            events
                .failure(ErrorKind::Validation, "source: expected a string")
                .await;
            return;
        };

        match self.pipeline.run(source, &ctx, &events).await {
            Ok(report) => match serde_json::to_value(&report) {
                Ok(payload) => {
                    events.result(payload).await;
                }
                Err(e) => {
                    events
                        .failure(ErrorKind::Internal, format!("failed to encode report: {}", e))
                        .await;
                }
            },
            Err(e) => {
                tracing::warn!(
                    invocation_id = %ctx.invocation_id(),
                    gate = %e.gate(),
                    "Safety analysis stopped without a verdict: {}",
                    e
                );
                events.failure(e.kind(), e.to_string()).await;
            }
        }
    }
}
