//! Tool descriptors and the handler trait
//!
//! A descriptor is created once at process start and owned by the registry.
//! It pairs a handler with the schemas and pricing policy the engine enforces
//! around it.

use super::engine::HandlerContext;
use super::event::EventSink;
use crate::metering::PricingPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// JSON Schema for tool input or output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// JSON Schema document
    pub schema: Value,
}

impl ToolSchema {
    /// Create a schema from a JSON Schema value
    pub fn new(schema: Value) -> Self {
        Self { schema }
    }

    /// Schema for a tool that takes no parameters
    pub fn empty() -> Self {
        Self {
            schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }

    /// Schema that accepts any JSON value
    pub fn any() -> Self {
        Self {
            schema: serde_json::json!({}),
        }
    }
}

/// Tool handler
///
/// A handler produces a lazy, finite, non-restartable sequence of events
/// through `events`. It must end with exactly one `Result` or `Failure`; the
/// engine discards anything after the first terminal event.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the handler for one invocation
    async fn run(&self, input: Value, ctx: HandlerContext, events: EventSink);
}

/// Immutable description of a registered tool
#[derive(Clone)]
pub struct ToolDescriptor {
    /// Tool identifier (unique within a registry)
    pub id: String,

    /// Human-readable description
    pub description: String,

    /// Schema the engine validates input against
    pub input_schema: ToolSchema,

    /// Schema describing the `Result` payload
    pub output_schema: ToolSchema,

    /// How invocations are priced
    pub pricing: PricingPolicy,

    /// Handler invoked per request
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("pricing", &self.pricing)
            .finish()
    }
}

impl ToolDescriptor {
    /// Create a descriptor with an empty input schema, any output, and free pricing
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            input_schema: ToolSchema::empty(),
            output_schema: ToolSchema::any(),
            pricing: PricingPolicy::Free,
            handler,
        }
    }

    /// Set the input schema
    pub fn with_input_schema(mut self, schema: ToolSchema) -> Self {
        self.input_schema = schema;
        self
    }

    /// Set the output schema
    pub fn with_output_schema(mut self, schema: ToolSchema) -> Self {
        self.output_schema = schema;
        self
    }

    /// Set the pricing policy
    pub fn with_pricing(mut self, pricing: PricingPolicy) -> Self {
        self.pricing = pricing;
        self
    }
}

/// Tool listing entry (MCP `tools/list` shape)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSummary {
    /// Tool identifier
    pub name: String,
    /// Tool description
    pub description: String,
    /// JSON Schema for input parameters
    pub input_schema: Value,
    /// JSON Schema for the result payload
    pub output_schema: Value,
    /// Pricing policy
    pub pricing: PricingPolicy,
}

impl From<&ToolDescriptor> for ToolSummary {
    fn from(descriptor: &ToolDescriptor) -> Self {
        Self {
            name: descriptor.id.clone(),
            description: descriptor.description.clone(),
            input_schema: descriptor.input_schema.schema.clone(),
            output_schema: descriptor.output_schema.schema.clone(),
            pricing: descriptor.pricing.clone(),
        }
    }
}
