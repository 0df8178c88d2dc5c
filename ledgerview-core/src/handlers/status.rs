//! `check_server_status`

use crate::tools::{EventSink, HandlerContext, ToolHandler, ToolSchema};
use async_trait::async_trait;
use serde_json::{Value, json};

/// Tool identifier
pub const TOOL_ID: &str = "check_server_status";

/// Liveness check
#[derive(Debug, Default)]
pub struct ServerStatusHandler;

impl ServerStatusHandler {
    /// Output schema
    pub fn output_schema() -> ToolSchema {
        ToolSchema::new(json!({
            "type": "object",
            "properties": {
                "status": { "const": "ok" },
                "message": { "type": "string" },
                "version": { "type": "string" }
            },
            "required": ["status", "message"]
        }))
    }
}

#[async_trait]
impl ToolHandler for ServerStatusHandler {
    async fn run(&self, _input: Value, _ctx: HandlerContext, events: EventSink) {
        events
            .result(json!({
                "status": "ok",
                "message": "Server is running and healthy!",
                "version": crate::VERSION,
            }))
            .await;
    }
}
