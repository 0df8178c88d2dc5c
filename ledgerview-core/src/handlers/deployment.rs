//! `generate_canton_deployment_script`

use crate::tools::{EventSink, HandlerContext, ToolHandler, ToolSchema};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Tool identifier
pub const TOOL_ID: &str = "generate_canton_deployment_script";

const DEV_SCRIPT: &str =
    "# DEV DEPLOYMENT\n# 1. daml build\n# 2. daml ledger upload-dar --host localhost --port 6865";

const PROD_SCRIPT: &str = "# PROD DEPLOYMENT\n# 1. Verify DCAP settings\n# 2. Check x402 payment routes\n# 3. Submit to Canton Ledger";

/// Target network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    #[default]
    Dev,
    Prod,
}

impl NetworkType {
    /// Starter script for this network
    pub fn script(&self) -> &'static str {
        match self {
            NetworkType::Dev => DEV_SCRIPT,
            NetworkType::Prod => PROD_SCRIPT,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Input {
    #[serde(default)]
    network_type: NetworkType,
}

/// Generates a starter deployment script for a Canton network
#[derive(Debug, Default)]
pub struct DeploymentScriptHandler;

impl DeploymentScriptHandler {
    /// Input schema
    pub fn input_schema() -> ToolSchema {
        ToolSchema::new(json!({
            "type": "object",
            "properties": {
                "network_type": {
                    "type": "string",
                    "enum": ["dev", "prod"],
                    "default": "dev"
                }
            },
            "additionalProperties": false
        }))
    }

    /// Output schema
    pub fn output_schema() -> ToolSchema {
        ToolSchema::new(json!({
            "type": "object",
            "properties": {
                "network_type": { "enum": ["dev", "prod"] },
                "script": { "type": "string" }
            },
            "required": ["network_type", "script"]
        }))
    }
}

#[async_trait]
impl ToolHandler for DeploymentScriptHandler {
    async fn run(&self, input: Value, _ctx: HandlerContext, events: EventSink) {
        let input: Input = serde_json::from_value(input).unwrap_or_default();
        events
            .result(json!({
                "network_type": input.network_type,
                "script": input.network_type.script(),
            }))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts() {
        assert!(NetworkType::Dev.script().contains("daml build"));
        assert!(NetworkType::Dev.script().contains("--port 6865"));
        assert!(NetworkType::Prod.script().starts_with("# PROD DEPLOYMENT"));
    }

    #[test]
    fn test_network_defaults_to_dev() {
        let input: Input = serde_json::from_value(json!({})).unwrap();
        assert_eq!(input.network_type, NetworkType::Dev);
    }
}
