//! Built-in tools
//!
//! | Tool | Pricing |
//! |------|---------|
//! | `analyze_daml_safety` | per call |
//! | `generate_canton_deployment_script` | free |
//! | `get_project_summary` | free |
//! | `check_server_status` | free |

pub mod deployment;
pub mod project;
pub mod safety;
pub mod status;

pub use deployment::{DeploymentScriptHandler, NetworkType};
pub use project::{ProjectSummary, ProjectSummaryHandler, SummaryError, summarize};
pub use safety::AnalyzeSafetyHandler;
pub use status::ServerStatusHandler;

use crate::metering::PricingPolicy;
use crate::pipeline::SafetyPipeline;
use crate::tools::{RegistryError, ToolDescriptor, ToolRegistry, ToolSchema};
use std::sync::Arc;

/// Units charged per safety analysis
pub const ANALYSIS_UNITS: u64 = 1;

/// Descriptors for every built-in tool
pub fn builtin_tools(pipeline: Arc<SafetyPipeline>) -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            safety::TOOL_ID,
            "Analyzes DAML code against the safety gates: compile, anti-pattern detection, \
             authorization extraction and a confidence-gated decision.",
            Arc::new(AnalyzeSafetyHandler::new(pipeline)),
        )
        .with_input_schema(AnalyzeSafetyHandler::input_schema())
        .with_output_schema(AnalyzeSafetyHandler::output_schema())
        .with_pricing(PricingPolicy::PerCall {
            units: ANALYSIS_UNITS,
        }),
        ToolDescriptor::new(
            deployment::TOOL_ID,
            "Generates a starter deployment script for a Canton network.",
            Arc::new(DeploymentScriptHandler),
        )
        .with_input_schema(DeploymentScriptHandler::input_schema())
        .with_output_schema(DeploymentScriptHandler::output_schema()),
        ToolDescriptor::new(
            project::TOOL_ID,
            "Reads package.json and counts files in a project path to provide a summary.",
            Arc::new(ProjectSummaryHandler),
        )
        .with_input_schema(ProjectSummaryHandler::input_schema())
        .with_output_schema(ProjectSummaryHandler::output_schema()),
        ToolDescriptor::new(
            status::TOOL_ID,
            "Reports whether the server is up.",
            Arc::new(ServerStatusHandler),
        )
        .with_input_schema(ToolSchema::empty())
        .with_output_schema(ServerStatusHandler::output_schema()),
    ]
}

/// Build the frozen registry of built-in tools
pub fn build_registry(pipeline: Arc<SafetyPipeline>) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    registry.register_all(builtin_tools(pipeline))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::StructuralCompiler;
    use crate::config::PipelineConfig;
    use crate::oracle::OracleAdapter;

    fn pipeline() -> Arc<SafetyPipeline> {
        Arc::new(SafetyPipeline::new(
            Arc::new(StructuralCompiler::new()),
            Arc::new(OracleAdapter::pattern_only()),
            PipelineConfig::default(),
        ))
    }

    #[test]
    fn test_registry_contains_every_builtin() {
        let registry = build_registry(pipeline()).unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "analyze_daml_safety",
                "check_server_status",
                "generate_canton_deployment_script",
                "get_project_summary"
            ]
        );
    }

    #[test]
    fn test_only_analysis_is_priced() {
        let registry = build_registry(pipeline()).unwrap();
        for summary in registry.list() {
            let expected = if summary.name == safety::TOOL_ID {
                PricingPolicy::PerCall { units: 1 }
            } else {
                PricingPolicy::Free
            };
            assert_eq!(summary.pricing, expected, "{}", summary.name);
        }
    }
}
