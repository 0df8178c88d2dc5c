//! # Ledgerview - Authorization safety analysis for DAML smart contracts
//!
//! Ledgerview exposes a small catalog of tools behind a streaming execution
//! engine. The central tool, `analyze_daml_safety`, runs submitted source
//! through a fixed sequence of gates and either accepts it with an extracted
//! authorization model, rejects it, or delegates it to a human reviewer when
//! confidence is too low.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ledgerview_core::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = LedgerviewServer::from_config(LedgerviewConfig::load()?)?;
//!
//!     let outcome = server
//!         .engine()
//!         .call("analyze_daml_safety", json!({ "source": "template T with p : Party where signatory p" }))
//!         .await;
//!
//!     for event in &outcome.events {
//!         println!("{}", serde_json::to_string(event)?);
//!     }
//!
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Tools**: frozen registry, JSON Schema validation, streaming events,
//!   cancellation and per-invocation deadlines
//! - **Pipeline**: Compile, Pattern, AuthExtraction and Decision gates with a
//!   0.7 confidence threshold
//! - **Oracle**: reasoning collaborator when reachable, deterministic pattern
//!   scoring otherwise
//! - **Metering**: one performance record per invocation, settlement for
//!   priced tools

pub mod compiler;
pub mod config;
pub mod daml;
pub mod error;
pub mod handlers;
pub mod metering;
pub mod oracle;
pub mod pipeline;
pub mod server;
pub mod tools;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::compiler::{CompileResult, SourceCompiler, StructuralCompiler};
    pub use crate::config::{
        EngineConfig, LedgerviewConfig, LoggingConfig, MeteringConfig, PipelineConfig,
        ReasoningConfig,
    };
    pub use crate::error::{LedgerviewError, Result};
    pub use crate::handlers::{builtin_tools, build_registry};
    pub use crate::metering::{
        InMemoryCollector, LedgerSettlement, MeteringCollector, MeteringSink, PerformanceRecord,
        PricingPolicy, PricingSettlement, TracingCollector,
    };
    pub use crate::oracle::{
        AuthorizationModel, ConfidenceOracle, ConfidenceScore, OracleAdapter, OracleError,
        PatternStrategy, ReasoningCollaborator, ReasoningStrategy, Strategy,
        TemplateAuthorization,
    };
    pub use crate::pipeline::{
        CONFIDENCE_THRESHOLD, GateName, GateResult, GateVerdict, PipelineReport, PipelineVerdict,
        SafetyPipeline,
    };
    pub use crate::server::{LedgerviewServer, LedgerviewServerBuilder};
    pub use crate::tools::{
        EngineError, ErrorKind, EventSink, HandlerContext, InvocationHandle, InvocationOutcome,
        ToolDescriptor, ToolEngine, ToolEvent, ToolHandler, ToolRegistry, ToolSchema, ToolSummary,
    };
}
