//! Tool registry and execution engine
//!
//! Tools are registered once at startup into a [`ToolRegistry`], which is then
//! frozen and shared with the [`ToolEngine`]. Every invocation goes through the
//! engine, which:
//! - Validates input against the tool's JSON Schema before the handler runs
//! - Streams `Progress`/`Log` events to the caller in emission order
//! - Delivers exactly one terminal `Result` or `Failure`
//! - Enforces caller cancellation and a per-tool deadline
//! - Settles pricing and emits a performance record on completion
//!
//! # Example
//!
//! ```rust,no_run
//! use ledgerview_core::config::EngineConfig;
//! use ledgerview_core::tools::{ToolEngine, ToolRegistry};
//! use std::sync::Arc;
//!
//! # async fn run(registry: ToolRegistry) {
//! let engine = ToolEngine::new(Arc::new(registry), EngineConfig::default());
//! let outcome = engine.call("check_server_status", serde_json::json!({})).await;
//! println!("{:?}", outcome.terminal);
//! # }
//! ```

mod descriptor;
mod engine;
mod event;
mod registry;
mod validation;

pub use descriptor::{ToolDescriptor, ToolHandler, ToolSchema, ToolSummary};
pub use engine::{EngineError, HandlerContext, InvocationHandle, InvocationOutcome, ToolEngine};
pub use event::{ErrorKind, EventSink, LogLevel, ToolEvent};
pub use registry::{RegisteredTool, RegistryError, ToolRegistry};
pub use validation::{CompiledSchema, ValidationError};

#[cfg(test)]
mod tests;
