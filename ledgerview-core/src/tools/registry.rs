//! Tool registry
//!
//! The registry is built once at startup, then frozen behind an `Arc` and
//! shared with the engine. It is never mutated after construction, so
//! concurrent reads need no synchronization.
//!
//! # Example
//!
//! ```rust,ignore
//! use ledgerview_core::tools::{ToolDescriptor, ToolRegistry};
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(ToolDescriptor::new("check_server_status", "Health check", handler))?;
//! let registry = Arc::new(registry);
//!
//! let tool = registry.resolve("check_server_status")?;
//! ```

use super::descriptor::{ToolDescriptor, ToolSummary};
use super::validation::{CompiledSchema, ValidationError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Tool with this identifier already exists
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    /// Tool not found
    #[error("Tool '{0}' not found")]
    UnknownTool(String),

    /// Descriptor schema could not be compiled
    #[error("Tool '{tool}' has an invalid input schema: {message}")]
    InvalidSchema {
        /// Tool identifier
        tool: String,
        /// Compiler message
        message: String,
    },
}

/// A descriptor plus its compiled input schema
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    descriptor: Arc<ToolDescriptor>,
    input_schema: Arc<CompiledSchema>,
}

impl RegisteredTool {
    /// The immutable descriptor
    pub fn descriptor(&self) -> &Arc<ToolDescriptor> {
        &self.descriptor
    }

    /// Tool identifier
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Validate a raw payload against the input schema
    pub fn validate(&self, input: &Value) -> Result<(), Vec<ValidationError>> {
        self.input_schema.validate(input)
    }
}

/// Registry of tool descriptors keyed by identifier
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tool_count", &self.tools.len())
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor
    ///
    /// Returns an error if the identifier is already registered or the input
    /// schema does not compile.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), RegistryError> {
        if self.tools.contains_key(&descriptor.id) {
            return Err(RegistryError::DuplicateTool(descriptor.id));
        }

        let input_schema = CompiledSchema::compile(&descriptor.input_schema.schema).map_err(
            |message| RegistryError::InvalidSchema {
                tool: descriptor.id.clone(),
                message,
            },
        )?;

        tracing::debug!(tool = %descriptor.id, "Registered tool");
        self.tools.insert(
            descriptor.id.clone(),
            RegisteredTool {
                descriptor: Arc::new(descriptor),
                input_schema: Arc::new(input_schema),
            },
        );
        Ok(())
    }

    /// Register multiple descriptors at once
    ///
    /// Fails on the first duplicated identifier.
    pub fn register_all(
        &mut self,
        descriptors: impl IntoIterator<Item = ToolDescriptor>,
    ) -> Result<(), RegistryError> {
        for descriptor in descriptors {
            self.register(descriptor)?;
        }
        Ok(())
    }

    /// Resolve a tool by identifier
    pub fn resolve(&self, id: &str) -> Result<RegisteredTool, RegistryError> {
        self.tools
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTool(id.to_string()))
    }

    /// Check if a tool is registered
    pub fn contains(&self, id: &str) -> bool {
        self.tools.contains_key(id)
    }

    /// All tool identifiers, sorted
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// List all tools for MCP listing
    pub fn list(&self) -> Vec<ToolSummary> {
        self.tools
            .values()
            .map(|t| ToolSummary::from(t.descriptor.as_ref()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering::PricingPolicy;
    use crate::tools::{EventSink, HandlerContext, ToolHandler, ToolSchema};
    use async_trait::async_trait;
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl ToolHandler for Noop {
        async fn run(&self, _input: Value, _ctx: HandlerContext, events: EventSink) {
            events.result(Value::Null).await;
        }
    }

    fn descriptor(id: &str) -> ToolDescriptor {
        ToolDescriptor::new(id, "does nothing", Arc::new(Noop))
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("noop")).unwrap();

        assert!(registry.contains("noop"));
        assert_eq!(registry.resolve("noop").unwrap().id(), "noop");
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("noop")).unwrap();

        assert_eq!(
            registry.register(descriptor("noop")),
            Err(RegistryError::DuplicateTool("noop".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.resolve("missing"),
            Err(RegistryError::UnknownTool(id)) if id == "missing"
        ));
    }

    #[test]
    fn test_invalid_schema_rejected_at_registration() {
        let mut registry = ToolRegistry::new();
        let bad = descriptor("bad").with_input_schema(ToolSchema::new(json!({"type": 5})));
        assert!(matches!(
            registry.register(bad),
            Err(RegistryError::InvalidSchema { .. })
        ));
        assert!(!registry.contains("bad"));
    }

    #[test]
    fn test_list_is_sorted_and_complete() {
        let mut registry = ToolRegistry::new();
        registry
            .register_all([
                descriptor("zeta"),
                descriptor("alpha").with_pricing(PricingPolicy::PerCall { units: 3 }),
            ])
            .unwrap();

        let summaries = registry.list();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].name, "alpha");
        assert_eq!(summaries[0].pricing, PricingPolicy::PerCall { units: 3 });
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_resolved_tool_validates_input() {
        let mut registry = ToolRegistry::new();
        registry
            .register(descriptor("strict").with_input_schema(ToolSchema::new(json!({
                "type": "object",
                "properties": { "source": { "type": "string" } },
                "required": ["source"]
            }))))
            .unwrap();

        let tool = registry.resolve("strict").unwrap();
        assert!(tool.validate(&json!({"source": "x"})).is_ok());
        assert_eq!(tool.validate(&json!({})).unwrap_err()[0].field, "source");
    }
}
