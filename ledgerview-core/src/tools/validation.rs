//! Input schema compilation and payload validation
//!
//! Schemas are compiled once, when a descriptor is registered. Validation
//! collects every violation in the payload rather than stopping at the first.

use jsonschema::{Draft, Validator, error::ValidationErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Validation error for a specific field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Field path (dotted, `$` for the payload root)
    pub field: String,

    /// Error message
    pub message: String,
}

impl ValidationError {
    /// Create a new validation error
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A compiled JSON Schema
pub struct CompiledSchema {
    validator: Validator,
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema").finish_non_exhaustive()
    }
}

impl CompiledSchema {
    /// Compile a JSON Schema (draft 2020-12)
    pub fn compile(schema: &Value) -> Result<Self, String> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(schema)
            .map_err(|err| err.to_string())?;
        Ok(Self { validator })
    }

    /// Validate a payload, returning every violated field
    pub fn validate(&self, payload: &Value) -> Result<(), Vec<ValidationError>> {
        let errors: Vec<ValidationError> = self
            .validator
            .iter_errors(payload)
            .map(|error| {
                let field = match &error.kind {
                    ValidationErrorKind::Required { property } => {
                        let parent = pointer_to_field(&error.instance_path.to_string());
                        let name = property
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| property.to_string());
                        if parent == "$" {
                            name
                        } else {
                            format!("{}.{}", parent, name)
                        }
                    }
                    _ => pointer_to_field(&error.instance_path.to_string()),
                };
                ValidationError::new(field, error.to_string())
            })
            .collect();

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Convert a JSON pointer (`/a/0/b`) into a dotted field path (`a.0.b`)
fn pointer_to_field(pointer: &str) -> String {
    let trimmed = pointer.trim_start_matches('/');
    if trimmed.is_empty() {
        "$".to_string()
    } else {
        trimmed.replace('/', ".")
    }
}
