//! Error types for Ledgerview operations

use crate::tools::RegistryError;

/// Result type for Ledgerview operations
pub type Result<T> = std::result::Result<T, LedgerviewError>;

/// Error types for the Ledgerview core
#[derive(Debug, thiserror::Error)]
pub enum LedgerviewError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Tool registry misuse (duplicate registration, unknown tool)
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for LedgerviewError {
    fn from(s: String) -> Self {
        LedgerviewError::Other(s)
    }
}

impl From<&str> for LedgerviewError {
    fn from(s: &str) -> Self {
        LedgerviewError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for LedgerviewError {
    fn from(err: anyhow::Error) -> Self {
        LedgerviewError::Other(err.to_string())
    }
}
