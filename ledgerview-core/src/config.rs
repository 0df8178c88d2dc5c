//! Configuration types for the Ledgerview core

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{LedgerviewError, Result};

/// Main configuration for the analysis server
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LedgerviewConfig {
    /// Tool execution engine configuration
    pub engine: EngineConfig,

    /// Reasoning collaborator configuration
    pub reasoning: ReasoningConfig,

    /// Safety gate pipeline configuration
    pub pipeline: PipelineConfig,

    /// Metering sink configuration
    pub metering: MeteringConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Humantime encoding for a map of durations
mod duration_map {
    use humantime_serde::Serde;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        map: &HashMap<String, Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        map.iter()
            .map(|(tool, timeout)| (tool, Serde::from(*timeout)))
            .collect::<HashMap<_, _>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<String, Duration>, D::Error> {
        let raw = HashMap::<String, Serde<Duration>>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .map(|(tool, timeout)| (tool, timeout.into_inner()))
            .collect())
    }
}

/// Tool execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline applied to every invocation unless overridden per tool
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Per-tool deadline overrides
    #[serde(default, with = "duration_map")]
    pub tool_timeouts: HashMap<String, Duration>,

    /// Capacity of the handler-to-engine event channel
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            tool_timeouts: HashMap::new(),
            event_buffer: 32,
        }
    }
}

impl EngineConfig {
    /// Set the default deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Add a tool-specific deadline
    pub fn with_tool_timeout(mut self, tool: impl Into<String>, timeout: Duration) -> Self {
        self.tool_timeouts.insert(tool.into(), timeout);
        self
    }

    /// Deadline for a specific tool
    pub fn timeout_for(&self, tool: &str) -> Duration {
        self.tool_timeouts
            .get(tool)
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

/// Reasoning collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    /// Whether the reasoning strategy may be selected at all
    pub enabled: bool,

    /// HTTP endpoint of the reasoning collaborator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Model identifier forwarded to the collaborator
    pub model: String,

    /// Hard timeout for a single reasoning call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Timeout for the reachability probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            model: "ledgerview-auth-extractor".to_string(),
            timeout: Duration::from_secs(20),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

impl ReasoningConfig {
    /// Whether a collaborator is configured (enabled and has an endpoint)
    pub fn is_configured(&self) -> bool {
        self.enabled && self.endpoint.is_some()
    }
}

/// Safety gate pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Delay before the single retry of a recoverable gate
    #[serde(with = "humantime_serde")]
    pub retry_initial_delay: Duration,

    /// Multiplier applied per attempt
    pub backoff_multiplier: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry_initial_delay: Duration::from_millis(250),
            backoff_multiplier: 2.0,
        }
    }
}

/// Metering sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeteringConfig {
    /// Bounded queue capacity between invocations and the collector
    pub queue_capacity: usize,

    /// How long finalization may block on a full queue before dropping
    #[serde(with = "humantime_serde")]
    pub backpressure_delay: Duration,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            backpressure_delay: Duration::from_millis(50),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,ledgerview_core=info".to_string(),
        }
    }
}

impl LedgerviewConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (ledgerview.toml, then the path in LEDGERVIEW_CONFIG_PATH)
    /// 3. Environment variable overrides (`LEDGERVIEW_ENGINE__DEFAULT_TIMEOUT=10s`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid or the result fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(LedgerviewConfig::default()))
            .merge(Toml::file("ledgerview.toml"));

        if let Ok(path) = std::env::var("LEDGERVIEW_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: LedgerviewConfig = figment
            .merge(Env::prefixed("LEDGERVIEW_").split("__"))
            .extract()
            .map_err(|e| {
                LedgerviewError::Configuration(format!("Failed to load configuration: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: LedgerviewConfig =
            Figment::from(Serialized::defaults(LedgerviewConfig::default()))
                .merge(Toml::file(path.as_ref()))
                .extract()
                .map_err(|e| {
                    LedgerviewError::Configuration(format!(
                        "Failed to load configuration file: {}",
                        e
                    ))
                })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.reasoning.timeout >= self.engine.default_timeout {
            return Err(LedgerviewError::Configuration(format!(
                "reasoning.timeout ({:?}) must be shorter than engine.default_timeout ({:?})",
                self.reasoning.timeout, self.engine.default_timeout
            )));
        }
        if self.reasoning.enabled && self.reasoning.endpoint.is_none() {
            return Err(LedgerviewError::Configuration(
                "reasoning.enabled requires reasoning.endpoint".to_string(),
            ));
        }
        if self.metering.queue_capacity == 0 {
            return Err(LedgerviewError::Configuration(
                "metering.queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.engine.event_buffer == 0 {
            return Err(LedgerviewError::Configuration(
                "engine.event_buffer must be greater than zero".to_string(),
            ));
        }
        if self.pipeline.backoff_multiplier < 1.0 {
            return Err(LedgerviewError::Configuration(
                "pipeline.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}
