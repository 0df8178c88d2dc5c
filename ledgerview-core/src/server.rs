//! Server assembly
//!
//! Builds everything once at startup from a [`LedgerviewConfig`]: oracle
//! adapter, pipeline, frozen registry, metering task and engine. Transport
//! framing is left to the embedding binary.

use crate::compiler::{SourceCompiler, StructuralCompiler};
use crate::config::LedgerviewConfig;
use crate::error::{LedgerviewError, Result};
use crate::handlers;
use crate::metering::{
    LedgerSettlement, MeteringCollector, MeteringSink, PricingSettlement, TracingCollector,
};
use crate::oracle::OracleAdapter;
use crate::pipeline::SafetyPipeline;
use crate::tools::{ToolEngine, ToolRegistry};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Assembled server
pub struct LedgerviewServer {
    engine: ToolEngine,
    oracle: Arc<OracleAdapter>,
    metering_task: JoinHandle<()>,
}

impl std::fmt::Debug for LedgerviewServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerviewServer")
            .field("engine", &self.engine)
            .field("oracle", &self.oracle)
            .finish()
    }
}

impl LedgerviewServer {
    /// Create a new server builder
    pub fn builder(config: LedgerviewConfig) -> LedgerviewServerBuilder {
        LedgerviewServerBuilder::new(config)
    }

    /// Build a server with the default collaborators
    ///
    /// Must be called inside a Tokio runtime; the metering task is spawned here.
    pub fn from_config(config: LedgerviewConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// The execution engine
    pub fn engine(&self) -> &ToolEngine {
        &self.engine
    }

    /// The frozen registry
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.engine.registry()
    }

    /// The oracle adapter
    pub fn oracle(&self) -> &Arc<OracleAdapter> {
        &self.oracle
    }

    /// Drop the engine and wait for queued metering records to drain
    pub async fn shutdown(self) {
        let Self {
            engine,
            metering_task,
            ..
        } = self;
        drop(engine);
        if let Err(e) = metering_task.await {
            tracing::warn!("Metering task ended abnormally: {}", e);
        }
    }
}

/// Builder for [`LedgerviewServer`]
pub struct LedgerviewServerBuilder {
    config: LedgerviewConfig,
    compiler: Arc<dyn SourceCompiler>,
    oracle: Option<Arc<OracleAdapter>>,
    settlement: Arc<dyn PricingSettlement>,
    collector: Arc<dyn MeteringCollector>,
}

impl LedgerviewServerBuilder {
    /// Create a builder with the built-in collaborators
    pub fn new(config: LedgerviewConfig) -> Self {
        Self {
            config,
            compiler: Arc::new(StructuralCompiler::new()),
            oracle: None,
            settlement: Arc::new(LedgerSettlement::new()),
            collector: Arc::new(TracingCollector),
        }
    }

    /// Use an external source compiler
    pub fn compiler(mut self, compiler: Arc<dyn SourceCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Use a prebuilt oracle adapter instead of one built from configuration
    pub fn oracle(mut self, oracle: Arc<OracleAdapter>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Use a settlement backend
    pub fn settlement(mut self, settlement: Arc<dyn PricingSettlement>) -> Self {
        self.settlement = settlement;
        self
    }

    /// Use a metering collector
    pub fn collector(mut self, collector: Arc<dyn MeteringCollector>) -> Self {
        self.collector = collector;
        self
    }

    /// Validate configuration and assemble the server
    pub fn build(self) -> Result<LedgerviewServer> {
        self.config.validate()?;

        let oracle = match self.oracle {
            Some(oracle) => oracle,
            None => Arc::new(
                OracleAdapter::from_config(&self.config.reasoning)
                    .map_err(|e| LedgerviewError::Configuration(e.to_string()))?,
            ),
        };

        let pipeline = Arc::new(SafetyPipeline::new(
            self.compiler,
            Arc::clone(&oracle),
            self.config.pipeline.clone(),
        ));
        let registry = Arc::new(handlers::build_registry(pipeline)?);

        let (sink, metering_task) = MeteringSink::spawn(self.collector, &self.config.metering);
        let engine = ToolEngine::new(Arc::clone(&registry), self.config.engine.clone())
            .with_settlement(self.settlement)
            .with_metering(sink);

        tracing::info!(
            tools = registry.len(),
            reasoning = oracle.has_reasoning(),
            "Ledgerview server assembled"
        );

        Ok(LedgerviewServer {
            engine,
            oracle,
            metering_task,
        })
    }
}
