//! Tool execution engine
//!
//! The engine wraps every invocation with:
//! - Input schema validation (synchronous, reports every violated field)
//! - A supervisor task that is the single consumer of the handler's events
//! - At-most-one terminal event delivered to the caller
//! - Cancellation and deadline enforcement that do not wait on the handler
//! - Settlement once the handler finishes, metering once the invocation ends
//!
//! Handlers run on their own task. When an invocation is cancelled or times
//! out, the handler keeps running to natural completion in the background and
//! whatever it still produces is discarded.

use super::descriptor::ToolDescriptor;
use super::event::{ErrorKind, EventSink, ToolEvent};
use super::registry::{RegistryError, ToolRegistry};
use super::validation::ValidationError;
use crate::config::EngineConfig;
use crate::metering::{
    LedgerSettlement, MeteringSink, PerformanceRecord, PricingSettlement, SettlementRequest,
    parameter_digest,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Errors reported synchronously by [`ToolEngine::invoke`], before any handler runs
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Tool is not registered
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Input payload failed schema validation
    #[error("Invalid input for tool '{tool}': {}", .errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Validation {
        /// Tool identifier
        tool: String,
        /// Every violated field
        errors: Vec<ValidationError>,
    },
}

impl EngineError {
    /// Error kind for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Registry(_) => ErrorKind::UnknownTool,
            EngineError::Validation { .. } => ErrorKind::Validation,
        }
    }

    /// Render as a terminal failure event
    pub fn to_event(&self) -> ToolEvent {
        ToolEvent::failure(self.kind(), self.to_string())
    }
}

/// Side-channel flags a handler sets for the engine's completion bookkeeping
#[derive(Debug, Default)]
struct Annotations {
    degraded: AtomicBool,
    unsuccessful: Mutex<Option<String>>,
    stage: Mutex<Option<String>>,
}

/// Context handed to a handler for one invocation
#[derive(Debug, Clone)]
pub struct HandlerContext {
    invocation_id: String,
    tool_id: String,
    cancellation: CancellationToken,
    deadline: Instant,
    annotations: Arc<Annotations>,
}

impl HandlerContext {
    /// Standalone context, for running a handler outside the engine
    pub fn new(tool_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            invocation_id: uuid::Uuid::new_v4().to_string(),
            tool_id: tool_id.into(),
            cancellation: CancellationToken::new(),
            deadline: Instant::now() + timeout,
            annotations: Arc::new(Annotations::default()),
        }
    }

    /// Replace the cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Invocation identifier
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    /// Tool identifier
    pub fn tool_id(&self) -> &str {
        &self.tool_id
    }

    /// Cancellation token, cancelled on caller cancellation or deadline expiry
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Check if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Invocation deadline
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Tag the invocation as running in degraded mode
    pub fn mark_degraded(&self) {
        self.annotations.degraded.store(true, Ordering::SeqCst);
    }

    /// Whether the invocation was tagged degraded
    pub fn is_degraded(&self) -> bool {
        self.annotations.degraded.load(Ordering::SeqCst)
    }

    /// Record that a `Result` still represents an unsuccessful outcome
    pub fn mark_unsuccessful(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.annotations.unsuccessful.lock() {
            *slot = Some(reason.into());
        }
    }

    /// Reason given to [`mark_unsuccessful`](Self::mark_unsuccessful), if any
    pub fn unsuccessful_reason(&self) -> Option<String> {
        self.annotations
            .unsuccessful
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
    }

    /// Name the stage the handler is working in
    ///
    /// Failures the engine synthesizes on cancellation or timeout report the
    /// last stage entered.
    pub fn enter_stage(&self, stage: impl Into<String>) {
        if let Ok(mut slot) = self.annotations.stage.lock() {
            *slot = Some(stage.into());
        }
    }

    /// Last stage given to [`enter_stage`](Self::enter_stage), if any
    pub fn stage(&self) -> Option<String> {
        self.annotations
            .stage
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
    }
}

/// Lifecycle state of an invocation, owned by its supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InvocationState {
    Running,
    Completed,
    Cancelled,
    TimedOut,
}

/// One request against one tool
#[derive(Debug)]
struct ToolInvocation {
    id: String,
    tool_id: String,
    input_digest: String,
    cancellation: CancellationToken,
    started_at: DateTime<Utc>,
    started: Instant,
    timeout: Duration,
    state: InvocationState,
}

/// How the supervisor loop ended
enum Ending {
    Handler(ToolEvent),
    Abandoned,
    Cancelled,
    TimedOut,
}

/// Caller-side handle for a running invocation
pub struct InvocationHandle {
    id: String,
    tool_id: String,
    events: mpsc::UnboundedReceiver<ToolEvent>,
    cancellation: CancellationToken,
    supervisor: JoinHandle<()>,
}

impl std::fmt::Debug for InvocationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationHandle")
            .field("id", &self.id)
            .field("tool_id", &self.tool_id)
            .finish()
    }
}

impl InvocationHandle {
    /// Invocation identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tool identifier
    pub fn tool_id(&self) -> &str {
        &self.tool_id
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Clone of the caller's cancellation token
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Next event; `None` once the terminal event has been delivered
    pub async fn next_event(&mut self) -> Option<ToolEvent> {
        self.events.recv().await
    }

    /// Drain all events, returning once the terminal event arrives and the
    /// invocation has been settled and metered
    pub async fn collect(mut self) -> InvocationOutcome {
        let mut events = Vec::new();
        let mut terminal = None;

        while let Some(event) = self.events.recv().await {
            if event.is_terminal() {
                terminal = Some(event);
                break;
            }
            events.push(event);
        }

        if let Err(e) = (&mut self.supervisor).await {
            tracing::error!(invocation_id = %self.id, "Invocation supervisor failed: {}", e);
        }

        InvocationOutcome {
            invocation_id: self.id,
            events,
            terminal: terminal.unwrap_or_else(|| {
                ToolEvent::failure(ErrorKind::Internal, "invocation ended without a terminal event")
            }),
        }
    }
}

/// Everything a caller observed for one invocation
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    /// Invocation identifier
    pub invocation_id: String,
    /// Progress and log events, in order
    pub events: Vec<ToolEvent>,
    /// The single terminal event
    pub terminal: ToolEvent,
}

/// Tool execution engine
pub struct ToolEngine {
    registry: Arc<ToolRegistry>,
    config: EngineConfig,
    settlement: Arc<dyn PricingSettlement>,
    metering: Option<MeteringSink>,
}

impl std::fmt::Debug for ToolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEngine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("metering", &self.metering.is_some())
            .finish()
    }
}

impl ToolEngine {
    /// Create an engine over a frozen registry
    pub fn new(registry: Arc<ToolRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            settlement: Arc::new(LedgerSettlement::new()),
            metering: None,
        }
    }

    /// Use a specific settlement backend
    pub fn with_settlement(mut self, settlement: Arc<dyn PricingSettlement>) -> Self {
        self.settlement = settlement;
        self
    }

    /// Emit performance records through a metering sink
    pub fn with_metering(mut self, sink: MeteringSink) -> Self {
        self.metering = Some(sink);
        self
    }

    /// The registry this engine resolves tools from
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// The engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start an invocation with a fresh cancellation token
    pub fn invoke(&self, tool_id: &str, input: Value) -> Result<InvocationHandle, EngineError> {
        self.invoke_with_cancellation(tool_id, input, CancellationToken::new())
    }

    /// Start an invocation observing the caller's cancellation token
    ///
    /// Resolution and validation happen synchronously; on success the handler
    /// and its supervisor are spawned and the returned handle streams events.
    pub fn invoke_with_cancellation(
        &self,
        tool_id: &str,
        input: Value,
        cancellation: CancellationToken,
    ) -> Result<InvocationHandle, EngineError> {
        let tool = self.registry.resolve(tool_id)?;

        if let Err(errors) = tool.validate(&input) {
            tracing::debug!(tool = %tool_id, violations = errors.len(), "Rejected invalid input");
            return Err(EngineError::Validation {
                tool: tool_id.to_string(),
                errors,
            });
        }

        let descriptor = Arc::clone(tool.descriptor());
        let timeout = self.config.timeout_for(tool_id);
        let started = Instant::now();

        let invocation = ToolInvocation {
            id: uuid::Uuid::new_v4().to_string(),
            tool_id: tool_id.to_string(),
            input_digest: parameter_digest(&input),
            cancellation: cancellation.clone(),
            started_at: Utc::now(),
            started,
            timeout,
            state: InvocationState::Running,
        };

        let handler_ctx = HandlerContext {
            invocation_id: invocation.id.clone(),
            tool_id: invocation.tool_id.clone(),
            cancellation: cancellation.child_token(),
            deadline: started + timeout,
            annotations: Arc::new(Annotations::default()),
        };

        let (handler_tx, handler_rx) = mpsc::channel(self.config.event_buffer.max(1));
        let (caller_tx, caller_rx) = mpsc::unbounded_channel();

        tracing::debug!(
            tool = %invocation.tool_id,
            invocation_id = %invocation.id,
            timeout_ms = timeout.as_millis() as u64,
            "Invocation started"
        );

        let handler = Arc::clone(&descriptor.handler);
        let run_ctx = handler_ctx.clone();
        let handler_task = tokio::spawn(async move {
            handler.run(input, run_ctx, EventSink::new(handler_tx)).await;
        });

        let id = invocation.id.clone();
        let supervisor = tokio::spawn(supervise(
            invocation,
            descriptor,
            handler_ctx,
            handler_rx,
            handler_task,
            caller_tx,
            Arc::clone(&self.settlement),
            self.metering.clone(),
        ));

        Ok(InvocationHandle {
            id,
            tool_id: tool_id.to_string(),
            events: caller_rx,
            cancellation,
            supervisor,
        })
    }

    /// Invoke and wait for the terminal event
    ///
    /// Synchronous errors (unknown tool, invalid input) are returned as a
    /// terminal `Failure` so callers see one uniform outcome shape.
    pub async fn call(&self, tool_id: &str, input: Value) -> InvocationOutcome {
        match self.invoke(tool_id, input) {
            Ok(handle) => handle.collect().await,
            Err(error) => InvocationOutcome {
                invocation_id: uuid::Uuid::new_v4().to_string(),
                events: Vec::new(),
                terminal: error.to_event(),
            },
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn supervise(
    mut invocation: ToolInvocation,
    descriptor: Arc<ToolDescriptor>,
    handler_ctx: HandlerContext,
    mut handler_rx: mpsc::Receiver<ToolEvent>,
    handler_task: JoinHandle<()>,
    caller_tx: mpsc::UnboundedSender<ToolEvent>,
    settlement: Arc<dyn PricingSettlement>,
    metering: Option<MeteringSink>,
) {
    let deadline = tokio::time::sleep_until(invocation.started + invocation.timeout);
    tokio::pin!(deadline);

    let ending = loop {
        tokio::select! {
            biased;
            _ = invocation.cancellation.cancelled() => break Ending::Cancelled,
            _ = &mut deadline => break Ending::TimedOut,
            event = handler_rx.recv() => match event {
                Some(event) if event.is_terminal() => break Ending::Handler(event),
                Some(event) => {
                    // Caller may have dropped the handle; keep supervising anyway
                    let _ = caller_tx.send(event);
                }
                None => break Ending::Abandoned,
            },
        }
    };

    invocation.state = match ending {
        Ending::Cancelled => InvocationState::Cancelled,
        Ending::TimedOut => InvocationState::TimedOut,
        Ending::Handler(_) | Ending::Abandoned => InvocationState::Completed,
    };

    if invocation.state == InvocationState::TimedOut {
        // Ask the handler to wind down; it still runs to completion on its own
        handler_ctx.cancellation().cancel();
    }

    let handler_terminated = matches!(ending, Ending::Handler(_));
    tokio::spawn(drain_handler(
        invocation.id.clone(),
        invocation.tool_id.clone(),
        handler_rx,
        handler_task,
        handler_terminated,
    ));

    let during = handler_ctx
        .stage()
        .map(|stage| format!(" during {}", stage))
        .unwrap_or_default();
    // Handler finished on its own, with or without a terminal event
    let settle = matches!(ending, Ending::Handler(_) | Ending::Abandoned);
    let terminal = match ending {
        Ending::Handler(event) => event,
        Ending::Abandoned => ToolEvent::failure(
            ErrorKind::Internal,
            format!("handler finished without emitting a terminal event{}", during),
        ),
        Ending::Cancelled => ToolEvent::failure(
            ErrorKind::Cancelled,
            format!("invocation cancelled by caller{}", during),
        ),
        Ending::TimedOut => ToolEvent::failure(
            ErrorKind::Timeout,
            format!(
                "invocation exceeded its {:?} deadline{}",
                invocation.timeout, during
            ),
        ),
    };

    let unsuccessful = handler_ctx.unsuccessful_reason();
    let success = terminal.is_result() && unsuccessful.is_none();
    let failure_kind = terminal
        .failure_kind()
        .map(|kind| kind.as_str().to_string())
        .or(unsuccessful);

    let _ = caller_tx.send(terminal);
    drop(caller_tx);

    if settle {
        let request = SettlementRequest {
            tool_id: invocation.tool_id.clone(),
            invocation_id: invocation.id.clone(),
            policy: descriptor.pricing.clone(),
            success,
        };
        if let Err(e) = settlement.settle(&request).await {
            tracing::warn!(
                tool = %invocation.tool_id,
                invocation_id = %invocation.id,
                "Settlement failed: {}",
                e
            );
        }
    }

    let duration = invocation.started.elapsed();
    tracing::info!(
        tool = %invocation.tool_id,
        invocation_id = %invocation.id,
        state = ?invocation.state,
        success,
        degraded = handler_ctx.is_degraded(),
        duration_ms = duration.as_millis() as u64,
        "Invocation finished"
    );

    if let Some(sink) = metering {
        let record = PerformanceRecord {
            tool_id: invocation.tool_id,
            invocation_id: invocation.id,
            started_at: invocation.started_at,
            duration,
            success,
            failure_kind,
            parameter_digest: invocation.input_digest,
            degraded: handler_ctx.is_degraded(),
        };
        sink.emit(record).await;
    }
}

/// Consume whatever the handler still produces after the invocation ended
async fn drain_handler(
    invocation_id: String,
    tool_id: String,
    mut handler_rx: mpsc::Receiver<ToolEvent>,
    handler_task: JoinHandle<()>,
    mut terminated: bool,
) {
    let mut discarded = 0usize;
    while let Some(event) = handler_rx.recv().await {
        if event.is_terminal() {
            if terminated {
                tracing::warn!(
                    tool = %tool_id,
                    invocation_id = %invocation_id,
                    "Handler emitted a second terminal event; discarding"
                );
            }
            terminated = true;
        }
        discarded += 1;
    }

    if let Err(e) = handler_task.await {
        if e.is_panic() {
            tracing::error!(tool = %tool_id, invocation_id = %invocation_id, "Handler panicked");
        }
    }

    if discarded > 0 {
        tracing::debug!(
            tool = %tool_id,
            invocation_id = %invocation_id,
            discarded,
            "Discarded handler output after invocation ended"
        );
    }
}
