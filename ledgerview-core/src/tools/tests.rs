//! Integration tests for the tools module

use super::*;
use crate::config::{EngineConfig, MeteringConfig};
use crate::metering::{
    InMemoryCollector, MeteringSink, PricingPolicy, PricingSettlement, SettlementDecision,
    SettlementError, SettlementRequest,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Emits a fixed list of events, in order
struct Scripted {
    events: Vec<ToolEvent>,
}

#[async_trait]
impl ToolHandler for Scripted {
    async fn run(&self, _input: Value, _ctx: HandlerContext, events: EventSink) {
        for event in &self.events {
            events.emit(event.clone()).await;
        }
    }
}

/// Reports progress, then waits for a long time unless cancelled
struct Sleeper {
    observed_cancel: Arc<AtomicBool>,
}

#[async_trait]
impl ToolHandler for Sleeper {
    async fn run(&self, _input: Value, ctx: HandlerContext, events: EventSink) {
        events.progress(1, 2, "started").await;
        tokio::select! {
            _ = ctx.cancellation().cancelled() => {
                self.observed_cancel.store(true, Ordering::SeqCst);
                events.failure(ErrorKind::Cancelled, "stopped early").await;
            }
            _ = tokio::time::sleep(Duration::from_secs(60)) => {
                events.result(json!("finished")).await;
            }
        }
    }
}

struct Panicker;

#[async_trait]
impl ToolHandler for Panicker {
    async fn run(&self, _input: Value, _ctx: HandlerContext, events: EventSink) {
        events.log(LogLevel::Info, "about to fail").await;
        panic!("handler defect");
    }
}

/// Returns a result the handler itself considers unsuccessful
struct Rejecting;

#[async_trait]
impl ToolHandler for Rejecting {
    async fn run(&self, _input: Value, ctx: HandlerContext, events: EventSink) {
        ctx.mark_degraded();
        ctx.mark_unsuccessful("rejected");
        events.result(json!({"verdict": "rejected"})).await;
    }
}

/// Names a stage, then stalls in it
struct Stalled;

#[async_trait]
impl ToolHandler for Stalled {
    async fn run(&self, _input: Value, ctx: HandlerContext, events: EventSink) {
        ctx.enter_stage("the Resolve step");
        events.progress(1, 2, "resolving").await;
        ctx.cancellation().cancelled().await;
    }
}

/// Records every settlement request
#[derive(Default)]
struct RecordingSettlement {
    requests: Mutex<Vec<SettlementRequest>>,
}

#[async_trait]
impl PricingSettlement for RecordingSettlement {
    async fn settle(
        &self,
        request: &SettlementRequest,
    ) -> Result<SettlementDecision, SettlementError> {
        self.requests.lock().await.push(request.clone());
        Ok(SettlementDecision::NoCharge)
    }
}

/// Settlement backend that is always down
#[derive(Default)]
struct BrokenSettlement {
    calls: AtomicUsize,
}

#[async_trait]
impl PricingSettlement for BrokenSettlement {
    async fn settle(
        &self,
        _request: &SettlementRequest,
    ) -> Result<SettlementDecision, SettlementError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SettlementError::Unavailable("connection refused".to_string()))
    }
}

fn progress(current: u32, message: &str) -> ToolEvent {
    ToolEvent::Progress {
        current,
        total: 3,
        message: message.to_string(),
    }
}

fn registry_with(descriptors: Vec<ToolDescriptor>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register_all(descriptors).unwrap();
    Arc::new(registry)
}

fn scripted(id: &str, events: Vec<ToolEvent>) -> ToolDescriptor {
    ToolDescriptor::new(id, "scripted events", Arc::new(Scripted { events }))
        .with_pricing(PricingPolicy::PerCall { units: 1 })
}

async fn wait_for_records(collector: &InMemoryCollector, count: usize) -> Vec<crate::metering::PerformanceRecord> {
    for _ in 0..200 {
        let records = collector.records().await;
        if records.len() >= count {
            return records;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    collector.records().await
}

#[tokio::test]
async fn test_events_arrive_in_emission_order() {
    let registry = registry_with(vec![scripted(
        "ordered",
        vec![
            progress(1, "one"),
            ToolEvent::Log {
                level: LogLevel::Info,
                message: "between".to_string(),
            },
            progress(2, "two"),
            ToolEvent::Result {
                payload: json!({"ok": true}),
            },
        ],
    )]);
    let engine = ToolEngine::new(registry, EngineConfig::default());

    let outcome = engine.invoke("ordered", json!({})).unwrap().collect().await;

    assert_eq!(outcome.events.len(), 3);
    assert_eq!(outcome.events[0], progress(1, "one"));
    assert!(matches!(&outcome.events[1], ToolEvent::Log { message, .. } if message == "between"));
    assert_eq!(outcome.events[2], progress(2, "two"));
    assert_eq!(outcome.terminal.payload(), Some(&json!({"ok": true})));
}

#[tokio::test]
async fn test_only_first_terminal_event_is_delivered() {
    let settlement = Arc::new(RecordingSettlement::default());
    let registry = registry_with(vec![scripted(
        "chatty",
        vec![
            ToolEvent::Result { payload: json!(1) },
            progress(2, "late"),
            ToolEvent::Result { payload: json!(2) },
        ],
    )]);
    let engine =
        ToolEngine::new(registry, EngineConfig::default()).with_settlement(settlement.clone());

    let outcome = engine.invoke("chatty", json!({})).unwrap().collect().await;
    assert!(outcome.events.is_empty());
    assert_eq!(outcome.terminal, ToolEvent::Result { payload: json!(1) });

    let requests = settlement.requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert!(requests[0].success);
}

#[tokio::test]
async fn test_cancellation_yields_single_cancelled_failure() {
    let observed = Arc::new(AtomicBool::new(false));
    let settlement = Arc::new(RecordingSettlement::default());
    let registry = registry_with(vec![ToolDescriptor::new(
        "slow",
        "sleeps",
        Arc::new(Sleeper {
            observed_cancel: observed.clone(),
        }),
    )]);
    let engine =
        ToolEngine::new(registry, EngineConfig::default()).with_settlement(settlement.clone());

    let mut handle = engine.invoke("slow", json!({})).unwrap();
    assert!(matches!(handle.next_event().await, Some(ToolEvent::Progress { .. })));

    handle.cancel();
    let outcome = handle.collect().await;

    assert_eq!(outcome.terminal.failure_kind(), Some(ErrorKind::Cancelled));
    assert!(outcome.events.iter().all(|e| !e.is_terminal()));

    // Handler sees the propagated cancellation, but its own failure is discarded
    for _ in 0..100 {
        if observed.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(observed.load(Ordering::SeqCst));
    assert!(settlement.requests.lock().await.is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let registry = registry_with(vec![scripted(
        "instant",
        vec![ToolEvent::Result { payload: json!(1) }],
    )]);
    let engine = ToolEngine::new(registry, EngineConfig::default());

    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    let outcome = engine
        .invoke_with_cancellation("instant", json!({}), token)
        .unwrap()
        .collect()
        .await;

    assert_eq!(outcome.terminal.failure_kind(), Some(ErrorKind::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_expiry_yields_timeout() {
    let observed = Arc::new(AtomicBool::new(false));
    let settlement = Arc::new(RecordingSettlement::default());
    let registry = registry_with(vec![ToolDescriptor::new(
        "slow",
        "sleeps",
        Arc::new(Sleeper {
            observed_cancel: observed.clone(),
        }),
    )]);
    let config = EngineConfig::default()
        .with_timeout(Duration::from_secs(30))
        .with_tool_timeout("slow", Duration::from_secs(1));
    let engine = ToolEngine::new(registry, config).with_settlement(settlement.clone());

    let outcome = engine.call("slow", json!({})).await;

    assert_eq!(outcome.terminal.failure_kind(), Some(ErrorKind::Timeout));
    assert_eq!(outcome.events.len(), 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(observed.load(Ordering::SeqCst));
    assert!(settlement.requests.lock().await.is_empty());
}

#[tokio::test]
async fn test_panicking_handler_reports_internal_failure() {
    let registry = registry_with(vec![ToolDescriptor::new(
        "boom",
        "panics",
        Arc::new(Panicker),
    )]);
    let engine = ToolEngine::new(registry, EngineConfig::default());

    let outcome = engine.call("boom", json!({})).await;

    assert_eq!(outcome.terminal.failure_kind(), Some(ErrorKind::Internal));
    assert_eq!(outcome.events.len(), 1);
}

#[tokio::test]
async fn test_handler_without_terminal_is_settled_without_charge() {
    let settlement = Arc::new(RecordingSettlement::default());
    let registry = registry_with(vec![scripted("silent", vec![progress(1, "working")])]);
    let engine =
        ToolEngine::new(registry, EngineConfig::default()).with_settlement(settlement.clone());

    let outcome = engine.call("silent", json!({})).await;

    assert_eq!(outcome.terminal.failure_kind(), Some(ErrorKind::Internal));
    let requests = settlement.requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].tool_id, "silent");
    assert_eq!(requests[0].policy, PricingPolicy::PerCall { units: 1 });
    assert!(!requests[0].success);
}

#[tokio::test(start_paused = true)]
async fn test_synthetic_failures_name_the_active_stage() {
    let registry = registry_with(vec![ToolDescriptor::new(
        "staged",
        "stalls",
        Arc::new(Stalled),
    )]);
    let config = EngineConfig::default().with_tool_timeout("staged", Duration::from_secs(2));
    let engine = ToolEngine::new(registry, config);

    let outcome = engine.call("staged", json!({})).await;
    match &outcome.terminal {
        ToolEvent::Failure { kind, detail } => {
            assert_eq!(*kind, ErrorKind::Timeout);
            assert_eq!(detail, "invocation exceeded its 2s deadline during the Resolve step");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    let mut handle = engine.invoke("staged", json!({})).unwrap();
    assert!(matches!(handle.next_event().await, Some(ToolEvent::Progress { .. })));
    handle.cancel();
    match handle.next_event().await {
        Some(ToolEvent::Failure { kind, detail }) => {
            assert_eq!(kind, ErrorKind::Cancelled);
            assert!(detail.ends_with("during the Resolve step"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_validation_reports_every_field() {
    let registry = registry_with(vec![
        scripted("strict", vec![ToolEvent::Result { payload: json!(1) }]).with_input_schema(
            ToolSchema::new(json!({
                "type": "object",
                "properties": {
                    "source": { "type": "string" },
                    "network_type": { "type": "string", "enum": ["dev", "prod"] }
                },
                "required": ["source"]
            })),
        ),
    ]);
    let engine = ToolEngine::new(registry, EngineConfig::default());

    let err = engine
        .invoke("strict", json!({"network_type": "staging"}))
        .unwrap_err();

    match &err {
        EngineError::Validation { tool, errors } => {
            assert_eq!(tool, "strict");
            let mut fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
            fields.sort();
            assert_eq!(fields, vec!["network_type", "source"]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_unknown_tool_is_rejected_synchronously() {
    let engine = ToolEngine::new(registry_with(vec![]), EngineConfig::default());

    let err = engine.invoke("missing", json!({})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownTool);

    let outcome = engine.call("missing", json!({})).await;
    assert_eq!(outcome.terminal.failure_kind(), Some(ErrorKind::UnknownTool));
    assert!(outcome.events.is_empty());
}

#[tokio::test]
async fn test_settlement_failure_does_not_change_result() {
    let settlement = Arc::new(BrokenSettlement::default());
    let registry = registry_with(vec![scripted(
        "paid",
        vec![ToolEvent::Result { payload: json!("done") }],
    )]);
    let engine =
        ToolEngine::new(registry, EngineConfig::default()).with_settlement(settlement.clone());

    let outcome = engine.call("paid", json!({})).await;

    assert_eq!(outcome.terminal.payload(), Some(&json!("done")));
    assert_eq!(settlement.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_completion_emits_performance_record() {
    let collector = Arc::new(InMemoryCollector::new());
    let (sink, _task) = MeteringSink::spawn(collector.clone(), &MeteringConfig::default());
    let registry = registry_with(vec![
        scripted("metered", vec![ToolEvent::Result { payload: json!(1) }]).with_input_schema(
            ToolSchema::new(json!({
                "type": "object",
                "properties": { "source": { "type": "string" } }
            })),
        ),
    ]);
    let engine = ToolEngine::new(registry, EngineConfig::default()).with_metering(sink);

    let outcome = engine.call("metered", json!({"source": "x"})).await;
    let records = wait_for_records(&collector, 1).await;

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.tool_id, "metered");
    assert_eq!(record.invocation_id, outcome.invocation_id);
    assert!(record.success);
    assert!(!record.degraded);
    assert_eq!(record.failure_kind, None);
    assert_eq!(
        record.parameter_digest,
        crate::metering::parameter_digest(&json!({"source": "x"}))
    );
}

#[tokio::test]
async fn test_unsuccessful_result_is_metered_and_settled_as_failure() {
    let collector = Arc::new(InMemoryCollector::new());
    let (sink, _task) = MeteringSink::spawn(collector.clone(), &MeteringConfig::default());
    let settlement = Arc::new(RecordingSettlement::default());
    let registry = registry_with(vec![ToolDescriptor::new(
        "gate",
        "rejects",
        Arc::new(Rejecting),
    )]);
    let engine = ToolEngine::new(registry, EngineConfig::default())
        .with_settlement(settlement.clone())
        .with_metering(sink);

    let outcome = engine.call("gate", json!({})).await;
    assert!(outcome.terminal.is_result());

    let records = wait_for_records(&collector, 1).await;
    assert!(!records[0].success);
    assert!(records[0].degraded);
    assert_eq!(records[0].failure_kind.as_deref(), Some("rejected"));
    assert!(!settlement.requests.lock().await[0].success);
}

#[tokio::test]
async fn test_concurrent_invocations_are_independent() {
    let registry = registry_with(vec![scripted(
        "echo",
        vec![ToolEvent::Result { payload: json!("hi") }],
    )]);
    let engine = Arc::new(ToolEngine::new(registry, EngineConfig::default()));

    let a = engine.invoke("echo", json!({})).unwrap();
    let b = engine.invoke("echo", json!({})).unwrap();
    assert_ne!(a.id(), b.id());

    let (a, b) = tokio::join!(a.collect(), b.collect());
    assert!(a.terminal.is_result());
    assert!(b.terminal.is_result());
}
