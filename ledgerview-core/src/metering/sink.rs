//! Metering sink and collectors
//!
//! Emission is fire-and-forget through a bounded queue drained by a single
//! collector task. When the queue is full, finalization blocks for at most
//! `backpressure_delay`, then the record is dropped with a warning.

use super::record::PerformanceRecord;
use crate::config::MeteringConfig;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::task::JoinHandle;

/// External consumer of performance records
#[async_trait]
pub trait MeteringCollector: Send + Sync {
    /// Accept one record
    async fn collect(&self, record: PerformanceRecord);
}

/// Collector that writes each record to the log
#[derive(Debug, Default)]
pub struct TracingCollector;

#[async_trait]
impl MeteringCollector for TracingCollector {
    async fn collect(&self, record: PerformanceRecord) {
        tracing::info!(
            tool = %record.tool_id,
            invocation_id = %record.invocation_id,
            duration_ms = record.duration.as_millis() as u64,
            success = record.success,
            degraded = record.degraded,
            failure_kind = record.failure_kind.as_deref().unwrap_or("-"),
            digest = %record.parameter_digest,
            "Invocation metered"
        );
    }
}

/// Collector that keeps records in memory
#[derive(Debug, Default)]
pub struct InMemoryCollector {
    records: Mutex<Vec<PerformanceRecord>>,
}

impl InMemoryCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of collected records
    pub async fn records(&self) -> Vec<PerformanceRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl MeteringCollector for InMemoryCollector {
    async fn collect(&self, record: PerformanceRecord) {
        self.records.lock().await.push(record);
    }
}

/// Producer side of the metering queue
#[derive(Debug, Clone)]
pub struct MeteringSink {
    tx: mpsc::Sender<PerformanceRecord>,
    backpressure_delay: Duration,
    dropped: Arc<AtomicU64>,
}

impl MeteringSink {
    /// Spawn the collector task and return the sink feeding it
    ///
    /// The task ends once every clone of the sink has been dropped.
    pub fn spawn(
        collector: Arc<dyn MeteringCollector>,
        config: &MeteringConfig,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<PerformanceRecord>(config.queue_capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                collector.collect(record).await;
            }
            tracing::debug!("Metering queue closed");
        });

        let sink = Self {
            tx,
            backpressure_delay: config.backpressure_delay,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, handle)
    }

    /// Emit a record, blocking at most `backpressure_delay` on a full queue
    ///
    /// Returns false if the record was dropped.
    pub async fn emit(&self, record: PerformanceRecord) -> bool {
        match self.tx.send_timeout(record, self.backpressure_delay).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(record)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    tool = %record.tool_id,
                    invocation_id = %record.invocation_id,
                    delay_ms = self.backpressure_delay.as_millis() as u64,
                    "Metering queue full, dropping performance record"
                );
                false
            }
            Err(SendTimeoutError::Closed(record)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    tool = %record.tool_id,
                    invocation_id = %record.invocation_id,
                    "Metering collector stopped, dropping performance record"
                );
                false
            }
        }
    }

    /// Number of records dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
