//! Metering and telemetry
//!
//! Observes engine completions out-of-band: every completed invocation yields
//! one [`PerformanceRecord`] pushed through a bounded [`MeteringSink`], and
//! every handler-produced terminal event is settled against the tool's
//! [`PricingPolicy`].

mod pricing;
mod record;
mod sink;

pub use pricing::{
    LedgerSettlement, PricingPolicy, PricingSettlement, SettlementDecision, SettlementError,
    SettlementRequest,
};
pub use record::{PerformanceRecord, parameter_digest};
pub use sink::{InMemoryCollector, MeteringCollector, MeteringSink, TracingCollector};
