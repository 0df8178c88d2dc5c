//! Pricing policies and the settlement hook
//!
//! The engine calls settlement exactly once for every invocation whose
//! handler finished on its own. A handler that returns without a terminal
//! event is settled as unsuccessful, so it is never charged. Invocations that
//! were cancelled or timed out are not settled. Settlement failure is logged
//! and never changes the result the caller receives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// How invocations of a tool are priced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PricingPolicy {
    /// Never charged
    #[default]
    Free,

    /// Fixed number of units per successful invocation
    PerCall {
        /// Units charged
        units: u64,
    },
}

/// What the engine hands to settlement
#[derive(Debug, Clone)]
pub struct SettlementRequest {
    /// Tool identifier
    pub tool_id: String,
    /// Invocation identifier
    pub invocation_id: String,
    /// Policy from the tool descriptor
    pub policy: PricingPolicy,
    /// Whether the invocation produced a successful outcome
    pub success: bool,
}

/// Settlement outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum SettlementDecision {
    /// Units were charged
    Settle {
        /// Units charged
        units: u64,
    },
    /// Nothing was charged
    NoCharge,
}

/// Settlement failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettlementError {
    /// Settlement backend could not be reached
    #[error("settlement backend unavailable: {0}")]
    Unavailable(String),

    /// Settlement backend refused the request
    #[error("settlement rejected: {0}")]
    Rejected(String),
}

/// External pricing settlement
#[async_trait]
pub trait PricingSettlement: Send + Sync {
    /// Settle one invocation
    async fn settle(
        &self,
        request: &SettlementRequest,
    ) -> Result<SettlementDecision, SettlementError>;
}

/// Default settlement: charges per-call policies on success, nothing otherwise
#[derive(Debug, Default)]
pub struct LedgerSettlement {
    settled_units: AtomicU64,
    settlements: AtomicU64,
}

impl LedgerSettlement {
    /// Create a new settlement ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Total units charged so far
    pub fn settled_units(&self) -> u64 {
        self.settled_units.load(Ordering::SeqCst)
    }

    /// Number of settlement calls so far
    pub fn settlements(&self) -> u64 {
        self.settlements.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PricingSettlement for LedgerSettlement {
    async fn settle(
        &self,
        request: &SettlementRequest,
    ) -> Result<SettlementDecision, SettlementError> {
        self.settlements.fetch_add(1, Ordering::SeqCst);

        let decision = match (&request.policy, request.success) {
            (PricingPolicy::PerCall { units }, true) => {
                self.settled_units.fetch_add(*units, Ordering::SeqCst);
                SettlementDecision::Settle { units: *units }
            }
            _ => SettlementDecision::NoCharge,
        };

        tracing::debug!(
            tool = %request.tool_id,
            invocation_id = %request.invocation_id,
            ?decision,
            "Settled invocation"
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(policy: PricingPolicy, success: bool) -> SettlementRequest {
        SettlementRequest {
            tool_id: "analyze_daml_safety".to_string(),
            invocation_id: "inv-1".to_string(),
            policy,
            success,
        }
    }

    #[tokio::test]
    async fn test_per_call_settles_on_success() {
        let ledger = LedgerSettlement::new();
        let decision = ledger
            .settle(&request(PricingPolicy::PerCall { units: 5 }, true))
            .await
            .unwrap();

        assert_eq!(decision, SettlementDecision::Settle { units: 5 });
        assert_eq!(ledger.settled_units(), 5);
    }

    #[tokio::test]
    async fn test_failures_and_free_tools_are_not_charged() {
        let ledger = LedgerSettlement::new();
        let failed = ledger
            .settle(&request(PricingPolicy::PerCall { units: 5 }, false))
            .await
            .unwrap();
        let free = ledger
            .settle(&request(PricingPolicy::Free, true))
            .await
            .unwrap();

        assert_eq!(failed, SettlementDecision::NoCharge);
        assert_eq!(free, SettlementDecision::NoCharge);
        assert_eq!(ledger.settled_units(), 0);
        assert_eq!(ledger.settlements(), 2);
    }

    #[test]
    fn test_policy_wire_format() {
        let json = serde_json::to_value(PricingPolicy::PerCall { units: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "per_call", "units": 2}));
    }
}
