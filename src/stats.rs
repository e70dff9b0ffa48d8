//! Termination engine statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the termination engine
pub struct EngineStats {
    pub invocations: AtomicU64,
    pub noop_calls: AtomicU64,
    pub accepted: AtomicU64,
    pub pending_created: AtomicU64,
    pub pending_consumed: AtomicU64,
    pub contract_inconsistencies: AtomicU64,
    pub participant_failures: AtomicU64,
    pub protocol_overrides: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self {
            invocations: AtomicU64::new(0),
            noop_calls: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            pending_created: AtomicU64::new(0),
            pending_consumed: AtomicU64::new(0),
            contract_inconsistencies: AtomicU64::new(0),
            participant_failures: AtomicU64::new(0),
            protocol_overrides: AtomicU64::new(0),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            noop_calls: self.noop_calls.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            pending_created: self.pending_created.load(Ordering::Relaxed),
            pending_consumed: self.pending_consumed.load(Ordering::Relaxed),
            contract_inconsistencies: self.contract_inconsistencies.load(Ordering::Relaxed),
            participant_failures: self.participant_failures.load(Ordering::Relaxed),
            protocol_overrides: self.protocol_overrides.load(Ordering::Relaxed),
        }
    }
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub invocations: u64,
    pub noop_calls: u64,
    pub accepted: u64,
    pub pending_created: u64,
    pub pending_consumed: u64,
    pub contract_inconsistencies: u64,
    pub participant_failures: u64,
    pub protocol_overrides: u64,
}
