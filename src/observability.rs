use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Counters for every transition outcome the engine produces
#[derive(Debug, Default)]
pub struct TransitionMetrics {
    pub applied: AtomicU64,
    pub conflicts: AtomicU64,
    pub illegal: AtomicU64,
    pub gate_blocked: AtomicU64,
    pub duplicates: AtomicU64,
    pub store_errors: AtomicU64,
    pub dispatch_failures: AtomicU64,
}

impl TransitionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_illegal(&self) {
        self.illegal.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gate_blocked(&self) {
        self.gate_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
        warn!("Job dispatch failed");
    }

    pub fn get_stats(&self) -> TransitionStats {
        TransitionStats {
            applied: self.applied.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            illegal: self.illegal.load(Ordering::Relaxed),
            gate_blocked: self.gate_blocked.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            applied = stats.applied,
            conflicts = stats.conflicts,
            illegal = stats.illegal,
            gate_blocked = stats.gate_blocked,
            duplicates = stats.duplicates,
            store_errors = stats.store_errors,
            dispatch_failures = stats.dispatch_failures,
            "Transition metrics"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TransitionStats {
    pub applied: u64,
    pub conflicts: u64,
    pub illegal: u64,
    pub gate_blocked: u64,
    pub duplicates: u64,
    pub store_errors: u64,
    pub dispatch_failures: u64,
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}
