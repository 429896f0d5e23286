//! Observability counters
//!
//! Counters are informational only; nothing in the core reads them back to make
//! decisions.

use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Live counters, updated by the marker layer and readable from any thread
#[derive(Debug, Default)]
pub struct Diagnostics {
    dropped_points: AtomicU64,
    rebuilds: AtomicU64,
    queries: AtomicU64,
    last_query_evictions: AtomicU64,
    total_evictions: AtomicU64,
    reconciliations: AtomicU64,
    morphs: AtomicU64,
    stale_results: AtomicU64,
}

/// Point-in-time copy of [`Diagnostics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DiagnosticsSnapshot {
    /// Malformed or duplicate points dropped across all batches
    pub dropped_points: u64,
    pub rebuilds: u64,
    pub queries: u64,
    /// Features evicted by the most recent reconciliation
    pub last_query_evictions: u64,
    pub total_evictions: u64,
    pub reconciliations: u64,
    /// Cluster/single morphs started
    pub morphs: u64,
    /// Query results discarded because a newer viewport had been submitted
    pub stale_results: u64,
}

impl Diagnostics {
    pub fn record_rebuild(&self, dropped_points: usize) {
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        self.dropped_points
            .fetch_add(dropped_points as u64, Ordering::Relaxed);
    }

    pub fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconcile(&self, evictions: usize, morphs: usize) {
        self.reconciliations.fetch_add(1, Ordering::Relaxed);
        self.last_query_evictions
            .store(evictions as u64, Ordering::Relaxed);
        self.total_evictions
            .fetch_add(evictions as u64, Ordering::Relaxed);
        self.morphs.fetch_add(morphs as u64, Ordering::Relaxed);
    }

    pub fn record_stale_result(&self) {
        self.stale_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            dropped_points: self.dropped_points.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            last_query_evictions: self.last_query_evictions.load(Ordering::Relaxed),
            total_evictions: self.total_evictions.load(Ordering::Relaxed),
            reconciliations: self.reconciliations.load(Ordering::Relaxed),
            morphs: self.morphs.load(Ordering::Relaxed),
            stale_results: self.stale_results.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let diagnostics = Diagnostics::default();
        diagnostics.record_rebuild(3);
        diagnostics.record_rebuild(2);
        diagnostics.record_query();
        diagnostics.record_reconcile(4, 1);
        diagnostics.record_reconcile(0, 0);
        diagnostics.record_stale_result();

        let snapshot = diagnostics.snapshot();
        assert_eq!(snapshot.dropped_points, 5);
        assert_eq!(snapshot.rebuilds, 2);
        assert_eq!(snapshot.queries, 1);
        assert_eq!(snapshot.last_query_evictions, 0);
        assert_eq!(snapshot.total_evictions, 4);
        assert_eq!(snapshot.reconciliations, 2);
        assert_eq!(snapshot.morphs, 1);
        assert_eq!(snapshot.stale_results, 1);
    }
}
