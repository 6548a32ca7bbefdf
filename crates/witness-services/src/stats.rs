//! Collector counters.
//!
//! Shared between the ingestion path, the upload worker, and the status
//! API. All counters use relaxed ordering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct CollectorStats {
    pub frames: AtomicU64,
    pub ignored: AtomicU64,
    pub parse_errors: AtomicU64,
    pub paired: AtomicU64,
    pub expired: AtomicU64,
    pub vetoed: AtomicU64,
    pub queued: AtomicU64,
    pub dropped: AtomicU64,
    pub reports_uploaded: AtomicU64,
    pub report_errors: AtomicU64,
    pub batches_uploaded: AtomicU64,
    pub batches_failed: AtomicU64,
}

/// Point-in-time copy of [`CollectorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub ignored: u64,
    pub parse_errors: u64,
    pub paired: u64,
    pub expired: u64,
    pub vetoed: u64,
    pub queued: u64,
    pub dropped: u64,
    pub reports_uploaded: u64,
    pub report_errors: u64,
    pub batches_uploaded: u64,
    pub batches_failed: u64,
}

impl CollectorStats {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames: get(&self.frames),
            ignored: get(&self.ignored),
            parse_errors: get(&self.parse_errors),
            paired: get(&self.paired),
            expired: get(&self.expired),
            vetoed: get(&self.vetoed),
            queued: get(&self.queued),
            dropped: get(&self.dropped),
            reports_uploaded: get(&self.reports_uploaded),
            report_errors: get(&self.report_errors),
            batches_uploaded: get(&self.batches_uploaded),
            batches_failed: get(&self.batches_failed),
        }
    }
}
