//! Ingestion counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct IngestionStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    sanitized_fields: AtomicU64,
    live_published: AtomicU64,
    synthetic_published: AtomicU64,
    live_failures: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) -> u64 {
    counter.fetch_add(by, Ordering::Relaxed).saturating_add(by)
}

impl IngestionStats {
    /// Returns the new accepted count.
    pub(crate) fn record_accepted(&self, sanitized_fields: usize) -> u64 {
        bump(
            &self.sanitized_fields,
            u64::try_from(sanitized_fields).unwrap_or(u64::MAX),
        );
        bump(&self.accepted, 1)
    }

    pub(crate) fn record_rejected(&self) -> u64 {
        bump(&self.rejected, 1)
    }

    pub(crate) fn record_live_published(&self) {
        bump(&self.live_published, 1);
    }

    pub(crate) fn record_synthetic_published(&self) {
        bump(&self.synthetic_published, 1);
    }

    pub(crate) fn record_live_failure(&self) -> u64 {
        bump(&self.live_failures, 1)
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            sanitized_fields: self.sanitized_fields.load(Ordering::Relaxed),
            live_published: self.live_published.load(Ordering::Relaxed),
            synthetic_published: self.synthetic_published.load(Ordering::Relaxed),
            live_failures: self.live_failures.load(Ordering::Relaxed),
        }
    }
}

/// Counters since the service was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Live packets or bridge records that decoded successfully.
    pub accepted: u64,
    /// Datagrams rejected as undersized.
    pub rejected: u64,
    /// Fields replaced or clamped during sanitization.
    pub sanitized_fields: u64,
    pub live_published: u64,
    pub synthetic_published: u64,
    pub live_failures: u64,
}
