//! Lock-free counters describing how requests were served.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct AtomicCounters {
    primary_writes: AtomicUsize,
    fallback_writes: AtomicUsize,
    degraded_reads: AtomicUsize,
    migrated_messages: AtomicUsize,
}

/// Point-in-time copy of [`AtomicCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub primary_writes: usize,
    pub fallback_writes: usize,
    pub degraded_reads: usize,
    pub migrated_messages: usize,
}

impl AtomicCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_primary_writes(&self) -> usize {
        self.primary_writes.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_fallback_writes(&self) -> usize {
        self.fallback_writes.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_degraded_reads(&self) -> usize {
        self.degraded_reads.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_migrated_messages(&self, count: usize) -> usize {
        self.migrated_messages.fetch_add(count, Ordering::Relaxed) + count
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            primary_writes: self.primary_writes.load(Ordering::Relaxed),
            fallback_writes: self.fallback_writes.load(Ordering::Relaxed),
            degraded_reads: self.degraded_reads.load(Ordering::Relaxed),
            migrated_messages: self.migrated_messages.load(Ordering::Relaxed),
        }
    }
}
