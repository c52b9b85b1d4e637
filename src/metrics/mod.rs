//! Metrics module
//!
//! Lock-free counters updated on the write, reconcile and flush paths, plus a
//! Prometheus text rendering of a snapshot of them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Error, Result};

// =============================================================================
// Statistics
// =============================================================================

/// Counters for the partial-chunk cache and reconciliation engine.
#[derive(Debug, Default)]
pub struct ReconcileStats {
    /// Writes merged into the cache
    pub merges: AtomicU64,

    /// Sectors newly marked written by merges
    pub sectors_merged: AtomicU64,

    /// Cache entries allocated
    pub entries_created: AtomicU64,

    /// Entry allocations refused for lack of memory
    pub allocation_failures: AtomicU64,

    /// Reconciliation passes started
    pub reconciliations: AtomicU64,

    /// Reconciliation passes that failed
    pub reconciliations_failed: AtomicU64,

    /// Chunk groups reconciled and finalized
    pub chunks_finalized: AtomicU64,

    /// Reconstruction read requests issued
    pub read_requests: AtomicU64,

    /// Sectors read for reconstruction
    pub sectors_read: AtomicU64,

    /// Reconstruction reads that failed
    pub read_failures: AtomicU64,

    /// Parity and Q write requests issued by finalizers
    pub parity_writes: AtomicU64,

    /// Data write requests issued by finalizers
    pub data_writes: AtomicU64,

    /// Finalize calls that failed to write parity or data
    pub write_failures: AtomicU64,

    /// Full-stripe writes that bypassed the cache
    pub full_stripe_writes: AtomicU64,

    /// Flush scheduler ticks
    pub flush_ticks: AtomicU64,

    /// Entries left cached by a failed drain
    pub drain_failures: AtomicU64,

    /// Total reconciliation time (microseconds)
    pub reconcile_time_us: AtomicU64,
}

impl ReconcileStats {
    /// Record a merged write.
    pub fn record_merge(&self, sectors: u64) {
        self.merges.fetch_add(1, Ordering::Relaxed);
        self.sectors_merged.fetch_add(sectors, Ordering::Relaxed);
    }

    pub fn record_entry_created(&self) {
        self.entries_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_allocation_failure(&self) {
        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished reconciliation pass.
    pub fn record_reconcile(&self, duration: Duration, success: bool) {
        self.reconciliations.fetch_add(1, Ordering::Relaxed);
        self.reconcile_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if success {
            self.chunks_finalized.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reconciliations_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a batch of reconstruction reads.
    pub fn record_reads(&self, requests: u64, sectors: u64, failures: u64) {
        self.read_requests.fetch_add(requests, Ordering::Relaxed);
        self.sectors_read.fetch_add(sectors, Ordering::Relaxed);
        self.read_failures.fetch_add(failures, Ordering::Relaxed);
    }

    /// Record a batch of finalizer writes.
    pub fn record_writes(&self, parity: u64, data: u64, failures: u64) {
        self.parity_writes.fetch_add(parity, Ordering::Relaxed);
        self.data_writes.fetch_add(data, Ordering::Relaxed);
        self.write_failures.fetch_add(failures, Ordering::Relaxed);
    }

    pub fn record_full_stripe_write(&self) {
        self.full_stripe_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_tick(&self) {
        self.flush_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drain_failure(&self) {
        self.drain_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average reconciliation time in microseconds.
    pub fn avg_reconcile_time_us(&self) -> u64 {
        let passes = self.reconciliations.load(Ordering::Relaxed);
        if passes == 0 {
            0
        } else {
            self.reconcile_time_us.load(Ordering::Relaxed) / passes
        }
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> ReconcileStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        ReconcileStatsSnapshot {
            merges: load(&self.merges),
            sectors_merged: load(&self.sectors_merged),
            entries_created: load(&self.entries_created),
            allocation_failures: load(&self.allocation_failures),
            reconciliations: load(&self.reconciliations),
            reconciliations_failed: load(&self.reconciliations_failed),
            chunks_finalized: load(&self.chunks_finalized),
            read_requests: load(&self.read_requests),
            sectors_read: load(&self.sectors_read),
            read_failures: load(&self.read_failures),
            parity_writes: load(&self.parity_writes),
            data_writes: load(&self.data_writes),
            write_failures: load(&self.write_failures),
            full_stripe_writes: load(&self.full_stripe_writes),
            flush_ticks: load(&self.flush_ticks),
            drain_failures: load(&self.drain_failures),
            avg_reconcile_time_us: self.avg_reconcile_time_us(),
        }
    }
}

/// Serializable copy of [`ReconcileStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStatsSnapshot {
    pub merges: u64,
    pub sectors_merged: u64,
    pub entries_created: u64,
    pub allocation_failures: u64,
    pub reconciliations: u64,
    pub reconciliations_failed: u64,
    pub chunks_finalized: u64,
    pub read_requests: u64,
    pub sectors_read: u64,
    pub read_failures: u64,
    pub parity_writes: u64,
    pub data_writes: u64,
    pub write_failures: u64,
    pub full_stripe_writes: u64,
    pub flush_ticks: u64,
    pub drain_failures: u64,
    pub avg_reconcile_time_us: u64,
}

// =============================================================================
// Prometheus Exposition
// =============================================================================

/// Cache occupancy sampled alongside the counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheGauges {
    pub entries: usize,
    pub oldest_entry_age: Option<Duration>,
}

fn prom_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("prometheus: {}", e))
}

/// Render a snapshot in the Prometheus text format.
pub fn render_prometheus(snapshot: &ReconcileStatsSnapshot, gauges: CacheGauges) -> Result<String> {
    let registry = Registry::new();

    let counters: [(&str, &str, u64); 16] = [
        ("stripecache_merges_total", "Writes merged into the partial-chunk cache", snapshot.merges),
        ("stripecache_sectors_merged_total", "Sectors newly marked written", snapshot.sectors_merged),
        ("stripecache_entries_created_total", "Partial-chunk entries allocated", snapshot.entries_created),
        ("stripecache_allocation_failures_total", "Entry allocations refused", snapshot.allocation_failures),
        ("stripecache_reconciliations_total", "Reconciliation passes", snapshot.reconciliations),
        ("stripecache_reconciliations_failed_total", "Failed reconciliation passes", snapshot.reconciliations_failed),
        ("stripecache_chunks_finalized_total", "Chunk groups finalized", snapshot.chunks_finalized),
        ("stripecache_read_requests_total", "Reconstruction reads issued", snapshot.read_requests),
        ("stripecache_sectors_read_total", "Sectors read for reconstruction", snapshot.sectors_read),
        ("stripecache_read_failures_total", "Reconstruction reads failed", snapshot.read_failures),
        ("stripecache_parity_writes_total", "Parity and Q writes issued", snapshot.parity_writes),
        ("stripecache_data_writes_total", "Data writes issued by finalizers", snapshot.data_writes),
        ("stripecache_write_failures_total", "Finalize calls that failed", snapshot.write_failures),
        ("stripecache_full_stripe_writes_total", "Writes that bypassed the cache", snapshot.full_stripe_writes),
        ("stripecache_flush_ticks_total", "Flush scheduler ticks", snapshot.flush_ticks),
        ("stripecache_drain_failures_total", "Entries kept by a failed drain", snapshot.drain_failures),
    ];

    for (name, help, value) in counters {
        let counter = IntCounter::new(name, help).map_err(prom_err)?;
        counter.inc_by(value);
        registry.register(Box::new(counter)).map_err(prom_err)?;
    }

    let entries = IntGauge::new("stripecache_cached_entries", "Chunk groups currently cached")
        .map_err(prom_err)?;
    entries.set(gauges.entries as i64);
    registry.register(Box::new(entries)).map_err(prom_err)?;

    let age = Gauge::new(
        "stripecache_oldest_entry_age_seconds",
        "Age of the longest-cached chunk group",
    )
    .map_err(prom_err)?;
    age.set(gauges.oldest_entry_age.map_or(0.0, |d| d.as_secs_f64()));
    registry.register(Box::new(age)).map_err(prom_err)?;

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(prom_err)?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics encoding: {}", e)))
}

// =============================================================================
// Tests
// =============================================================================
