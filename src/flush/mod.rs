//! Flush Scheduler
//!
//! Periodic background drain of the partial-chunk cache.
//!
//! # Lifecycle
//!
//! ```text
//!   start() ──▶ [ wait interval ] ──▶ tick: loaded? ── drain cache
//!                     ▲                                    │
//!                     │          read-only? ──no───────────┘
//!                     │              │yes
//!   stop_and_wait() ──┴─ cancel ──▶ final drain ──▶ task exits ──▶ join
//! ```
//!
//! A failed drain only logs: the schedule keeps running and the entries that
//! failed are retried on the next tick. The task ends after the drain that
//! observes the array read-only, or after the final drain requested by
//! `stop_and_wait`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::array::{parse_duration, ArrayState, FlushSection};
use crate::cache::PartialChunkCache;
use crate::error::Result;
use crate::metrics::ReconcileStats;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the flush scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushSchedulerConfig {
    /// Interval between drains
    pub interval: Duration,
}

impl Default for FlushSchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

impl FlushSchedulerConfig {
    /// Create config from the volume description's flush section
    pub fn from_section(section: &FlushSection) -> Result<Self> {
        Ok(Self {
            interval: parse_duration(&section.interval)?,
        })
    }
}

// =============================================================================
// Flush Scheduler
// =============================================================================

/// Supervised background task draining the cache on a timer.
pub struct FlushScheduler {
    config: FlushSchedulerConfig,
    cache: Arc<PartialChunkCache>,
    state: Arc<ArrayState>,
    stats: Arc<ReconcileStats>,
    cancel: Mutex<CancellationToken>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FlushScheduler {
    pub fn new(
        config: FlushSchedulerConfig,
        cache: Arc<PartialChunkCache>,
        state: Arc<ArrayState>,
        stats: Arc<ReconcileStats>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            cache,
            state,
            stats,
            cancel: Mutex::new(CancellationToken::new()),
            handle: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &FlushSchedulerConfig {
        &self.config
    }

    /// Spawn the background task. Returns false if one is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();
        *handle = Some(tokio::spawn(Arc::clone(self).run(cancel)));
        info!(interval = ?self.config.interval, "Flush scheduler started");
        true
    }

    /// Whether the background task is alive.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.interval;
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let stopping = tokio::select! {
                _ = tick.tick() => false,
                _ = cancel.cancelled() => true,
            };

            self.stats.record_flush_tick();
            if self.state.is_loaded() {
                let report = self.cache.drain().await;
                if let Some(err) = &report.last_error {
                    error!(
                        failed = report.failed,
                        remaining = report.remaining,
                        error = %err,
                        "Flush drain left entries cached"
                    );
                } else {
                    debug!(finalized = report.finalized, "Flush tick complete");
                }
            } else {
                debug!("Array not loaded, skipping flush tick");
            }

            if stopping {
                info!("Flush scheduler stopped");
                break;
            }
            if self.state.is_readonly() {
                info!("Array is read-only, flush scheduler stopped");
                break;
            }
        }
    }

    /// Ask the task to run one final drain and exit, then wait for it.
    ///
    /// A drain already in progress completes first. Safe to call when the
    /// task was never started or has already exited.
    pub async fn stop_and_wait(&self) {
        self.cancel.lock().cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Flush scheduler task ended abnormally");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
