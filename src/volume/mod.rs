//! RAID Volume
//!
//! Front door for host I/O. Validates requests against the array state and
//! geometry, routes parity-level writes through the partial-chunk cache or
//! the full-stripe fast path, and owns the flush scheduler's lifecycle.
//!
//! # Write Routing
//!
//! ```text
//!   write(offset, data)
//!     │  loaded? writable? in range? aligned?
//!     ▼
//!   parity level? ──no──▶ LevelIo::write
//!     │yes
//!     ▼  split at chunk-group boundaries
//!   whole group ──▶ drop cached entry, LevelIo::write_full_stripe
//!   partial     ──▶ PartialChunkCache::merge_write
//! ```

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::array::{ArrayConfig, ArrayState};
use crate::cache::{DrainReport, MergeOutcome, PartialChunkCache};
use crate::domain::ports::{LevelIo, MemberDisk};
use crate::error::{Error, Result};
use crate::finalize::{finalizer_for, ParityFinalizer};
use crate::flush::{FlushScheduler, FlushSchedulerConfig};
use crate::geometry::StripeGeometry;
use crate::metrics::{CacheGauges, ReconcileStats, ReconcileStatsSnapshot};
use crate::reconcile::ReconciliationEngine;

/// Parity-level machinery; absent for levels without parity.
struct ParityPath {
    cache: Arc<PartialChunkCache>,
    scheduler: Arc<FlushScheduler>,
}

/// An assembled array as seen by the host.
pub struct RaidVolume {
    id: Uuid,
    config: ArrayConfig,
    geometry: StripeGeometry,
    state: Arc<ArrayState>,
    level_io: Arc<dyn LevelIo>,
    stats: Arc<ReconcileStats>,
    parity: Option<ParityPath>,
}

impl RaidVolume {
    /// Assemble a volume using the reference finalizer for the level.
    pub fn new(
        config: ArrayConfig,
        disks: Vec<Arc<dyn MemberDisk>>,
        level_io: Arc<dyn LevelIo>,
        flush: FlushSchedulerConfig,
    ) -> Result<Self> {
        let geometry = StripeGeometry::new(&config)?;
        let finalizer = if geometry.level().has_parity() {
            Some(finalizer_for(&geometry, &disks)?)
        } else {
            None
        };
        Self::with_finalizer(config, disks, level_io, finalizer, flush)
    }

    /// Assemble a volume with a caller-supplied finalizer.
    ///
    /// `finalizer` is required for parity levels and ignored otherwise.
    pub fn with_finalizer(
        mut config: ArrayConfig,
        disks: Vec<Arc<dyn MemberDisk>>,
        level_io: Arc<dyn LevelIo>,
        finalizer: Option<Arc<dyn ParityFinalizer>>,
        flush: FlushSchedulerConfig,
    ) -> Result<Self> {
        let geometry = StripeGeometry::new(&config)?;
        let id = config.ensure_uuid();
        let state = Arc::new(ArrayState::default());
        let stats = Arc::new(ReconcileStats::default());

        let parity = if geometry.level().has_parity() {
            let finalizer = finalizer.ok_or_else(|| {
                Error::Config(format!("{} needs a parity finalizer", geometry.level()))
            })?;
            let engine =
                ReconciliationEngine::new(geometry.clone(), disks, finalizer, stats.clone())?;
            let cache = Arc::new(PartialChunkCache::new(Arc::new(engine)));
            let scheduler = FlushScheduler::new(flush, cache.clone(), state.clone(), stats.clone());
            Some(ParityPath { cache, scheduler })
        } else {
            None
        };

        info!(
            array = %id,
            level = %geometry.level(),
            disks = geometry.raid_disks(),
            chunk_sectors = geometry.chunk_sectors(),
            layout = ?geometry.layout(),
            size = config.array_size,
            "Volume assembled"
        );

        Ok(Self {
            id,
            config,
            geometry,
            state,
            level_io,
            stats,
            parity,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ArrayConfig {
        &self.config
    }

    pub fn geometry(&self) -> &StripeGeometry {
        &self.geometry
    }

    pub fn state(&self) -> &Arc<ArrayState> {
        &self.state
    }

    pub fn stats(&self) -> &Arc<ReconcileStats> {
        &self.stats
    }

    /// The partial-chunk cache, for parity levels.
    pub fn cache(&self) -> Option<&Arc<PartialChunkCache>> {
        self.parity.as_ref().map(|p| &p.cache)
    }

    fn parity_path(&self) -> Result<&ParityPath> {
        self.parity.as_ref().ok_or_else(|| {
            Error::UnsupportedLevel(format!("{} has no partial-chunk cache", self.geometry.level()))
        })
    }

    // =========================================================================
    // Request Validation
    // =========================================================================

    /// Bytes of a request at `offset` that fall inside the array.
    fn clip_request(&self, offset: u64, len: usize) -> Result<usize> {
        let size = self.config.array_size;
        let sector = self.config.sector_size as u64;

        if len == 0 {
            return Ok(0);
        }
        if offset >= size {
            return Err(Error::InvalidParameter(format!(
                "offset {} is past the end of the {}-byte array",
                offset, size
            )));
        }
        let len = (len as u64).min(size - offset);
        if offset % sector != 0 || len % sector != 0 {
            return Err(Error::InvalidParameter(format!(
                "{} bytes at {} is not aligned to the {}-byte sector",
                len, offset, sector
            )));
        }
        Ok(len as usize)
    }

    // =========================================================================
    // Host I/O
    // =========================================================================

    /// Read `buf.len()` bytes at `offset`, clipped to the end of the array.
    ///
    /// Returns the number of bytes read. Data still sitting in the
    /// partial-chunk cache is returned in place of the on-disk data.
    #[instrument(skip(self, buf), fields(len = buf.len()))]
    pub async fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if !self.state.is_loaded() {
            return Err(Error::DeviceNotReady);
        }
        let len = self.clip_request(offset, buf.len()).inspect_err(|e| {
            warn!(error = %e, "Rejected read");
        })?;
        if len == 0 {
            return Ok(0);
        }

        let buf = &mut buf[..len];
        match &self.parity {
            Some(parity) => {
                let overlaid = parity
                    .cache
                    .read_through(offset, buf, self.level_io.as_ref())
                    .await?;
                if overlaid > 0 {
                    debug!(sectors = overlaid, "Served cached sectors");
                }
            }
            None => self.level_io.read(offset, buf).await?,
        }
        Ok(len)
    }

    /// Write `data` at `offset`, clipped to the end of the array.
    ///
    /// Returns the number of bytes accepted. A partial-stripe write returns
    /// once merged; it only waits for disk I/O when it completes its chunk
    /// group.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let _gate = self.state.write_gate().await;

        if !self.state.is_loaded() {
            return Err(Error::DeviceNotReady);
        }
        if self.state.is_readonly() {
            return Err(Error::WriteProtected);
        }
        let len = self.clip_request(offset, data.len()).inspect_err(|e| {
            warn!(error = %e, "Rejected write");
        })?;
        if len == 0 {
            return Ok(0);
        }

        let data = &data[..len];
        match &self.parity {
            Some(parity) => self.write_parity(&parity.cache, offset, data).await?,
            None => self.level_io.write(offset, data).await?,
        }
        Ok(len)
    }

    async fn write_parity(&self, cache: &PartialChunkCache, offset: u64, data: &[u8]) -> Result<()> {
        let full = self.geometry.full_chunk_bytes();
        let mut pos = 0usize;

        while pos < data.len() {
            let at = offset + pos as u64;
            let chunk_offset = self.geometry.chunk_offset_of(at);
            let in_group = (chunk_offset + full - at) as usize;
            let piece = &data[pos..pos + in_group.min(data.len() - pos)];

            if at == chunk_offset && piece.len() as u64 == full {
                cache
                    .write_full_group(chunk_offset, piece, self.level_io.as_ref())
                    .await?;
                self.stats.record_full_stripe_write();
            } else if cache.merge_write(at, piece).await? == MergeOutcome::Finalized {
                debug!(chunk_offset, "Write completed chunk group");
            }
            pos += piece.len();
        }
        Ok(())
    }

    /// Merge a sub-stripe write straight into the partial-chunk cache.
    pub async fn merge_write(&self, offset: u64, data: &[u8]) -> Result<MergeOutcome> {
        self.parity_path()?.cache.merge_write(offset, data).await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the periodic drain. Returns false if it is already running or
    /// the level has no cache.
    pub fn start_flush_scheduler(&self) -> bool {
        self.parity.as_ref().is_some_and(|p| p.scheduler.start())
    }

    /// Stop the periodic drain after one final pass and wait for it.
    pub async fn stop_flush_scheduler_and_wait(&self) {
        if let Some(parity) = &self.parity {
            parity.scheduler.stop_and_wait().await;
        }
    }

    /// Drain the cache now. Fails with the last error if any entry could not
    /// be finalized; those entries stay cached.
    pub async fn flush_all_now(&self) -> Result<DrainReport> {
        match &self.parity {
            Some(parity) => parity.cache.drain().await.into_result(),
            None => Ok(DrainReport::default()),
        }
    }

    /// Mark the array read-only. In-flight writes finish first, and the
    /// flush scheduler stops after its next drain.
    pub async fn set_readonly(&self, readonly: bool) {
        self.state.set_readonly(readonly).await;
    }

    /// Go read-only and wait for the scheduler's final drain.
    pub async fn shutdown(&self) {
        self.set_readonly(true).await;
        self.stop_flush_scheduler_and_wait().await;
        info!(array = %self.id, "Volume shut down");
    }

    // =========================================================================
    // Observability
    // =========================================================================

    pub fn stats_snapshot(&self) -> ReconcileStatsSnapshot {
        self.stats.snapshot()
    }

    /// Current cache occupancy.
    pub async fn cache_gauges(&self) -> CacheGauges {
        match &self.parity {
            Some(parity) => CacheGauges {
                entries: parity.cache.len().await,
                oldest_entry_age: parity
                    .cache
                    .oldest_entry_age()
                    .await
                    .and_then(|age| age.to_std().ok()),
            },
            None => CacheGauges::default(),
        }
    }
}
