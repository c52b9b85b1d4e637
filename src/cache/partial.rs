//! The partial-chunk cache.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::bitmap::SectorBitmap;
use super::entry::PartialChunkEntry;
use crate::array::SECTOR_SIZE;
use crate::domain::ports::LevelIo;
use crate::error::{Error, Result};
use crate::geometry::StripeGeometry;
use crate::metrics::ReconcileStats;
use crate::reconcile::ReconciliationEngine;

/// Result of a successful [`PartialChunkCache::merge_write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Data is cached; the chunk group still has unwritten sectors.
    Merged,
    /// The write completed the chunk group, which was reconciled, handed to
    /// the finalizer and evicted.
    Finalized,
}

/// Outcome of one pass over the cache.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Entries reconciled, finalized and evicted
    pub finalized: usize,
    /// Entries whose reconciliation failed (kept for retry)
    pub failed: usize,
    /// Entries still cached after the pass
    pub remaining: usize,
    /// Last failure seen during the pass
    pub last_error: Option<Error>,
}

impl DrainReport {
    /// Turn a pass with failures into its last error.
    pub fn into_result(mut self) -> Result<Self> {
        match self.last_error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Copy of one cached entry, for inspection.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub chunk_offset: u64,
    pub pending: SectorBitmap,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Sorted collection of in-flight chunk groups.
///
/// A single async mutex covers the list and every entry in it. Reconciliation
/// runs with the mutex held, so an entry being reconciled can never be
/// extended by a concurrent merge.
pub struct PartialChunkCache {
    geometry: StripeGeometry,
    engine: Arc<ReconciliationEngine>,
    stats: Arc<ReconcileStats>,
    entries: Mutex<Vec<PartialChunkEntry>>,
}

impl PartialChunkCache {
    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        Self {
            geometry: engine.geometry().clone(),
            stats: engine.stats().clone(),
            engine,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn geometry(&self) -> &StripeGeometry {
        &self.geometry
    }

    /// Linear scan of the sorted list: `Ok(idx)` on a match, `Err(idx)` with
    /// the insertion position otherwise.
    fn position(entries: &[PartialChunkEntry], chunk_offset: u64) -> std::result::Result<usize, usize> {
        for (idx, entry) in entries.iter().enumerate() {
            if entry.chunk_offset() == chunk_offset {
                return Ok(idx);
            }
            if entry.chunk_offset() > chunk_offset {
                return Err(idx);
            }
        }
        Err(entries.len())
    }

    /// Merge a sub-stripe write into its chunk group.
    ///
    /// The write must be sector aligned and must not cross a chunk-group
    /// boundary. When the merge leaves every sector of the group written the
    /// group is reconciled and finalized before returning; if that fails the
    /// error is returned and the merged data stays cached.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub async fn merge_write(&self, offset: u64, data: &[u8]) -> Result<MergeOutcome> {
        let full = self.geometry.full_chunk_bytes() as usize;
        let chunk_offset = self.geometry.chunk_offset_of(offset);
        let rel = (offset - chunk_offset) as usize;

        if data.is_empty() || rel + data.len() > full {
            return Err(Error::InvalidParameter(format!(
                "write of {} bytes at {} does not fit in one chunk group",
                data.len(),
                offset
            )));
        }
        if rel % SECTOR_SIZE != 0 || data.len() % SECTOR_SIZE != 0 {
            return Err(Error::InvalidParameter(format!(
                "write of {} bytes at {} is not sector aligned",
                data.len(),
                offset
            )));
        }

        let mut entries = self.entries.lock().await;

        let (idx, created) = match Self::position(&entries, chunk_offset) {
            Ok(idx) => (idx, false),
            Err(idx) => {
                let entry = PartialChunkEntry::try_new(
                    chunk_offset,
                    self.geometry.data_disks(),
                    self.geometry.chunk_sectors(),
                )
                .and_then(|entry| {
                    entries
                        .try_reserve(1)
                        .map_err(|_| Error::ResourceExhausted {
                            size: std::mem::size_of::<PartialChunkEntry>(),
                        })?;
                    Ok(entry)
                });
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        self.stats.record_allocation_failure();
                        warn!(chunk_offset, error = %err, "Cannot allocate partial chunk entry");
                        return Err(err);
                    }
                };
                entries.insert(idx, entry);
                self.stats.record_entry_created();
                debug!(chunk_offset, cached = entries.len(), "Partial chunk entry created");
                (idx, true)
            }
        };

        let cleared = match entries[idx].merge(rel, data) {
            Ok(cleared) => cleared,
            Err(err) => {
                if created {
                    entries.remove(idx);
                }
                return Err(err);
            }
        };
        self.stats.record_merge(cleared as u64);

        if !entries[idx].is_complete() {
            return Ok(MergeOutcome::Merged);
        }

        debug!(chunk_offset, "Chunk group fully written, finalizing");
        match self.engine.reconcile(&mut entries[idx]).await {
            Ok(_) => {
                entries.remove(idx);
                Ok(MergeOutcome::Finalized)
            }
            Err(err) => {
                warn!(chunk_offset, error = %err, "Finalize on completing write failed, entry kept");
                Err(err)
            }
        }
    }

    /// Reconcile and finalize every cached entry in ascending offset order.
    ///
    /// The cache stays locked for the whole pass. Entries that fail are kept
    /// for the next pass; a failure never stops the pass.
    #[instrument(skip(self))]
    pub async fn drain(&self) -> DrainReport {
        let mut entries = self.entries.lock().await;
        let mut report = DrainReport::default();

        let mut idx = 0;
        while idx < entries.len() {
            let chunk_offset = entries[idx].chunk_offset();
            match self.engine.reconcile(&mut entries[idx]).await {
                Ok(_) => {
                    entries.remove(idx);
                    report.finalized += 1;
                }
                Err(err) => {
                    error!(chunk_offset, error = %err, "Reconciliation failed, entry kept for retry");
                    self.stats.record_drain_failure();
                    report.failed += 1;
                    report.last_error = Some(err);
                    idx += 1;
                }
            }
        }

        report.remaining = entries.len();
        if report.finalized > 0 || report.failed > 0 {
            info!(
                finalized = report.finalized,
                failed = report.failed,
                remaining = report.remaining,
                "Drained partial chunk cache"
            );
        }
        report
    }

    /// Drop the entry for `chunk_offset` without reconciling it.
    pub async fn discard(&self, chunk_offset: u64) -> bool {
        let mut entries = self.entries.lock().await;
        Self::discard_locked(&mut entries, chunk_offset)
    }

    fn discard_locked(entries: &mut Vec<PartialChunkEntry>, chunk_offset: u64) -> bool {
        match Self::position(entries, chunk_offset) {
            Ok(idx) => {
                entries.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    /// Write a whole chunk group through `io`, superseding any cached
    /// partial data for it. Returns whether a cached entry was dropped.
    #[instrument(skip(self, data, io))]
    pub async fn write_full_group(
        &self,
        chunk_offset: u64,
        data: &[u8],
        io: &dyn LevelIo,
    ) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let superseded = Self::discard_locked(&mut entries, chunk_offset);
        if superseded {
            debug!(chunk_offset, "Full-stripe write superseded cached partial entry");
        }
        io.write_full_stripe(chunk_offset, data).await?;
        Ok(superseded)
    }

    /// Overlay cached host-written sectors onto `buf`, which holds the data
    /// at logical `offset`. Returns the number of sectors replaced.
    pub async fn overlay(&self, offset: u64, buf: &mut [u8]) -> usize {
        let entries = self.entries.lock().await;
        self.overlay_locked(&entries, offset, buf)
    }

    fn overlay_locked(&self, entries: &[PartialChunkEntry], offset: u64, buf: &mut [u8]) -> usize {
        let full = self.geometry.full_chunk_bytes();
        let end = offset + buf.len() as u64;
        let mut copied = 0;

        for entry in entries {
            let start = entry.chunk_offset();
            if start + full <= offset {
                continue;
            }
            if start >= end {
                break;
            }
            let lo = start.max(offset);
            let hi = (start + full).min(end);
            let window = &mut buf[(lo - offset) as usize..(hi - offset) as usize];
            copied += entry.overlay_into((lo - start) as usize, window);
        }

        copied
    }

    /// Read through `io` and overlay cached data, with the cache locked so a
    /// concurrent finalize cannot slip between the two steps.
    pub async fn read_through(&self, offset: u64, buf: &mut [u8], io: &dyn LevelIo) -> Result<usize> {
        let entries = self.entries.lock().await;
        io.read(offset, buf).await?;
        Ok(self.overlay_locked(&entries, offset, buf))
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Cached chunk offsets, ascending.
    pub async fn chunk_offsets(&self) -> Vec<u64> {
        self.entries
            .lock()
            .await
            .iter()
            .map(PartialChunkEntry::chunk_offset)
            .collect()
    }

    /// Copy out the state of one cached entry.
    pub async fn snapshot_entry(&self, chunk_offset: u64) -> Option<EntrySnapshot> {
        let entries = self.entries.lock().await;
        let idx = Self::position(&entries, chunk_offset).ok()?;
        let entry = &entries[idx];
        Some(EntrySnapshot {
            chunk_offset,
            pending: entry.pending().clone(),
            data: entry.data().to_vec(),
            created_at: entry.created_at(),
        })
    }

    /// Age of the longest-cached entry.
    pub async fn oldest_entry_age(&self) -> Option<chrono::Duration> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .map(PartialChunkEntry::created_at)
            .min()
            .map(|oldest| Utc::now() - oldest)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mem_disk::{member_handles, MemDisk};
    use crate::array::{ArrayConfig, Layout, RaidLevel};
    use crate::finalize::finalizer_for;
    use assert_matches::assert_matches;

    const CHUNK_SECTORS: u32 = 8;
    const ROW: usize = CHUNK_SECTORS as usize * SECTOR_SIZE;

    fn cache() -> (PartialChunkCache, Vec<Arc<MemDisk>>) {
        let config = ArrayConfig::new(RaidLevel::Raid5, 4, CHUNK_SECTORS, 3 * ROW as u64 * 64)
            .with_layout(Layout::RightSymmetric);
        let geometry = StripeGeometry::new(&config).unwrap();
        let disks = MemDisk::array(4, 64 * ROW as u64);
        let handles = member_handles(&disks);
        let finalizer = finalizer_for(&geometry, &handles).unwrap();
        let engine = ReconciliationEngine::new(
            geometry,
            handles,
            finalizer,
            Arc::new(ReconcileStats::default()),
        )
        .unwrap();
        (PartialChunkCache::new(Arc::new(engine)), disks)
    }

    #[tokio::test]
    async fn test_first_write_creates_entry() {
        let (cache, _) = cache();
        let outcome = cache.merge_write(0, &[1; 1024]).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Merged);
        assert_eq!(cache.chunk_offsets().await, vec![0]);
        assert_eq!(cache.engine.stats().snapshot().entries_created, 1);
    }

    #[tokio::test]
    async fn test_allocation_failure_leaves_cache_untouched() {
        // a chunk group of several terabytes cannot be allocated
        let config = ArrayConfig::new(RaidLevel::Raid5, 3, u32::MAX, 0);
        let geometry = StripeGeometry::new(&config).unwrap();
        let handles = member_handles(&MemDisk::array(3, 1 << 16));
        let finalizer = finalizer_for(&geometry, &handles).unwrap();
        let stats = Arc::new(ReconcileStats::default());
        let engine =
            ReconciliationEngine::new(geometry, handles, finalizer, stats.clone()).unwrap();
        let cache = PartialChunkCache::new(Arc::new(engine));

        assert_matches!(
            cache.merge_write(0, &[1; SECTOR_SIZE]).await,
            Err(Error::ResourceExhausted { .. })
        );
        assert!(cache.is_empty().await);

        let snap = stats.snapshot();
        assert_eq!(snap.allocation_failures, 1);
        assert_eq!(snap.entries_created, 0);
        assert_eq!(snap.merges, 0);
    }

    #[tokio::test]
    async fn test_entries_stay_sorted() {
        let (cache, _) = cache();
        let full = 3 * ROW as u64;
        for stripe in [5u64, 1, 3, 0, 4] {
            cache.merge_write(stripe * full, &[1; 512]).await.unwrap();
        }
        cache.merge_write(3 * full + 512, &[1; 512]).await.unwrap();
        assert_eq!(
            cache.chunk_offsets().await,
            vec![0, full, 3 * full, 4 * full, 5 * full]
        );
    }

    #[tokio::test]
    async fn test_rejects_cross_group_and_unaligned() {
        let (cache, _) = cache();
        let full = 3 * ROW as u64;
        assert_matches!(
            cache.merge_write(full - 512, &[0; 1024]).await,
            Err(Error::InvalidParameter(_))
        );
        assert_matches!(cache.merge_write(100, &[0; 512]).await, Err(Error::InvalidParameter(_)));
        assert_matches!(cache.merge_write(0, &[]).await, Err(Error::InvalidParameter(_)));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_single_write_covering_group_finalizes() {
        let (cache, disks) = cache();
        let outcome = cache.merge_write(0, &vec![3; 3 * ROW]).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Finalized);
        assert!(cache.is_empty().await);
        // no reconstruction reads were needed
        assert!(disks.iter().all(|d| d.reads().is_empty()));
    }

    #[tokio::test]
    async fn test_completing_write_finalizes_once() {
        let (cache, _) = cache();
        assert_eq!(cache.merge_write(0, &vec![1; ROW]).await.unwrap(), MergeOutcome::Merged);
        assert_eq!(
            cache.merge_write(2 * ROW as u64, &vec![1; ROW]).await.unwrap(),
            MergeOutcome::Merged
        );
        assert_eq!(
            cache.merge_write(ROW as u64, &vec![1; ROW]).await.unwrap(),
            MergeOutcome::Finalized
        );
        assert!(cache.is_empty().await);
        assert_eq!(cache.engine.stats().snapshot().chunks_finalized, 1);
    }

    #[tokio::test]
    async fn test_completing_write_failure_keeps_entry() {
        let (cache, disks) = cache();
        cache.merge_write(0, &vec![1; 2 * ROW]).await.unwrap();
        for disk in &disks {
            disk.set_write_fault(true);
        }
        assert!(cache.merge_write(2 * ROW as u64, &vec![1; ROW]).await.is_err());
        let snap = cache.snapshot_entry(0).await.unwrap();
        assert!(snap.pending.is_clear());

        for disk in &disks {
            disk.set_write_fault(false);
        }
        let report = cache.drain().await;
        assert_eq!(report.finalized, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_drain_keeps_failed_entries() {
        let (cache, disks) = cache();
        let full = 3 * ROW as u64;
        cache.merge_write(0, &[1; 512]).await.unwrap();
        cache.merge_write(full, &[1; 512]).await.unwrap();
        // every read fails, so both reconciliations fail
        for disk in &disks {
            disk.set_read_fault(true);
        }
        let report = cache.drain().await;
        assert_eq!(report.finalized, 0);
        assert_eq!(report.failed, 2);
        assert_eq!(report.remaining, 2);
        assert_matches!(report.into_result(), Err(Error::DiskIo { .. }));

        for disk in &disks {
            disk.set_read_fault(false);
        }
        let report = cache.drain().await;
        assert_eq!(report.finalized, 2);
        assert_eq!(report.remaining, 0);
    }

    #[tokio::test]
    async fn test_discard() {
        let (cache, _) = cache();
        cache.merge_write(512, &[1; 512]).await.unwrap();
        assert!(cache.discard(0).await);
        assert!(!cache.discard(0).await);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_overlay_spans_groups() {
        let (cache, _) = cache();
        let full = 3 * ROW as u64;
        cache.merge_write(full - 512, &[7; 512]).await.unwrap();
        cache.merge_write(full, &[8; 512]).await.unwrap();

        let mut buf = vec![0u8; 2048];
        let copied = cache.overlay(full - 1024, &mut buf).await;
        assert_eq!(copied, 2);
        assert!(buf[..512].iter().all(|&b| b == 0));
        assert!(buf[512..1024].iter().all(|&b| b == 7));
        assert!(buf[1024..1536].iter().all(|&b| b == 8));
        assert!(buf[1536..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_oldest_entry_age() {
        let (cache, _) = cache();
        assert!(cache.oldest_entry_age().await.is_none());
        cache.merge_write(0, &[1; 512]).await.unwrap();
        let age = cache.oldest_entry_age().await.unwrap();
        assert!(age >= chrono::Duration::zero());
    }
}
