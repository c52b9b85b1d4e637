//! The reconciliation engine.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument, warn};

use super::dispatch::{read_exact, wait_all};
use super::plan::ReadPlan;
use crate::cache::PartialChunkEntry;
use crate::domain::ports::MemberDisk;
use crate::error::{Error, Result};
use crate::finalize::{CompletedStripe, FinalizeSummary, ParityFinalizer};
use crate::geometry::StripeGeometry;
use crate::metrics::ReconcileStats;

/// What one successful reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub read_requests: usize,
    pub sectors_read: usize,
    pub finalize: FinalizeSummary,
}

/// Completes partially written chunk groups and hands them to the parity
/// finalizer.
pub struct ReconciliationEngine {
    geometry: StripeGeometry,
    disks: Vec<Arc<dyn MemberDisk>>,
    data_offsets: Vec<u64>,
    finalizer: Arc<dyn ParityFinalizer>,
    stats: Arc<ReconcileStats>,
}

impl ReconciliationEngine {
    /// Create an engine over the ordered member table.
    ///
    /// `disks[i]` must be the member with index `i`.
    pub fn new(
        geometry: StripeGeometry,
        disks: Vec<Arc<dyn MemberDisk>>,
        finalizer: Arc<dyn ParityFinalizer>,
        stats: Arc<ReconcileStats>,
    ) -> Result<Self> {
        if !geometry.level().has_parity() {
            return Err(Error::UnsupportedLevel(format!(
                "{} has no parity to reconcile",
                geometry.level()
            )));
        }
        if disks.len() != geometry.raid_disks() {
            return Err(Error::InvalidGeometry(format!(
                "{} member disks for a {}-disk array",
                disks.len(),
                geometry.raid_disks()
            )));
        }
        if let Some((pos, disk)) = disks.iter().enumerate().find(|(i, d)| d.index() != *i) {
            return Err(Error::InvalidGeometry(format!(
                "member table slot {} holds disk {}",
                pos,
                disk.index()
            )));
        }

        let data_offsets = disks.iter().map(|d| d.data_offset()).collect();
        Ok(Self {
            geometry,
            disks,
            data_offsets,
            finalizer,
            stats,
        })
    }

    pub fn geometry(&self) -> &StripeGeometry {
        &self.geometry
    }

    pub fn stats(&self) -> &Arc<ReconcileStats> {
        &self.stats
    }

    /// The reads reconciling `entry` right now would issue.
    pub fn plan(&self, entry: &PartialChunkEntry) -> ReadPlan {
        ReadPlan::build(&self.geometry, entry, &self.data_offsets)
    }

    /// Fill every touched column of `entry` from disk and finalize it.
    ///
    /// All reads land in scratch buffers first; the entry is only written to
    /// once every read has succeeded, so a failure leaves it unchanged. The
    /// caller evicts the entry on success.
    #[instrument(skip(self, entry), fields(chunk_offset = entry.chunk_offset()))]
    pub async fn reconcile(&self, entry: &mut PartialChunkEntry) -> Result<ReconcileReport> {
        let start = Instant::now();
        let result = self.reconcile_inner(entry).await;
        self.stats.record_reconcile(start.elapsed(), result.is_ok());
        result
    }

    async fn reconcile_inner(&self, entry: &mut PartialChunkEntry) -> Result<ReconcileReport> {
        let plan = self.plan(entry);
        debug!(
            stripe = plan.stripe,
            parity = plan.disks.parity,
            requests = plan.requests.len(),
            sectors = plan.sectors(),
            "Reconstruction plan"
        );

        if !plan.is_empty() {
            let reads = plan
                .requests
                .iter()
                .map(|req| read_exact(self.disks[req.disk].as_ref(), req.offset, req.len()));
            let completion = wait_all(reads).await;
            let sectors_read = if completion.failures == 0 { plan.sectors() } else { 0 };
            self.stats.record_reads(
                plan.requests.len() as u64,
                sectors_read as u64,
                completion.failures as u64,
            );

            let buffers = completion.into_result().inspect_err(|e| {
                warn!(chunk_offset = plan.chunk_offset, error = %e, "Reconstruction reads failed");
            })?;
            for (req, buf) in plan.requests.iter().zip(&buffers) {
                entry.fill_row(req.row, req.column, buf);
            }
        }

        let stripe = CompletedStripe {
            chunk_offset: plan.chunk_offset,
            stripe: plan.stripe,
            disks: &plan.disks,
            data: entry.data(),
            row_bytes: entry.row_bytes(),
            pending: entry.pending(),
            touched: &plan.touched,
        };

        let summary = match self.finalizer.finalize(&stripe).await {
            Ok(summary) => {
                self.stats.record_writes(
                    summary.parity_writes as u64,
                    summary.data_writes as u64,
                    0,
                );
                summary
            }
            Err(err) => {
                self.stats.record_writes(0, 0, 1);
                warn!(chunk_offset = plan.chunk_offset, error = %err, "Parity finalization failed");
                return Err(err);
            }
        };

        Ok(ReconcileReport {
            read_requests: plan.requests.len(),
            sectors_read: plan.sectors(),
            finalize: summary,
        })
    }
}
