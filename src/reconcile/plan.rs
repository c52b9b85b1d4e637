//! Minimal read set computation.

use crate::array::SECTOR_SIZE;
use crate::cache::{ColumnMask, PartialChunkEntry};
use crate::geometry::{StripeDisks, StripeGeometry};

/// One contiguous read needed to complete a data-disk row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructionRequest {
    /// Data ordinal of the row being completed
    pub row: usize,
    /// Physical member to read from
    pub disk: usize,
    /// Absolute byte offset on the member, data offset included
    pub offset: u64,
    /// First sector column of the run; the destination in the entry buffer
    pub column: usize,
    /// Run length in sectors
    pub sectors: usize,
}

impl ReconstructionRequest {
    pub fn len(&self) -> usize {
        self.sectors * SECTOR_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.sectors == 0
    }
}

/// Everything reconciliation needs to know about one entry.
#[derive(Debug, Clone)]
pub struct ReadPlan {
    pub chunk_offset: u64,
    pub stripe: u64,
    pub disks: StripeDisks,
    /// Columns written on at least one row
    pub touched: ColumnMask,
    pub requests: Vec<ReconstructionRequest>,
}

impl ReadPlan {
    /// Work out which sectors must be read to make every touched column
    /// whole.
    ///
    /// Columns no row has written are skipped entirely. In every other
    /// column, each row still pending there needs its sector from disk. Runs
    /// come out of the column scan maximal, so sectors that sit next to each
    /// other on the same member always share one request.
    pub fn build(geometry: &StripeGeometry, entry: &PartialChunkEntry, data_offsets: &[u64]) -> Self {
        let chunk_offset = entry.chunk_offset();
        let stripe = geometry.stripe_index(chunk_offset);
        let disks = geometry.stripe_disks(chunk_offset);
        let pending = entry.pending();

        let touched = pending.untouched_columns().complement();

        let mut requests = Vec::new();
        for row in 0..pending.rows() {
            let disk = disks.data[row];
            let needed = touched.and_row(pending.row_words(row));
            for run in needed.runs() {
                requests.push(ReconstructionRequest {
                    row,
                    disk,
                    offset: data_offsets[disk] + geometry.member_offset(stripe, run.start),
                    column: run.start,
                    sectors: run.len(),
                });
            }
        }

        Self {
            chunk_offset,
            stripe,
            disks,
            touched,
            requests,
        }
    }

    /// Total sectors the plan reads.
    pub fn sectors(&self) -> usize {
        self.requests.iter().map(|r| r.sectors).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
