//! Parity Finalization
//!
//! Once a chunk group is whole, a [`ParityFinalizer`] computes its redundancy
//! and writes it out together with the host data. Two reference writers ship
//! with the crate:
//!
//! - [`XorParityWriter`] for RAID-4 and RAID-5: `P = D0 ^ D1 ^ ... ^ Dn-1`
//! - [`PqParityWriter`] for RAID-6: the same P plus
//!   `Q = g^0·D0 ^ g^1·D1 ^ ... ^ g^(n-1)·Dn-1` over GF(2^8), `g = 2`
//!
//! Both only touch sector columns some row has written; untouched columns are
//! left alone on every member.

mod pq;
mod xor;

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;

use crate::array::{RaidLevel, SECTOR_SIZE};
use crate::cache::{ColumnMask, SectorBitmap};
use crate::domain::ports::MemberDisk;
use crate::error::{Error, Result};
use crate::geometry::{StripeDisks, StripeGeometry};
use crate::reconcile::dispatch::{wait_all, write_all};

pub use pq::{q_coefficient, PqParityWriter};
pub use xor::XorParityWriter;

// =============================================================================
// Port
// =============================================================================

/// A reconciled chunk group, borrowed from its cache entry.
#[derive(Debug, Clone, Copy)]
pub struct CompletedStripe<'a> {
    pub chunk_offset: u64,
    pub stripe: u64,
    pub disks: &'a StripeDisks,
    /// Rows concatenated in data-ordinal order
    pub data: &'a [u8],
    pub row_bytes: usize,
    /// Sectors the host never wrote (their contents came from disk)
    pub pending: &'a SectorBitmap,
    /// Columns written on at least one row
    pub touched: &'a ColumnMask,
}

impl<'a> CompletedStripe<'a> {
    pub fn rows(&self) -> usize {
        self.disks.data.len()
    }

    pub fn row(&self, row: usize) -> &'a [u8] {
        &self.data[row * self.row_bytes..(row + 1) * self.row_bytes]
    }

    /// Bytes of `row` covering sector columns `cols`.
    pub fn row_columns(&self, row: usize, cols: &Range<usize>) -> &'a [u8] {
        &self.row(row)[cols.start * SECTOR_SIZE..cols.end * SECTOR_SIZE]
    }

    /// Runs of columns the host wrote on `row` within the touched set.
    pub fn written_runs(&self, row: usize) -> Vec<Range<usize>> {
        self.touched
            .and_not_row(self.pending.row_words(row))
            .runs()
            .collect()
    }
}

/// Writes issued by one finalize call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizeSummary {
    pub parity_writes: usize,
    pub data_writes: usize,
    pub bytes_written: u64,
}

/// Computes parity for a completed stripe and issues the final writes.
#[async_trait]
pub trait ParityFinalizer: Send + Sync {
    async fn finalize(&self, stripe: &CompletedStripe<'_>) -> Result<FinalizeSummary>;
}

/// Reference finalizer matching the array's level.
pub fn finalizer_for(
    geometry: &StripeGeometry,
    disks: &[Arc<dyn MemberDisk>],
) -> Result<Arc<dyn ParityFinalizer>> {
    let writer = MemberWriter::new(geometry, disks);
    match geometry.level() {
        RaidLevel::Raid4 | RaidLevel::Raid5 => Ok(Arc::new(XorParityWriter::new(writer))),
        RaidLevel::Raid6 => Ok(Arc::new(PqParityWriter::new(writer))),
        level => Err(Error::UnsupportedLevel(format!(
            "no parity finalizer for {}",
            level
        ))),
    }
}

// =============================================================================
// Member Writes
// =============================================================================

/// One sector run bound for a member.
#[derive(Debug)]
struct WriteOp<'a> {
    disk: usize,
    column: usize,
    buf: &'a [u8],
    parity: bool,
}

/// Member table plus the stripe-to-member address mapping.
#[derive(Clone)]
pub struct MemberWriter {
    geometry: StripeGeometry,
    disks: Vec<Arc<dyn MemberDisk>>,
}

impl MemberWriter {
    pub fn new(geometry: &StripeGeometry, disks: &[Arc<dyn MemberDisk>]) -> Self {
        Self {
            geometry: geometry.clone(),
            disks: disks.to_vec(),
        }
    }

    /// Host-written data runs of every row.
    fn data_ops<'a>(&self, stripe: &CompletedStripe<'a>) -> Vec<WriteOp<'a>> {
        let mut ops = Vec::new();
        for row in 0..stripe.rows() {
            for cols in stripe.written_runs(row) {
                ops.push(WriteOp {
                    disk: stripe.disks.data[row],
                    column: cols.start,
                    buf: stripe.row_columns(row, &cols),
                    parity: false,
                });
            }
        }
        ops
    }

    /// Issue `ops` concurrently and wait for all of them.
    async fn submit(&self, stripe: u64, ops: Vec<WriteOp<'_>>) -> Result<FinalizeSummary> {
        let mut summary = FinalizeSummary::default();
        for op in &ops {
            if op.parity {
                summary.parity_writes += 1;
            } else {
                summary.data_writes += 1;
            }
            summary.bytes_written += op.buf.len() as u64;
        }

        let writes = ops.iter().map(|op| {
            let disk = self.disks[op.disk].as_ref();
            let offset = disk.data_offset() + self.geometry.member_offset(stripe, op.column);
            write_all(disk, offset, op.buf)
        });
        wait_all(writes).await.into_result()?;
        Ok(summary)
    }
}
