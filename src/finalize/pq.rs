//! Dual-parity finalizer for RAID-6.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reed_solomon_erasure::galois_8;
use tracing::{debug, instrument};

use super::{CompletedStripe, FinalizeSummary, MemberWriter, ParityFinalizer, WriteOp};
use crate::array::SECTOR_SIZE;
use crate::bitwise::xor_bytes;
use crate::error::{Error, Result};
use crate::reconcile::dispatch::try_zeroed;

/// Powers of the generator 2 in GF(2^8), polynomial 0x11D.
static GEN_POWERS: Lazy<[u8; 255]> = Lazy::new(|| {
    let mut table = [0u8; 255];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = galois_8::exp(2, i);
    }
    table
});

/// Q coefficient of data ordinal `row`.
pub fn q_coefficient(row: usize) -> u8 {
    GEN_POWERS[row % 255]
}

/// Writes P and the Q syndrome for every touched column run.
pub struct PqParityWriter {
    members: MemberWriter,
}

impl PqParityWriter {
    pub fn new(members: MemberWriter) -> Self {
        Self { members }
    }
}

#[async_trait]
impl ParityFinalizer for PqParityWriter {
    #[instrument(skip(self, stripe), fields(stripe = stripe.stripe, parity = stripe.disks.parity))]
    async fn finalize(&self, stripe: &CompletedStripe<'_>) -> Result<FinalizeSummary> {
        let q_disk = stripe
            .disks
            .q
            .ok_or_else(|| Error::Internal("dual-parity stripe without a Q disk".into()))?;

        let mut syndromes = Vec::new();
        for cols in stripe.touched.runs() {
            let len = cols.len() * SECTOR_SIZE;
            let mut p = try_zeroed(len)?;
            let mut q = try_zeroed(len)?;
            for row in 0..stripe.rows() {
                let data = stripe.row_columns(row, &cols);
                xor_bytes(&mut p, data);
                galois_8::mul_slice_xor(q_coefficient(row), data, &mut q);
            }
            syndromes.push((cols.start, p, q));
        }

        let mut ops: Vec<WriteOp<'_>> = Vec::with_capacity(2 * syndromes.len());
        for (column, p, q) in &syndromes {
            ops.push(WriteOp {
                disk: stripe.disks.parity,
                column: *column,
                buf: p,
                parity: true,
            });
            ops.push(WriteOp {
                disk: q_disk,
                column: *column,
                buf: q,
                parity: true,
            });
        }
        ops.extend(self.members.data_ops(stripe));

        debug!(writes = ops.len(), q = q_disk, "Writing P, Q and data");
        self.members.submit(stripe.stripe, ops).await
    }
}
