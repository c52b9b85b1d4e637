//! Single-parity finalizer for RAID-4 and RAID-5.

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{CompletedStripe, FinalizeSummary, MemberWriter, ParityFinalizer, WriteOp};
use crate::array::SECTOR_SIZE;
use crate::bitwise::xor_bytes;
use crate::error::Result;
use crate::reconcile::dispatch::try_zeroed;

/// Writes `P = XOR of all data rows` for every touched column run.
pub struct XorParityWriter {
    members: MemberWriter,
}

impl XorParityWriter {
    pub fn new(members: MemberWriter) -> Self {
        Self { members }
    }
}

#[async_trait]
impl ParityFinalizer for XorParityWriter {
    #[instrument(skip(self, stripe), fields(stripe = stripe.stripe, parity = stripe.disks.parity))]
    async fn finalize(&self, stripe: &CompletedStripe<'_>) -> Result<FinalizeSummary> {
        let mut parity_runs = Vec::new();
        for cols in stripe.touched.runs() {
            let mut parity = try_zeroed(cols.len() * SECTOR_SIZE)?;
            for row in 0..stripe.rows() {
                xor_bytes(&mut parity, stripe.row_columns(row, &cols));
            }
            parity_runs.push((cols.start, parity));
        }

        let mut ops: Vec<WriteOp<'_>> = parity_runs
            .iter()
            .map(|(column, parity)| WriteOp {
                disk: stripe.disks.parity,
                column: *column,
                buf: parity,
                parity: true,
            })
            .collect();
        ops.extend(self.members.data_ops(stripe));

        debug!(writes = ops.len(), "Writing parity and data");
        self.members.submit(stripe.stripe, ops).await
    }
}
