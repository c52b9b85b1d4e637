//! Reference per-level handler for parity arrays with every member present.
//!
//! Reads are split at chunk boundaries and each piece goes to the member
//! holding it. Full-stripe writes compute parity over the whole group and go
//! through the same finalizer the reconciliation path uses.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::array::SECTOR_SIZE_U64;
use crate::cache::{ColumnMask, SectorBitmap};
use crate::domain::ports::{LevelIo, MemberDisk};
use crate::error::{Error, Result};
use crate::finalize::{CompletedStripe, ParityFinalizer};
use crate::geometry::StripeGeometry;
use crate::reconcile::dispatch::{read_into, wait_all};

/// [`LevelIo`] for RAID-4/5/6 in the non-degraded state.
pub struct ParityArrayIo {
    geometry: StripeGeometry,
    disks: Vec<Arc<dyn MemberDisk>>,
    finalizer: Arc<dyn ParityFinalizer>,
}

impl ParityArrayIo {
    pub fn new(
        geometry: StripeGeometry,
        disks: Vec<Arc<dyn MemberDisk>>,
        finalizer: Arc<dyn ParityFinalizer>,
    ) -> Result<Self> {
        if !geometry.level().has_parity() {
            return Err(Error::UnsupportedLevel(format!(
                "parity array handler cannot serve {}",
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
        Ok(Self {
            geometry,
            disks,
            finalizer,
        })
    }

    fn check_group_aligned(&self, offset: u64, len: usize) -> Result<()> {
        let full = self.geometry.full_chunk_bytes();
        if offset % full != 0 || len as u64 % full != 0 {
            return Err(Error::InvalidParameter(format!(
                "{} bytes at {} is not a whole number of {}-byte chunk groups",
                len, offset, full
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LevelIo for ParityArrayIo {
    #[instrument(skip(self, buf), fields(len = buf.len()))]
    async fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if offset % SECTOR_SIZE_U64 != 0 || buf.len() as u64 % SECTOR_SIZE_U64 != 0 {
            return Err(Error::InvalidParameter(format!(
                "read of {} bytes at {} is not sector aligned",
                buf.len(),
                offset
            )));
        }

        let chunk = self.geometry.chunk_bytes();
        let mut reads = Vec::new();
        let mut rest: &mut [u8] = buf;
        let mut pos = offset;

        while !rest.is_empty() {
            let loc = self.geometry.locate(pos);
            let in_chunk = (chunk - pos % chunk) as usize;
            let piece = in_chunk.min(rest.len());
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(piece);
            let disk = self.disks[loc.disk].as_ref();
            reads.push(read_into(disk, disk.data_offset() + loc.member_offset, head));
            rest = tail;
            pos += piece as u64;
        }

        debug!(pieces = reads.len(), "Dispatching array read");
        wait_all(reads).await.into_result()?;
        Ok(())
    }

    async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_group_aligned(offset, data.len())?;
        let full = self.geometry.full_chunk_bytes() as usize;
        for (i, group) in data.chunks(full).enumerate() {
            self.write_full_stripe(offset + (i * full) as u64, group).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, data))]
    async fn write_full_stripe(&self, chunk_offset: u64, data: &[u8]) -> Result<()> {
        self.check_group_aligned(chunk_offset, data.len())?;
        if data.len() as u64 != self.geometry.full_chunk_bytes() {
            return Err(Error::InvalidParameter(format!(
                "full-stripe write of {} bytes, expected {}",
                data.len(),
                self.geometry.full_chunk_bytes()
            )));
        }

        let cols = self.geometry.chunk_sectors();
        let written = SectorBitmap::try_new_written(self.geometry.data_disks(), cols)?;
        let touched = ColumnMask::full(cols);
        let disks = self.geometry.stripe_disks(chunk_offset);

        let stripe = CompletedStripe {
            chunk_offset,
            stripe: self.geometry.stripe_index(chunk_offset),
            disks: &disks,
            data,
            row_bytes: self.geometry.chunk_bytes() as usize,
            pending: &written,
            touched: &touched,
        };
        self.finalizer.finalize(&stripe).await?;
        Ok(())
    }
}
