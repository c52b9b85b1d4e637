//! One in-flight chunk group.

use chrono::{DateTime, Utc};

use super::bitmap::SectorBitmap;
use crate::array::SECTOR_SIZE;
use crate::error::{Error, Result};

/// A chunk group that has received partial writes and whose parity is not yet
/// consistent with its data.
///
/// The buffer holds one row per data disk, rows concatenated in data-ordinal
/// order. The bitmap tracks which sectors have been written by the host.
#[derive(Debug)]
pub struct PartialChunkEntry {
    chunk_offset: u64,
    row_bytes: usize,
    data: Vec<u8>,
    pending: SectorBitmap,
    created_at: DateTime<Utc>,
}

impl PartialChunkEntry {
    /// Allocate an entry with every sector pending.
    ///
    /// Fails with [`Error::ResourceExhausted`] instead of aborting when the
    /// buffer cannot be allocated.
    pub fn try_new(chunk_offset: u64, data_disks: usize, chunk_sectors: usize) -> Result<Self> {
        let row_bytes = chunk_sectors * SECTOR_SIZE;
        let size = row_bytes * data_disks;

        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| Error::ResourceExhausted { size })?;
        data.resize(size, 0);

        Ok(Self {
            chunk_offset,
            row_bytes,
            data,
            pending: SectorBitmap::try_new_pending(data_disks, chunk_sectors)?,
            created_at: Utc::now(),
        })
    }

    /// Logical offset of the first byte of the group.
    pub fn chunk_offset(&self) -> u64 {
        self.chunk_offset
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pending(&self) -> &SectorBitmap {
        &self.pending
    }

    pub fn rows(&self) -> usize {
        self.pending.rows()
    }

    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    /// Bytes of data-disk row `row`.
    pub fn row(&self, row: usize) -> &[u8] {
        &self.data[row * self.row_bytes..(row + 1) * self.row_bytes]
    }

    /// Copy `bytes` into the buffer at the group-relative offset `rel` and
    /// mark the covered sectors written.
    ///
    /// Returns the number of sectors that were pending before the merge.
    pub fn merge(&mut self, rel: usize, bytes: &[u8]) -> Result<usize> {
        if rel % SECTOR_SIZE != 0 || bytes.len() % SECTOR_SIZE != 0 {
            return Err(Error::InvalidParameter(format!(
                "merge at {} of {} bytes is not sector aligned",
                rel,
                bytes.len()
            )));
        }
        let end = rel
            .checked_add(bytes.len())
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "merge at {} of {} bytes overruns the {}-byte chunk group",
                    rel,
                    bytes.len(),
                    self.data.len()
                ))
            })?;

        self.data[rel..end].copy_from_slice(bytes);
        Ok(self
            .pending
            .clear_range(rel / SECTOR_SIZE, bytes.len() / SECTOR_SIZE))
    }

    /// Every sector of every row has been written.
    pub fn is_complete(&self) -> bool {
        self.pending.is_clear()
    }

    /// Copy reconstructed bytes into row `row` starting at sector `col`.
    /// Does not touch the bitmap: reconstructed sectors are not host writes.
    pub(crate) fn fill_row(&mut self, row: usize, col: usize, bytes: &[u8]) {
        let start = row * self.row_bytes + col * SECTOR_SIZE;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Overwrite the parts of `buf` (which starts at group-relative offset
    /// `rel`) that this entry holds as host-written. Returns sectors copied.
    pub fn overlay_into(&self, rel: usize, buf: &mut [u8]) -> usize {
        let first = rel / SECTOR_SIZE;
        let count = buf.len() / SECTOR_SIZE;
        let mut copied = 0;

        for i in 0..count {
            let sector = first + i;
            if sector >= self.pending.len() {
                break;
            }
            if !self.pending.is_pending_flat(sector) {
                let src = sector * SECTOR_SIZE;
                buf[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]
                    .copy_from_slice(&self.data[src..src + SECTOR_SIZE]);
                copied += 1;
            }
        }

        copied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_new_entry_is_all_pending() {
        let entry = PartialChunkEntry::try_new(3 * 12288, 3, 8).unwrap();
        assert_eq!(entry.data().len(), 3 * 4096);
        assert_eq!(entry.pending().count_pending(), 24);
        assert!(!entry.is_complete());
        assert_eq!(entry.rows(), 3);
    }

    #[test]
    fn test_merge_copies_and_clears() {
        let mut entry = PartialChunkEntry::try_new(0, 2, 4).unwrap();
        let cleared = entry.merge(1024, &[0xab; 1536]).unwrap();
        assert_eq!(cleared, 3);
        assert!(entry.data()[1024..2560].iter().all(|&b| b == 0xab));
        assert!(entry.data()[..1024].iter().all(|&b| b == 0));
        // sector 4 is row 1, column 0
        assert!(!entry.pending().is_pending(1, 0));
        assert!(entry.pending().is_pending(1, 1));
    }

    #[test]
    fn test_merge_rewrite_updates_data_only() {
        let mut entry = PartialChunkEntry::try_new(0, 2, 4).unwrap();
        entry.merge(0, &[1; 512]).unwrap();
        let bitmap = entry.pending().clone();
        assert_eq!(entry.merge(0, &[2; 512]).unwrap(), 0);
        assert_eq!(entry.pending(), &bitmap);
        assert_eq!(entry.data()[0], 2);
    }

    #[test]
    fn test_merge_completes_entry() {
        let mut entry = PartialChunkEntry::try_new(0, 2, 4).unwrap();
        entry.merge(2048, &[1; 2048]).unwrap();
        assert!(!entry.is_complete());
        entry.merge(0, &[1; 2048]).unwrap();
        assert!(entry.is_complete());
    }

    #[test]
    fn test_merge_rejects_bad_ranges() {
        let mut entry = PartialChunkEntry::try_new(0, 2, 4).unwrap();
        assert_matches!(entry.merge(100, &[0; 512]), Err(Error::InvalidParameter(_)));
        assert_matches!(entry.merge(0, &[0; 100]), Err(Error::InvalidParameter(_)));
        assert_matches!(entry.merge(3584, &[0; 1024]), Err(Error::InvalidParameter(_)));
        assert_eq!(entry.pending().count_pending(), 8);
    }

    #[test]
    fn test_fill_row_leaves_bitmap() {
        let mut entry = PartialChunkEntry::try_new(0, 3, 4).unwrap();
        entry.fill_row(2, 1, &[7; 1024]);
        assert_eq!(entry.row(2)[512], 7);
        assert_eq!(entry.row(2)[1535], 7);
        assert_eq!(entry.row(2)[1536], 0);
        assert_eq!(entry.pending().count_pending(), 12);
    }

    #[test]
    fn test_overlay_into() {
        let mut entry = PartialChunkEntry::try_new(0, 2, 4).unwrap();
        entry.merge(512, &[9; 512]).unwrap();

        let mut buf = vec![1u8; 2048];
        assert_eq!(entry.overlay_into(0, &mut buf), 1);
        assert!(buf[..512].iter().all(|&b| b == 1));
        assert!(buf[512..1024].iter().all(|&b| b == 9));
        assert!(buf[1024..].iter().all(|&b| b == 1));
    }
}
