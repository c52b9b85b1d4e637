//! Parity and data placement for striped arrays.

use crate::array::{ArrayConfig, Layout, RaidLevel, SECTOR_SIZE_U64};
use crate::error::Result;

/// Where one byte of logical data lives on the members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLocation {
    /// Stripe index (chunk group number)
    pub stripe: u64,
    /// Data ordinal within the stripe
    pub row: usize,
    /// Physical member index
    pub disk: usize,
    /// Byte offset on the member, relative to its data area
    pub member_offset: u64,
}

/// Member roles for one stripe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeDisks {
    pub parity: usize,
    pub q: Option<usize>,
    /// Physical disk for each data ordinal
    pub data: Vec<usize>,
}

/// Geometry snapshot derived from an [`ArrayConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeGeometry {
    level: RaidLevel,
    layout: Layout,
    raid_disks: usize,
    data_disks: usize,
    chunk_sectors: u32,
    chunk_bytes: u64,
    full_chunk_bytes: u64,
}

impl StripeGeometry {
    /// Build a resolver from a validated configuration.
    pub fn new(config: &ArrayConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            level: config.level,
            layout: config.layout,
            raid_disks: config.raid_disks,
            data_disks: config.data_disk_count(),
            chunk_sectors: config.chunk_sectors,
            chunk_bytes: config.chunk_bytes(),
            full_chunk_bytes: config.full_chunk_bytes(),
        })
    }

    pub fn level(&self) -> RaidLevel {
        self.level
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn raid_disks(&self) -> usize {
        self.raid_disks
    }

    pub fn data_disks(&self) -> usize {
        self.data_disks
    }

    /// Sectors per data-disk row.
    pub fn chunk_sectors(&self) -> usize {
        self.chunk_sectors as usize
    }

    pub fn chunk_bytes(&self) -> u64 {
        self.chunk_bytes
    }

    /// Bytes of data in one stripe (a chunk on every data disk).
    pub fn full_chunk_bytes(&self) -> u64 {
        self.full_chunk_bytes
    }

    /// Start of the chunk group containing `offset`.
    ///
    /// Unstriped arrays (chunk size 0) are a single group starting at 0.
    pub fn chunk_offset_of(&self, offset: u64) -> u64 {
        match self.full_chunk_bytes {
            0 => 0,
            full => offset - offset % full,
        }
    }

    /// Stripe index of the chunk group containing `offset`.
    pub fn stripe_index(&self, offset: u64) -> u64 {
        offset.checked_div(self.full_chunk_bytes).unwrap_or(0)
    }

    /// Disk holding parity (P) for the stripe containing `offset`.
    ///
    /// RAID-4 keeps parity on the last member. RAID-5 and RAID-6 rotate it
    /// with the stripe index, upwards for right layouts and downwards for
    /// left layouts. Levels without parity map to 0.
    pub fn parity_disk_for(&self, offset: u64) -> usize {
        let n = self.raid_disks as u64;
        match self.level {
            RaidLevel::Raid4 => self.raid_disks - 1,
            RaidLevel::Raid5 | RaidLevel::Raid6 => {
                let d = (offset / self.full_chunk_bytes) % n;
                if self.layout.is_right() {
                    d as usize
                } else {
                    (n - 1 - d) as usize
                }
            }
            _ => 0,
        }
    }

    /// Disk holding the RAID-6 Q syndrome, which always follows P.
    pub fn q_disk_for(&self, parity: usize) -> Option<usize> {
        match self.level {
            RaidLevel::Raid6 => Some((parity + 1) % self.raid_disks),
            _ => None,
        }
    }

    /// Physical slot of data ordinal `stripe_local` in a stripe whose parity
    /// lives on `parity`. Skips the parity slot, and the Q slot for RAID-6.
    pub fn physical_disk_for(&self, stripe_local: usize, parity: usize) -> usize {
        let n = self.raid_disks;
        match self.level {
            RaidLevel::Raid6 => {
                let q = (parity + 1) % n;
                if self.layout.is_asymmetric() {
                    stripe_local
                        + if q == 0 {
                            1
                        } else if stripe_local >= parity {
                            2
                        } else {
                            0
                        }
                } else {
                    (parity + stripe_local + 2) % n
                }
            }
            RaidLevel::Raid5 if self.layout.is_asymmetric() => {
                stripe_local + usize::from(stripe_local >= parity)
            }
            RaidLevel::Raid4 | RaidLevel::Raid5 => (parity + stripe_local + 1) % n,
            _ => stripe_local,
        }
    }

    /// Parity, Q and data placement for the stripe containing `offset`.
    pub fn stripe_disks(&self, offset: u64) -> StripeDisks {
        let parity = self.parity_disk_for(offset);
        StripeDisks {
            parity,
            q: self.q_disk_for(parity),
            data: (0..self.data_disks)
                .map(|row| self.physical_disk_for(row, parity))
                .collect(),
        }
    }

    /// Byte offset on a member (relative to its data area) of sector column
    /// `column` in stripe `stripe`.
    pub fn member_offset(&self, stripe: u64, column: usize) -> u64 {
        stripe * self.chunk_bytes + column as u64 * SECTOR_SIZE_U64
    }

    /// Resolve a logical array offset to its member location.
    ///
    /// Unstriped arrays resolve to the first member at the same offset.
    pub fn locate(&self, offset: u64) -> DataLocation {
        if self.full_chunk_bytes == 0 {
            return DataLocation {
                stripe: 0,
                row: 0,
                disk: 0,
                member_offset: offset,
            };
        }
        let stripe = offset / self.full_chunk_bytes;
        let within = offset % self.full_chunk_bytes;
        let row = (within / self.chunk_bytes) as usize;
        let disk = if self.level.has_parity() {
            self.physical_disk_for(row, self.parity_disk_for(offset))
        } else {
            row
        };
        DataLocation {
            stripe,
            row,
            disk,
            member_offset: stripe * self.chunk_bytes + within % self.chunk_bytes,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const KIB: u64 = 1024;

    fn geometry(level: RaidLevel, disks: usize, chunk_sectors: u32, layout: Layout) -> StripeGeometry {
        let config = ArrayConfig::new(level, disks, chunk_sectors, 0).with_layout(layout);
        StripeGeometry::new(&config).unwrap()
    }

    #[test]
    fn test_raid5_right_symmetric_scenario() {
        // 4 disks, 64 KiB chunks
        let geo = geometry(RaidLevel::Raid5, 4, 128, Layout::RightSymmetric);
        let stripe_10 = 10 * geo.full_chunk_bytes();

        assert_eq!(geo.full_chunk_bytes(), 3 * 64 * KIB);
        assert_eq!(geo.parity_disk_for(stripe_10), 2);
        assert_eq!(geo.physical_disk_for(0, 2), 3);
        assert_eq!(geo.physical_disk_for(1, 2), 0);
        assert_eq!(geo.physical_disk_for(2, 2), 1);
    }

    #[test]
    fn test_raid5_left_symmetric_rotation() {
        let geo = geometry(RaidLevel::Raid5, 4, 8, Layout::LeftSymmetric);
        let full = geo.full_chunk_bytes();

        let s0 = geo.stripe_disks(0);
        assert_eq!(s0.parity, 3);
        assert_eq!(s0.data, vec![0, 1, 2]);

        let s1 = geo.stripe_disks(full);
        assert_eq!(s1.parity, 2);
        assert_eq!(s1.data, vec![3, 0, 1]);

        let s4 = geo.stripe_disks(4 * full);
        assert_eq!(s4, s0);
    }

    #[test]
    fn test_raid5_left_asymmetric_keeps_order() {
        let geo = geometry(RaidLevel::Raid5, 4, 8, Layout::LeftAsymmetric);
        let full = geo.full_chunk_bytes();

        let s1 = geo.stripe_disks(full);
        assert_eq!(s1.parity, 2);
        assert_eq!(s1.data, vec![0, 1, 3]);
    }

    #[test]
    fn test_raid4_parity_is_last_disk() {
        let geo = geometry(RaidLevel::Raid4, 5, 8, Layout::RightSymmetric);
        for stripe in 0..10 {
            let disks = geo.stripe_disks(stripe * geo.full_chunk_bytes());
            assert_eq!(disks.parity, 4);
            assert_eq!(disks.q, None);
            assert_eq!(disks.data, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn test_raid6_q_follows_parity() {
        let geo = geometry(RaidLevel::Raid6, 5, 8, Layout::LeftSymmetric);

        let s0 = geo.stripe_disks(0);
        assert_eq!(s0.parity, 4);
        assert_eq!(s0.q, Some(0));
        assert_eq!(s0.data, vec![1, 2, 3]);

        let s1 = geo.stripe_disks(geo.full_chunk_bytes());
        assert_eq!(s1.parity, 3);
        assert_eq!(s1.q, Some(4));
        assert_eq!(s1.data, vec![0, 1, 2]);
    }

    #[test]
    fn test_raid6_asymmetric_wraps_q_to_zero() {
        let geo = geometry(RaidLevel::Raid6, 5, 8, Layout::RightAsymmetric);
        let full = geo.full_chunk_bytes();

        // stripe 4: parity on 4, Q wraps to 0
        let s4 = geo.stripe_disks(4 * full);
        assert_eq!(s4.parity, 4);
        assert_eq!(s4.q, Some(0));
        assert_eq!(s4.data, vec![1, 2, 3]);

        // stripe 1: parity on 1, Q on 2
        let s1 = geo.stripe_disks(full);
        assert_eq!(s1.data, vec![0, 3, 4]);
    }

    #[test]
    fn test_parity_divisor_uses_data_disks() {
        let geo = geometry(RaidLevel::Raid6, 6, 8, Layout::RightSymmetric);
        let full = 4 * 8 * 512;
        assert_eq!(geo.full_chunk_bytes(), full);
        assert_eq!(geo.parity_disk_for(full - 1), 0);
        assert_eq!(geo.parity_disk_for(full), 1);
        assert_eq!(geo.parity_disk_for(6 * full), 0);
    }

    #[test]
    fn test_chunk_offset_and_stripe_index() {
        let geo = geometry(RaidLevel::Raid5, 4, 8, Layout::LeftSymmetric);
        let full = geo.full_chunk_bytes();
        assert_eq!(geo.chunk_offset_of(full + 1024), full);
        assert_eq!(geo.stripe_index(full * 7 + 5), 7);
        assert_eq!(geo.member_offset(3, 2), 3 * 4096 + 1024);
    }

    #[test]
    fn test_locate() {
        let geo = geometry(RaidLevel::Raid5, 4, 8, Layout::LeftSymmetric);
        let full = geo.full_chunk_bytes();

        // stripe 1, second data row, 1 KiB into the chunk
        let loc = geo.locate(full + 4096 + 1024);
        assert_eq!(loc.stripe, 1);
        assert_eq!(loc.row, 1);
        assert_eq!(loc.disk, 0);
        assert_eq!(loc.member_offset, 4096 + 1024);
    }

    #[test]
    fn test_unstriped_levels_form_one_group() {
        for level in [RaidLevel::Linear, RaidLevel::Raid1] {
            let geo = geometry(level, 2, 0, Layout::LeftSymmetric);
            assert_eq!(geo.full_chunk_bytes(), 0);
            assert_eq!(geo.chunk_offset_of(123 * 512), 0);
            assert_eq!(geo.stripe_index(123 * 512), 0);
            assert_eq!(geo.parity_disk_for(123 * 512), 0);

            let loc = geo.locate(5 * 512);
            assert_eq!(loc.stripe, 0);
            assert_eq!(loc.disk, 0);
            assert_eq!(loc.member_offset, 5 * 512);
        }
    }

    #[test]
    fn test_locate_raid0() {
        let geo = geometry(RaidLevel::Raid0, 3, 8, Layout::LeftSymmetric);
        let loc = geo.locate(2 * 4096 + 512);
        assert_eq!(loc.disk, 2);
        assert_eq!(loc.member_offset, 512);
    }
}
