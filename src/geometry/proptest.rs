//! Property-Based Tests for Stripe Geometry
//!
//! # Test Properties
//!
//! 1. **No Aliasing**: parity, Q and every data ordinal land on distinct disks
//! 2. **Coverage**: a stripe touches every member exactly once
//! 3. **Stripe Stability**: every offset inside a chunk group resolves the same parity disk

#![cfg(test)]

use std::collections::HashSet;

use proptest::prelude::*;

use super::StripeGeometry;
use crate::array::{ArrayConfig, Layout, RaidLevel};

fn parity_level_strategy() -> impl Strategy<Value = RaidLevel> {
    prop_oneof![
        Just(RaidLevel::Raid4),
        Just(RaidLevel::Raid5),
        Just(RaidLevel::Raid6),
    ]
}

fn layout_strategy() -> impl Strategy<Value = Layout> {
    prop::sample::select(Layout::ALL.to_vec())
}

fn geometry_strategy() -> impl Strategy<Value = StripeGeometry> {
    (parity_level_strategy(), 0usize..14, layout_strategy(), 1u32..=256).prop_map(
        |(level, extra, layout, chunk_sectors)| {
            let disks = level.min_disks() + extra;
            let config = ArrayConfig::new(level, disks, chunk_sectors, 0).with_layout(layout);
            StripeGeometry::new(&config).expect("generated geometry is valid")
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: parity and data never alias within a stripe.
    #[test]
    fn prop_parity_and_data_never_alias(
        geo in geometry_strategy(),
        stripe in 0u64..4096,
    ) {
        let offset = stripe * geo.full_chunk_bytes();
        let disks = geo.stripe_disks(offset);

        let mut seen = HashSet::new();
        prop_assert!(seen.insert(disks.parity));
        if let Some(q) = disks.q {
            prop_assert!(seen.insert(q), "Q aliases parity");
        }
        for (row, disk) in disks.data.iter().enumerate() {
            prop_assert!(*disk < geo.raid_disks(), "row {} mapped past the array", row);
            prop_assert!(seen.insert(*disk), "row {} aliases disk {}", row, disk);
        }

        prop_assert_eq!(seen.len(), geo.raid_disks());
    }

    /// Property: every byte of a chunk group resolves to the same parity disk.
    #[test]
    fn prop_parity_stable_within_stripe(
        geo in geometry_strategy(),
        stripe in 0u64..4096,
        frac in 0.0f64..1.0,
    ) {
        let base = stripe * geo.full_chunk_bytes();
        let within = (frac * geo.full_chunk_bytes() as f64) as u64;
        prop_assert_eq!(geo.parity_disk_for(base), geo.parity_disk_for(base + within));
    }

    /// Property: a located byte never lands on the parity or Q disk.
    #[test]
    fn prop_locate_avoids_redundancy(
        geo in geometry_strategy(),
        offset in 0u64..(1u64 << 36),
    ) {
        let loc = geo.locate(offset);
        let parity = geo.parity_disk_for(offset);
        prop_assert_ne!(loc.disk, parity);
        if let Some(q) = geo.q_disk_for(parity) {
            prop_assert_ne!(loc.disk, q);
        }
        prop_assert!(loc.row < geo.data_disks());
        prop_assert!(loc.member_offset < (loc.stripe + 1) * geo.chunk_bytes());
    }
}
