//! Property-Based Tests for the Partial-Chunk Cache
//!
//! # Test Properties
//!
//! 1. **Bitmap Idempotence**: merging the same range twice leaves the bitmap
//!    as merging it once
//! 2. **Full Coverage**: any partition of a chunk group into writes finalizes
//!    exactly once and leaves nothing cached
//! 3. **Concurrent Independence**: merges into distinct groups yield the same
//!    bitmaps whether run concurrently or sequentially

#![cfg(test)]

use std::sync::Arc;

use proptest::prelude::*;
use tokio_test::block_on;

use super::{MergeOutcome, PartialChunkCache, PartialChunkEntry};
use crate::adapters::mem_disk::{member_handles, MemDisk};
use crate::array::{ArrayConfig, Layout, RaidLevel, SECTOR_SIZE};
use crate::finalize::finalizer_for;
use crate::geometry::StripeGeometry;
use crate::metrics::ReconcileStats;
use crate::reconcile::ReconciliationEngine;

const DISKS: usize = 5;
const CHUNK_SECTORS: usize = 12;
const GROUP_SECTORS: usize = (DISKS - 1) * CHUNK_SECTORS;

fn cache() -> PartialChunkCache {
    let group = (GROUP_SECTORS * SECTOR_SIZE) as u64;
    let config = ArrayConfig::new(RaidLevel::Raid5, DISKS, CHUNK_SECTORS as u32, 16 * group)
        .with_layout(Layout::LeftAsymmetric);
    let geometry = StripeGeometry::new(&config).unwrap();
    let disks = MemDisk::array(DISKS, 16 * CHUNK_SECTORS as u64 * SECTOR_SIZE as u64);
    let handles = member_handles(&disks);
    let finalizer = finalizer_for(&geometry, &handles).unwrap();
    let engine =
        ReconciliationEngine::new(geometry, handles, finalizer, Arc::new(ReconcileStats::default()))
            .unwrap();
    PartialChunkCache::new(Arc::new(engine))
}

/// A sector range inside one group.
fn range_strategy() -> impl Strategy<Value = (usize, usize)> {
    (0..GROUP_SECTORS).prop_flat_map(|start| (Just(start), 1..=GROUP_SECTORS - start))
}

/// Cut points splitting a group into consecutive non-empty writes, shuffled.
fn partition_strategy() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::btree_set(1..GROUP_SECTORS, 0..12)
        .prop_map(|cuts| {
            let mut bounds = vec![0];
            bounds.extend(cuts);
            bounds.push(GROUP_SECTORS);
            bounds.windows(2).map(|w| (w[0], w[1] - w[0])).collect::<Vec<_>>()
        })
        .prop_shuffle()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: a repeated merge never changes the bitmap.
    #[test]
    fn prop_merge_is_idempotent_on_bitmap(
        (start, count) in range_strategy(),
        fill in any::<u8>(),
    ) {
        let mut entry = PartialChunkEntry::try_new(0, DISKS - 1, CHUNK_SECTORS).unwrap();
        let bytes = vec![fill; count * SECTOR_SIZE];

        prop_assert_eq!(entry.merge(start * SECTOR_SIZE, &bytes).unwrap(), count);
        let once = entry.pending().clone();
        prop_assert_eq!(entry.merge(start * SECTOR_SIZE, &bytes).unwrap(), 0);
        prop_assert_eq!(entry.pending(), &once);
        prop_assert_eq!(once.count_pending(), GROUP_SECTORS - count);
    }

    /// Property: covering a group in any order finalizes it exactly once.
    #[test]
    fn prop_full_coverage_finalizes_once(
        parts in partition_strategy(),
        stripe in 0u64..8,
    ) {
        let cache = cache();
        let base = stripe * (GROUP_SECTORS * SECTOR_SIZE) as u64;

        let outcomes: Vec<MergeOutcome> = block_on(async {
            let mut outcomes = Vec::new();
            for (start, count) in &parts {
                let offset = base + (*start * SECTOR_SIZE) as u64;
                let bytes = vec![*start as u8; *count * SECTOR_SIZE];
                outcomes.push(cache.merge_write(offset, &bytes).await.unwrap());
            }
            outcomes
        });

        let finalized = outcomes.iter().filter(|o| **o == MergeOutcome::Finalized).count();
        prop_assert_eq!(finalized, 1);
        prop_assert_eq!(outcomes.last(), Some(&MergeOutcome::Finalized));
        prop_assert!(block_on(cache.is_empty()));
    }

    /// Property: merges into two groups commute with each other.
    #[test]
    fn prop_concurrent_groups_are_independent(
        a in prop::collection::vec(range_strategy(), 1..6),
        b in prop::collection::vec(range_strategy(), 1..6),
    ) {
        let group = (GROUP_SECTORS * SECTOR_SIZE) as u64;

        let run = |concurrent: bool| {
            let cache = cache();
            block_on(async {
                let write_all = |base: u64, ranges: &[(usize, usize)]| {
                    let cache = &cache;
                    let ranges = ranges.to_vec();
                    async move {
                        for (start, count) in ranges {
                            let offset = base + (start * SECTOR_SIZE) as u64;
                            // outcome may be Finalized when a group fills up
                            let merged = cache.merge_write(offset, &vec![1; count * SECTOR_SIZE]).await;
                            assert!(merged.is_ok(), "merge at {} failed: {:?}", offset, merged);
                        }
                    }
                };
                if concurrent {
                    tokio::join!(write_all(0, &a), write_all(group, &b));
                } else {
                    write_all(group, &b).await;
                    write_all(0, &a).await;
                }
                (
                    cache.snapshot_entry(0).await.map(|s| s.pending),
                    cache.snapshot_entry(group).await.map(|s| s.pending),
                )
            })
        };

        prop_assert_eq!(run(true), run(false));
    }
}
