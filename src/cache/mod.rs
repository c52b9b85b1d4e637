//! Partial-Chunk Cache
//!
//! Holds chunk groups that have received sub-stripe writes and whose parity
//! has not been brought up to date yet.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       PartialChunkCache                          │
//! │   tokio::Mutex<Vec<PartialChunkEntry>>  (sorted by chunk_offset) │
//! │                                                                  │
//! │   ┌─────────────────────┐   ┌─────────────────────┐              │
//! │   │ entry @ 0           │   │ entry @ 10 * group  │   ...        │
//! │   │  data: row0|row1|.. │   │  data: row0|row1|.. │              │
//! │   │  pending: bitmap    │   │  pending: bitmap    │              │
//! │   └─────────────────────┘   └─────────────────────┘              │
//! └────────────┬───────────────────────────────┬─────────────────────┘
//!              │ merge_write (write path)      │ drain (flush scheduler)
//!              ▼                               ▼
//!        complete? ──yes──▶  ReconciliationEngine::reconcile ──▶ evict
//! ```
//!
//! An entry lives from the first partial write into its group until it is
//! reconciled and finalized, or superseded by a full-stripe write.

pub mod bitmap;
mod entry;
mod partial;

#[cfg(test)]
mod proptest;

pub use bitmap::{ColumnMask, SectorBitmap};
pub use entry::PartialChunkEntry;
pub use partial::{DrainReport, EntrySnapshot, MergeOutcome, PartialChunkCache};
