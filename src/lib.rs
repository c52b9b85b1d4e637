//! stripecache - Partial-Chunk Write Reconciliation for Software RAID
//!
//! Buffers sub-stripe writes on parity arrays (RAID-4/5/6) until the chunk
//! group they belong to is fully populated, reads back only the sectors the
//! host never wrote, and hands the completed group to a parity finalizer.
//!
//! # Architecture
//!
//! ```text
//!   host write ──▶ RaidVolume ──▶ PartialChunkCache ──▶ ReconciliationEngine
//!                     │                 ▲                      │
//!                     │          FlushScheduler          ReadPlan (minimal reads)
//!                     ▼                                        │
//!                  LevelIo                               ParityFinalizer
//!             (full stripes, reads)                   (XOR parity / P+Q)
//!                     │                                        │
//!                     └──────────────▶ MemberDisk ◀────────────┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Member disk and per-level handler implementations
//! - [`array`] - Array configuration and runtime state
//! - [`bitwise`] - Word-wise AND/XOR helpers
//! - [`cache`] - Pending-sector bitmaps and the partial-chunk cache
//! - [`domain`] - Ports the core depends on
//! - [`error`] - Error types
//! - [`finalize`] - Parity finalizers
//! - [`flush`] - Periodic cache drain
//! - [`geometry`] - Stripe geometry resolver
//! - [`metrics`] - Reconciliation counters and Prometheus rendering
//! - [`reconcile`] - Read planning and reconstruction I/O
//! - [`volume`] - Host-facing volume

pub mod adapters;
pub mod array;
pub mod bitwise;
pub mod cache;
pub mod domain;
pub mod error;
pub mod finalize;
pub mod flush;
pub mod geometry;
pub mod metrics;
pub mod reconcile;
pub mod volume;

// Re-export commonly used types
pub use array::{ArrayConfig, ArrayState, Layout, RaidLevel, VolumeConfigFile};
pub use cache::{MergeOutcome, PartialChunkCache};
pub use error::{Error, Result};
pub use flush::{FlushScheduler, FlushSchedulerConfig};
pub use geometry::StripeGeometry;
pub use reconcile::ReconciliationEngine;
pub use volume::RaidVolume;
