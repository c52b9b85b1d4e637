//! Array Configuration and State
//!
//! Read-only description of an assembled array (RAID level, member count,
//! chunk size, layout) and the runtime flags the array controller flips
//! (`loaded`, `readonly`).
//!
//! # Components
//!
//! - **Config** (`config.rs`): `ArrayConfig`, `RaidLevel`, `Layout` and the
//!   YAML volume description used by the binary.
//! - **State** (`state.rs`): `ArrayState`, the loaded/read-only flags and the
//!   array-level read/write gate that writers hold shared.

pub mod config;
pub mod state;

pub use config::{parse_duration, ArrayConfig, FlushSection, Layout, MemberSpec, RaidLevel, VolumeConfigFile};
pub use state::ArrayState;

/// Granularity of the write-status bitmap and of reconstruction reads.
pub const SECTOR_SIZE: usize = 512;

/// Same as [`SECTOR_SIZE`], as a `u64` for offset arithmetic.
pub const SECTOR_SIZE_U64: u64 = SECTOR_SIZE as u64;
