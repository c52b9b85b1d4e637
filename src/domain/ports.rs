//! Domain Ports (Port/Adapter Pattern)
//!
//! The core never talks to a device directly. It depends on these traits and
//! the array controller hands it implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Core                                │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                   Ports (Traits)                    │    │
//! │  │   MemberDisk  │  LevelIo  │  ParityFinalizer        │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Adapters                              │
//! │    MemDisk │ FileDisk │ ParityArrayIo │ Xor/PqParityWriter  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! `ParityFinalizer` lives in [`crate::finalize`] next to its reference
//! implementations.

use async_trait::async_trait;

use crate::error::Result;

// =============================================================================
// Member Disk Port
// =============================================================================

/// One physical member of the array.
///
/// Offsets passed to `read_at`/`write_at` are absolute byte addresses on the
/// member; callers add [`MemberDisk::data_offset`] themselves. Both calls
/// complete with the number of bytes transferred, which may be short.
#[async_trait]
pub trait MemberDisk: Send + Sync {
    /// Position of this member in the array (0..N-1).
    fn index(&self) -> usize;

    /// Byte offset where the member's data area starts.
    fn data_offset(&self) -> u64;

    /// Read into `buf` starting at `offset`.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf` starting at `offset`.
    async fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize>;
}

// =============================================================================
// Level I/O Port
// =============================================================================

/// Per-level request handler owned by the array controller.
///
/// Serves reads, writes for levels without parity, and the full-stripe fast
/// path for parity levels. Offsets are logical array offsets.
#[async_trait]
pub trait LevelIo: Send + Sync {
    /// Fill `buf` with the on-disk data at `offset`.
    async fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` at `offset` on a level without parity.
    async fn write(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Write one whole chunk group, data and parity, starting at the
    /// group-aligned `chunk_offset`.
    async fn write_full_stripe(&self, chunk_offset: u64, data: &[u8]) -> Result<()>;
}
