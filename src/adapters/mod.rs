//! Infrastructure Adapters
//!
//! Implementations of the domain ports.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                             │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                          │ │
//! │  │          MemberDisk      │      LevelIo                    │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                      │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │  MemDisk (tests, --in-memory) │ FileDisk (image files)     │ │
//! │  │  ParityArrayIo (non-degraded RAID-4/5/6 fast path)         │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use stripecache::adapters::{member_handles, MemDisk, ParityArrayIo};
//!
//! let disks = MemDisk::array(4, 64 << 20);
//! let members = member_handles(&disks);
//! let io = ParityArrayIo::new(geometry, members.clone(), finalizer)?;
//! ```

pub mod file_disk;
pub mod mem_disk;
mod parity_io;

pub use file_disk::FileDisk;
pub use mem_disk::{member_handles, IoRecord, MemDisk};
pub use parity_io::ParityArrayIo;
