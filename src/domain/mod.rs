//! Domain Layer
//!
//! Trait abstractions for everything outside the placement and
//! reconciliation core: the member disks and the per-level request handler.
//!
//! # Usage
//!
//! ```ignore
//! use stripecache::domain::{LevelIo, MemberDisk};
//!
//! async fn first_sector(disk: &dyn MemberDisk) -> stripecache::Result<Vec<u8>> {
//!     let mut buf = vec![0u8; 512];
//!     disk.read_at(disk.data_offset(), &mut buf).await?;
//!     Ok(buf)
//! }
//! ```

pub mod ports;

pub use ports::{LevelIo, MemberDisk};
