//! Member disk backed by an image file.
//!
//! Positional reads and writes run on the blocking pool so they never stall
//! the runtime.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::ports::MemberDisk;
use crate::error::{Error, Result};

/// Member disk stored in a regular file or block device node.
#[derive(Debug)]
pub struct FileDisk {
    index: usize,
    data_offset: u64,
    path: PathBuf,
    file: Arc<File>,
}

impl FileDisk {
    /// Open (creating if needed) the image at `path`.
    ///
    /// When `size` is given the image is grown to at least that many bytes.
    pub fn open(index: usize, path: impl AsRef<Path>, data_offset: u64, size: Option<u64>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if let Some(size) = size {
            if file.metadata()?.len() < size {
                file.set_len(size)?;
            }
        }

        debug!(index, path = %path.display(), data_offset, "Opened member image");
        Ok(Self {
            index,
            data_offset,
            path,
            file: Arc::new(file),
        })
    }

    fn join_error(&self, offset: u64, e: tokio::task::JoinError) -> Error {
        Error::DiskIo {
            disk: self.index,
            offset,
            reason: format!("{}: blocking I/O task failed: {}", self.path.display(), e),
        }
    }

    fn io_error(&self, offset: u64, e: std::io::Error) -> Error {
        Error::DiskIo {
            disk: self.index,
            offset,
            reason: format!("{}: {}", self.path.display(), e),
        }
    }
}

/// Read until `buf` is full or the file ends.
fn read_full_at(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        match file.read_at(&mut buf[done..], offset + done as u64) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

#[async_trait]
impl MemberDisk for FileDisk {
    fn index(&self) -> usize {
        self.index
    }

    fn data_offset(&self) -> u64 {
        self.data_offset
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let file = Arc::clone(&self.file);
        let len = buf.len();
        let (scratch, read) = tokio::task::spawn_blocking(move || {
            let mut scratch = vec![0u8; len];
            let read = read_full_at(&file, offset, &mut scratch);
            (scratch, read)
        })
        .await
        .map_err(|e| self.join_error(offset, e))?;

        let read = read.map_err(|e| self.io_error(offset, e))?;
        buf[..read].copy_from_slice(&scratch[..read]);
        Ok(read)
    }

    async fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        let file = Arc::clone(&self.file);
        let owned = buf.to_vec();
        tokio::task::spawn_blocking(move || file.write_all_at(&owned, offset).map(|_| owned.len()))
            .await
            .map_err(|e| self.join_error(offset, e))?
            .map_err(|e| self.io_error(offset, e))
    }
}
