//! In-memory member disk.
//!
//! Backs a member with a byte vector. Faults can be switched on per
//! direction, and every request is logged so tests can assert exactly which
//! I/O was issued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::domain::ports::MemberDisk;
use crate::error::{Error, Result};

/// One logged request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoRecord {
    pub offset: u64,
    pub len: usize,
}

/// Member disk held entirely in memory.
pub struct MemDisk {
    index: usize,
    data_offset: u64,
    data: RwLock<Vec<u8>>,
    latency: Option<Duration>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    short_reads: AtomicBool,
    reads: Mutex<Vec<IoRecord>>,
    writes: Mutex<Vec<IoRecord>>,
}

impl MemDisk {
    /// Zero-filled disk of `size` bytes.
    pub fn new(index: usize, size: u64) -> Self {
        Self {
            index,
            data_offset: 0,
            data: RwLock::new(vec![0; size as usize]),
            latency: None,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            short_reads: AtomicBool::new(false),
            reads: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// `count` disks with indices 0..count.
    pub fn array(count: usize, size: u64) -> Vec<Arc<MemDisk>> {
        (0..count).map(|i| Arc::new(MemDisk::new(i, size))).collect()
    }

    pub fn with_data_offset(mut self, data_offset: u64) -> Self {
        self.data_offset = data_offset;
        self
    }

    /// Delay every request by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_read_fault(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_write_fault(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make reads complete with half the requested length.
    pub fn set_short_reads(&self, short: bool) {
        self.short_reads.store(short, Ordering::SeqCst);
    }

    /// Reads issued so far, failed ones included.
    pub fn reads(&self) -> Vec<IoRecord> {
        self.reads.lock().clone()
    }

    /// Writes issued so far, failed ones included.
    pub fn writes(&self) -> Vec<IoRecord> {
        self.writes.lock().clone()
    }

    pub fn clear_log(&self) {
        self.reads.lock().clear();
        self.writes.lock().clear();
    }

    /// Copy bytes straight out of the backing store, bypassing faults and
    /// the request log.
    pub fn read_raw(&self, offset: u64, len: usize) -> Vec<u8> {
        let data = self.data.read();
        data[offset as usize..offset as usize + len].to_vec()
    }

    /// Store bytes straight into the backing store.
    pub fn write_raw(&self, offset: u64, bytes: &[u8]) {
        let mut data = self.data.write();
        data[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
    }

    fn range(&self, offset: u64, len: usize, size: usize) -> Result<std::ops::Range<usize>> {
        let start = usize::try_from(offset).ok();
        match start.and_then(|s| s.checked_add(len).map(|e| s..e)) {
            Some(range) if range.end <= size => Ok(range),
            _ => Err(Error::DiskIo {
                disk: self.index,
                offset,
                reason: format!("{} bytes at {} is past the end of a {}-byte disk", len, offset, size),
            }),
        }
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl MemberDisk for MemDisk {
    fn index(&self) -> usize {
        self.index
    }

    fn data_offset(&self) -> u64 {
        self.data_offset
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.reads.lock().push(IoRecord {
            offset,
            len: buf.len(),
        });
        self.delay().await;

        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::DiskIo {
                disk: self.index,
                offset,
                reason: "injected read fault".into(),
            });
        }

        let data = self.data.read();
        let range = self.range(offset, buf.len(), data.len())?;
        let len = if self.short_reads.load(Ordering::SeqCst) {
            buf.len() / 2
        } else {
            buf.len()
        };
        buf[..len].copy_from_slice(&data[range.start..range.start + len]);
        Ok(len)
    }

    async fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        self.writes.lock().push(IoRecord {
            offset,
            len: buf.len(),
        });
        self.delay().await;

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::DiskIo {
                disk: self.index,
                offset,
                reason: "injected write fault".into(),
            });
        }

        let mut data = self.data.write();
        let len = data.len();
        let range = self.range(offset, buf.len(), len)?;
        data[range].copy_from_slice(buf);
        Ok(buf.len())
    }
}

/// Upcast a set of in-memory disks to the member table type.
pub fn member_handles(disks: &[Arc<MemDisk>]) -> Vec<Arc<dyn MemberDisk>> {
    disks
        .iter()
        .map(|d| Arc::clone(d) as Arc<dyn MemberDisk>)
        .collect()
}
