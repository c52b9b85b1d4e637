//! Concurrent member I/O with wait-all semantics.
//!
//! Every request is issued at once and every request is awaited, failed or
//! not. When several fail, the last failure in submission order is the one
//! reported.

use std::future::Future;

use futures::future::join_all;
use tracing::error;

use crate::domain::ports::MemberDisk;
use crate::error::{Error, Result};

/// Outcome of a batch of requests.
#[derive(Debug)]
pub struct Completion<T> {
    /// Results of the successful requests, in submission order
    pub results: Vec<T>,
    /// Number of failed requests
    pub failures: usize,
    last_error: Option<Error>,
}

impl<T> Completion<T> {
    /// All results, or the last failure.
    pub fn into_result(self) -> Result<Vec<T>> {
        match self.last_error {
            Some(err) => Err(err),
            None => Ok(self.results),
        }
    }
}

/// Run every future concurrently and collect all outcomes.
pub async fn wait_all<I, F, T>(ops: I) -> Completion<T>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T>>,
{
    let outcomes = join_all(ops).await;
    let mut completion = Completion {
        results: Vec::with_capacity(outcomes.len()),
        failures: 0,
        last_error: None,
    };

    for outcome in outcomes {
        match outcome {
            Ok(value) => completion.results.push(value),
            Err(err) => {
                completion.failures += 1;
                completion.last_error = Some(err);
            }
        }
    }

    completion
}

/// Zero-filled buffer, or [`Error::ResourceExhausted`].
pub fn try_zeroed(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::ResourceExhausted { size: len })?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Read exactly `len` bytes into a fresh buffer.
pub async fn read_exact(disk: &dyn MemberDisk, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = try_zeroed(len)?;
    read_into(disk, offset, &mut buf).await?;
    Ok(buf)
}

/// Fill `buf` from `offset`, treating a short read as a failure.
pub async fn read_into(disk: &dyn MemberDisk, offset: u64, buf: &mut [u8]) -> Result<()> {
    let expected = buf.len();
    let actual = disk.read_at(offset, buf).await.inspect_err(|e| {
        error!(disk = disk.index(), offset, len = expected, error = %e, "Member read failed");
    })?;
    if actual != expected {
        error!(disk = disk.index(), offset, expected, actual, "Member read came up short");
        return Err(Error::ShortTransfer {
            disk: disk.index(),
            offset,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Write all of `buf` at `offset`, treating a short write as a failure.
pub async fn write_all(disk: &dyn MemberDisk, offset: u64, buf: &[u8]) -> Result<()> {
    let expected = buf.len();
    let actual = disk.write_at(offset, buf).await.inspect_err(|e| {
        error!(disk = disk.index(), offset, len = expected, error = %e, "Member write failed");
    })?;
    if actual != expected {
        error!(disk = disk.index(), offset, expected, actual, "Member write came up short");
        return Err(Error::ShortTransfer {
            disk: disk.index(),
            offset,
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn disk_error(disk: usize) -> Error {
        Error::DiskIo {
            disk,
            offset: 0,
            reason: "injected".into(),
        }
    }

    #[tokio::test]
    async fn test_wait_all_success_keeps_order() {
        let ops = (0..4u64).map(|i| async move {
            tokio::time::sleep(Duration::from_millis(10 * (4 - i))).await;
            Ok::<_, Error>(i)
        });
        let completion = wait_all(ops).await;
        assert_eq!(completion.failures, 0);
        assert_eq!(completion.into_result().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_wait_all_reports_last_failure() {
        let ops = (0..4usize).map(|i| async move {
            if i % 2 == 1 {
                Err(disk_error(i))
            } else {
                Ok(i)
            }
        });
        let completion = wait_all(ops).await;
        assert_eq!(completion.failures, 2);
        assert_eq!(completion.results, vec![0, 2]);
        assert_matches!(completion.into_result(), Err(Error::DiskIo { disk: 3, .. }));
    }

    #[tokio::test]
    async fn test_wait_all_awaits_every_request() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let finished = AtomicUsize::new(0);
        let ops = (0..3usize).map(|i| {
            let finished = &finished;
            async move {
                if i == 0 {
                    return Err::<(), _>(disk_error(0));
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        assert!(wait_all(ops).await.into_result().is_err());
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_try_zeroed() {
        let buf = try_zeroed(4096).unwrap();
        assert_eq!(buf.len(), 4096);
        assert!(buf.iter().all(|&b| b == 0));
    }
}
