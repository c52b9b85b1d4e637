//! Error types for the stripe cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the stripe placement and reconciliation core
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Resource Errors
    // =========================================================================
    /// Buffer or cache entry allocation failed
    #[error("Resource exhaustion: failed to allocate {size} bytes")]
    ResourceExhausted { size: usize },

    // =========================================================================
    // Geometry / Configuration Errors
    // =========================================================================
    /// Array configuration is inconsistent
    #[error("Invalid array geometry: {0}")]
    InvalidGeometry(String),

    /// Operation is not meaningful for the configured RAID level
    #[error("Unsupported RAID level for operation: {0}")]
    UnsupportedLevel(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    /// YAML config file error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // Member Disk I/O Errors
    // =========================================================================
    /// A member disk reported a failed read or write
    #[error("I/O failure on disk {disk} at offset {offset}: {reason}")]
    DiskIo {
        disk: usize,
        offset: u64,
        reason: String,
    },

    /// A member disk transferred fewer bytes than requested
    #[error("Short transfer on disk {disk} at offset {offset}: expected {expected}, got {actual}")]
    ShortTransfer {
        disk: usize,
        offset: u64,
        expected: usize,
        actual: usize,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Request Errors
    // =========================================================================
    /// Array is not loaded
    #[error("Device not ready")]
    DeviceNotReady,

    /// Array is read-only
    #[error("Media is write protected")]
    WriteProtected,

    /// Request parameters are out of range or misaligned
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true when the error came from a member disk.
    pub fn is_io_failure(&self) -> bool {
        matches!(
            self,
            Error::DiskIo { .. } | Error::ShortTransfer { .. } | Error::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_failure_classification() {
        let err = Error::DiskIo {
            disk: 2,
            offset: 4096,
            reason: "medium error".into(),
        };
        assert!(err.is_io_failure());

        let err = Error::ShortTransfer {
            disk: 0,
            offset: 0,
            expected: 512,
            actual: 0,
        };
        assert!(err.is_io_failure());

        assert!(!Error::ResourceExhausted { size: 1 }.is_io_failure());
        assert!(!Error::WriteProtected.is_io_failure());
    }

    #[test]
    fn test_error_display() {
        let err = Error::DiskIo {
            disk: 1,
            offset: 512,
            reason: "timeout".into(),
        };
        assert_eq!(err.to_string(), "I/O failure on disk 1 at offset 512: timeout");
        assert_eq!(Error::DeviceNotReady.to_string(), "Device not ready");
    }
}
