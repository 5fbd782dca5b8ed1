//! Error types for peripheral driver operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, PeriphError>;

/// Errors that can occur while staging, starting or collecting a transfer
#[derive(Debug, Error)]
pub enum PeriphError {
    /// `submit_input` was called with no samples
    #[error("Input is empty")]
    EmptyInput,

    /// Input exceeds the session's buffer capacity
    #[error("Input of {len} samples exceeds the maximum of {max}")]
    TooLarge {
        /// Number of samples submitted
        len: usize,
        /// Session capacity in samples
        max: usize,
    },

    /// `start` was called before any input was staged
    #[error("No data staged")]
    NoDataStaged,

    /// Hardware did not report completion in time
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// The wait was cancelled; the transfer is still in flight
    #[error("Wait cancelled")]
    Cancelled,

    /// Hardware reported an error status instead of completion
    #[error("Hardware fault (status {status:#010x}): {reason}")]
    Fault {
        /// Raw status word that reported the error
        status: u32,
        /// Reason for failure
        reason: String,
    },

    /// A previous fault left the session unusable until `reset`
    #[error("Session faulted, reset required")]
    NeedsReset,

    /// Construction or configuration was inconsistent
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong
        reason: String,
    },

    /// Data transfer setup failed
    #[error("Transfer failed: {reason}")]
    TransferFailed {
        /// Reason for failure
        reason: String,
    },

    /// Device node not found at the expected path
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// I/O error during device communication
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl PeriphError {
    /// Create a timeout error from a duration
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create a hardware fault error
    pub fn fault(status: u32, reason: impl Into<String>) -> Self {
        Self::Fault {
            status,
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a transfer failed error
    pub fn transfer_failed(reason: impl Into<String>) -> Self {
        Self::TransferFailed {
            reason: reason.into(),
        }
    }

    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Whether the session can be used again without `reset`
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Fault { .. } | Self::NeedsReset)
    }
}
