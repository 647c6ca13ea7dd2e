//! Error types for device communication

use qnn_models::QnnModelError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, QnnError>;

/// Errors that can occur while talking to the accelerator
#[derive(Debug, Error)]
pub enum QnnError {
    /// Device file not found
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// Device answered with fewer bytes than the frame requires
    #[error("Short response: expected {expected} bytes, got {actual}")]
    ShortResponse {
        /// Frame size
        expected: usize,
        /// Bytes received before the timeout
        actual: usize,
    },

    /// Device did not answer at all
    #[error("No response after {waited_ms}ms")]
    NoResponse {
        /// Time waited in milliseconds
        waited_ms: u64,
    },

    /// Digit response nibble is not a class index
    #[error("Invalid digit response 0x{byte:02x}")]
    InvalidDigit {
        /// Raw response byte
        byte: u8,
    },

    /// Byte channel failed mid-request
    #[error("Transport failure: {reason}")]
    Transport {
        /// Reason for failure
        reason: String,
    },

    /// Host state machine used out of order
    #[error("Protocol in invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// I/O error during device communication
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Model or data error
    #[error(transparent)]
    Model(#[from] QnnModelError),
}

impl QnnError {
    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create a transport failure error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// True for failures scoped to a single request. A harness records these
    /// against the sample and moves on.
    pub const fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::ShortResponse { .. }
                | Self::NoResponse { .. }
                | Self::InvalidDigit { .. }
                | Self::Transport { .. }
                | Self::Io { .. }
        )
    }
}
