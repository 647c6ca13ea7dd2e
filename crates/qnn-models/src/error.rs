//! Error types for quantized model operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for quantized model operations
pub type Result<T> = std::result::Result<T, QnnModelError>;

/// Errors that can occur while loading or running a quantized model
#[derive(Debug, Error)]
pub enum QnnModelError {
    /// Weight blob or fixture file not found
    #[error("File not found: {path}")]
    FileNotFound {
        /// Path that was attempted
        path: PathBuf,
    },

    /// Model configuration is invalid
    #[error("Invalid model configuration: {reason}")]
    Config {
        /// Reason for failure
        reason: String,
    },

    /// Tensor does not have the shape the layer declares
    #[error("Shape mismatch in {what}: expected {expected} elements, got {actual}")]
    ShapeMismatch {
        /// Which tensor was checked
        what: String,
        /// Expected element count
        expected: usize,
        /// Element count found
        actual: usize,
    },

    /// Inference input does not match the model input
    #[error("Input mismatch: expected {expected} values, got {actual}")]
    InputMismatch {
        /// Expected value count
        expected: usize,
        /// Value count supplied
        actual: usize,
    },

    /// Value does not fit the requested width
    #[error("Value {value} out of range for {bits}-bit two's complement")]
    OutOfRange {
        /// Offending value
        value: i64,
        /// Target width in bits
        bits: u32,
    },

    /// Hex text has the wrong digit count or is not hex
    #[error("Invalid hex '{text}': expected {expected_digits} hex digits")]
    InvalidHex {
        /// The text that failed to parse
        text: String,
        /// Digit count for the width
        expected_digits: usize,
    },

    /// Malformed fixture / `.mem` file
    #[error("{}:{line}: {reason}", path.display())]
    Format {
        /// File being parsed
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// Reason for failure
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl QnnModelError {
    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }

    /// Create a format error with file/line context
    pub fn format(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    /// True for errors that must stop the run before any inference.
    pub const fn is_config(&self) -> bool {
        matches!(
            self,
            Self::FileNotFound { .. }
                | Self::Config { .. }
                | Self::ShapeMismatch { .. }
                | Self::InputMismatch { .. }
        )
    }

    /// True for malformed hex text.
    pub const fn is_format(&self) -> bool {
        matches!(self, Self::Format { .. } | Self::InvalidHex { .. })
    }
}
