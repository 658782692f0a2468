//! Error types for BTS decoding and encoding.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading, writing, or transforming a turbulence box.
///
/// Every variant aborts the whole decode or encode call; there is no partial box.
#[derive(Debug, Error)]
pub enum BtsError {
    /// The target path does not exist.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The input exists but holds zero bytes.
    #[error("input is empty")]
    EmptyInput,

    /// The stream is too short for its declared sizes, or a length field is inconsistent.
    #[error("invalid BTS data: {0}")]
    Format(String),

    /// The caller handed over a box that cannot be encoded or transformed.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// A sample landed outside the signed 16-bit range after scaling.
    #[error("quantized value {value} of component {component} does not fit in i16")]
    QuantizationOverflow {
        /// Component index (0 = u, 1 = v, 2 = w).
        component: usize,
        /// The rounded, scaled value that overflowed.
        value: f64,
    },

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BtsError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        BtsError::Format(msg.into())
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        BtsError::Invariant(msg.into())
    }
}
