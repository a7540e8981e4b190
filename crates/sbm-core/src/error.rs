//! Error type shared by every SBM-SDE crate.

use thiserror::Error;

/// Errors raised while configuring, loading data for, or running inference.
///
/// Configuration and data errors are raised at construction time, before any
/// training iteration runs. Numerical errors carry the iteration at which the
/// loss or gradient stopped being finite.
///
/// # Example
///
/// ```
/// use sbm_core::SbmError;
///
/// let err = SbmError::Config { message: "unknown model class 'XYZ'".to_string() };
/// assert!(err.to_string().contains("XYZ"));
/// ```
#[derive(Debug, Error)]
pub enum SbmError {
    /// Invalid or unknown configuration (model class, family name, priors).
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Malformed input data or mismatched shapes.
    #[error("data error: {message}")]
    Data { message: String },

    /// Non-finite loss, gradient or density during training.
    #[error("numerical error at iteration {iteration}: {message}")]
    Numerical { iteration: usize, message: String },

    /// Failure inside the tensor backend.
    #[error("backend error: {message}")]
    Backend { message: String },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SbmError {
    /// Shorthand for a [`SbmError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Shorthand for a [`SbmError::Data`].
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }

    /// Returns `true` for errors that abort a run because of non-finite values.
    pub fn is_numerical(&self) -> bool {
        matches!(self, Self::Numerical { .. })
    }
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, SbmError>;
