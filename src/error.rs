//! Error types for the Voltlab solver core.
//!
//! Per-frame solving is designed to absorb its own failure modes: a
//! degenerate system surfaces as a flagged [`FrameSolution`] rather than an
//! error, so [`VoltlabError`] only travels between the internal solver
//! layers.
//!
//! [`FrameSolution`]: crate::circuit::FrameSolution

use thiserror::Error;

/// Result type alias using [`VoltlabError`].
pub type Result<T> = std::result::Result<T, VoltlabError>;

/// Unified error type for the solver layers.
#[derive(Error, Debug)]
pub enum VoltlabError {
    /// Matrix is singular and cannot be solved.
    ///
    /// Typically caused by conflicting ideal sources, e.g. two batteries
    /// with different voltages wired in parallel.
    #[error("singular matrix - circuit may contain conflicting sources or a short circuit")]
    SingularMatrix,

    /// Invalid engine configuration.
    #[error("invalid engine configuration: {message}")]
    InvalidConfig { message: String },
}

impl VoltlabError {
    /// Create an invalid-configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
