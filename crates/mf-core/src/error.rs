//! Unified error type for mtsforge.
//!
//! Library crates funnel their failures into [`Error`]. Per-item encoder
//! failures are *not* errors: they are reported as an outcome and recorded on
//! the item, so only caller misuse and launch faults travel through here.

/// Unified error type covering all failure modes in mtsforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operation was attempted in the wrong run state (e.g. `start` while a
    /// run is already active, or editing a batch mid-run).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A run was started on a batch with no items.
    #[error("Batch is empty")]
    EmptyBatch,

    /// Input data or configuration failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool could not be launched or awaited.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for [`Error::InvalidState`].
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState(message.into())
    }

    /// Convenience constructor for [`Error::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether the error was caused by the caller using the API out of order,
    /// as opposed to a runtime fault.
    pub fn is_caller_misuse(&self) -> bool {
        matches!(self, Error::InvalidState(_) | Error::EmptyBatch)
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
