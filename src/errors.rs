use std::path::PathBuf;

use thiserror::Error;

/// Failure modes of the reset subsystem.
///
/// None of these are ever shown to end users; the scheduler logs them and
/// moves on to the next tick.
#[derive(Error, Debug)]
pub enum ResetError {
    /// Transient: the coordination database could not be read or written.
    #[error("coordination store unavailable: {0}")]
    CoordinationStoreUnavailable(String),

    /// Configuration problem: the clean snapshot is absent or unreadable.
    #[error("clean snapshot missing or unreadable at {path}: {reason}")]
    SnapshotMissing { path: PathBuf, reason: String },

    /// Another caller (this process or another) holds the swap lock.
    #[error("a datastore swap is already in progress")]
    SwapInProgress,

    /// The staged copy or the final rename failed; the live store is intact.
    #[error("datastore swap failed: {0}")]
    SwapIo(String),
}

impl ResetError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::CoordinationStoreUnavailable(format!("{err:#}"))
    }

    pub fn io(context: &str, err: impl std::fmt::Display) -> Self {
        Self::SwapIo(format!("{context}: {err}"))
    }

    /// Whether the next scheduler tick may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ResetError::SnapshotMissing { .. })
    }
}

pub type Result<T> = std::result::Result<T, ResetError>;
