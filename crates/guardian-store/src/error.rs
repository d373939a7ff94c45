//! Error types for the pattern store.

use thiserror::Error;

/// Errors raised by pattern store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Snapshot I/O failed. The on-disk snapshot is left intact.
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot serialization failed.
    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store was constructed without a backing path.
    #[error("store has no backing path; cannot persist")]
    NoBackingPath,
}
