//! Error types for replication.

use thiserror::Error;

/// Errors raised by the ledger, gossip transport and offline queue.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Socket or file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire or queue payload could not be encoded/decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A peer sent a line longer than the framing cap.
    #[error("line exceeds {0} byte cap")]
    LineTooLong(usize),

    /// `process` was invoked while a previous run is still in flight.
    #[error("offline queue processing already in flight")]
    ProcessInFlight,

    /// Queue persistence failure surfaced from the atomic writer.
    #[error("queue persistence failed: {0}")]
    Persistence(#[from] guardian_store::StoreError),
}
