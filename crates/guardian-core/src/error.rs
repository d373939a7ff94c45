//! Error types for the gateway facade.

use thiserror::Error;

/// Facade-level error type.
#[derive(Debug, Error)]
pub enum GuardianError {
    /// Pattern store failure.
    #[error("store error: {0}")]
    Store(#[from] guardian_store::StoreError),

    /// Rule-set failure (invalid runtime rule).
    #[error("filter error: {0}")]
    Filter(#[from] guardian_filter::FilterError),

    /// Model adapter failure.
    #[error("model error: {0}")]
    Model(#[from] guardian_model::ModelError),

    /// Immune-system failure.
    #[error("immune error: {0}")]
    Immune(#[from] guardian_immune::ImmuneError),

    /// Replication failure.
    #[error("ledger error: {0}")]
    Ledger(#[from] guardian_ledger::LedgerError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}
