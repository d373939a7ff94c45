//! Error types for the immune system.

use thiserror::Error;

/// Errors raised by trigger, learning, discovery and kill-switch paths.
#[derive(Debug, Error)]
pub enum ImmuneError {
    /// Pattern store failure surfaced from a learn/persist step.
    #[error("store error: {0}")]
    Store(#[from] guardian_store::StoreError),

    /// Model adapter failure that could not be absorbed by a fallback.
    #[error("model error: {0}")]
    Model(#[from] guardian_model::ModelError),

    /// A discovery run was requested while one is already in flight.
    #[error("discovery is already running")]
    DiscoveryBusy,

    /// Sandbox driver failure.
    #[error("sandbox driver error: {0}")]
    Sandbox(String),

    /// Internal invariant failure (poisoned lock, closed channel).
    #[error("internal error: {0}")]
    Internal(String),
}
