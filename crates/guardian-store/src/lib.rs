//! # Guardian Pattern Store
//!
//! Append-only catalog of known attack fingerprints, grouped by category.
//!
//! The store is the single source of truth for "have we seen this attack
//! before". Identity is content-derived: the first 16 hex digits of the
//! SHA-256 of a fingerprint's normalised form. Two payloads that normalise
//! to the same identity are duplicates, no matter which category they were
//! filed under.
//!
//! ## Guarantees
//!
//! | Property | Mechanism |
//! |----------|-----------|
//! | Identity uniqueness | In-memory index rebuilt on load, consulted on every insert |
//! | Crash-safe persistence | Write temp file, fsync, rename over canonical path |
//! | Rollback point | Previous snapshot retained as `<path>.backup` |
//! | Cross-node equality | `snapshot_hash()` over the sorted fingerprint list |
//!
//! A missing or malformed snapshot degrades to an empty in-memory store;
//! it is never a fatal error.

mod error;
mod fingerprint;
mod store;

pub use error::StoreError;
pub use fingerprint::{fingerprint_id, normalize_pattern, Severity};
pub use store::{
    write_atomic, AddOutcome, BatchPattern, Category, PatternStore, SearchHit, SharedPatternStore,
    MAX_FINGERPRINT_LEN,
};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
