//! # Guardian Ledger
//!
//! Replication of learned attack fingerprints across a fleet of gateway
//! nodes.
//!
//! Fingerprints are batched into hash-linked blocks; every node keeps the
//! full block history and agreement is reached with a longest-valid-chain
//! rule. The transport is deliberately plain: newline-framed JSON over TCP,
//! flooding gossip, and an offline queue for the degenerate case where no
//! peer is reachable.
//!
//! ```text
//!  LearningService ──▶ ReplicationLog ──▶ GossipNode ──▶ peers
//!                           ▲                 │
//!                           └── resolve ◀─────┘
//!                                             │ (no peers)
//!                                        OfflineQueue
//! ```
//!
//! The hash of a block covers `index || previous_hash || timestamp ||
//! canonical_json(patterns)`; the canonical JSON form is pinned in
//! [`canonical`] so nodes written in other languages agree on hashes.

pub mod canonical;

mod block;
mod chain;
mod error;
mod gossip;
mod queue;

pub use block::{BlockPattern, PatternBlock, GENESIS_HASH, GENESIS_TIMESTAMP};
pub use chain::ReplicationLog;
pub use error::LedgerError;
pub use gossip::{
    Envelope, GossipConfig, GossipEvent, GossipNode, MessageKind, MAX_LINE_BYTES,
};
pub use queue::{OfflineQueue, ProcessReport, QueueItem, QueueKind};

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
