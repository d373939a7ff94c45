//! Hash-linked pattern blocks: the unit of replication.

use crate::canonical::{canonical_json, sha256_hex};
use chrono::Utc;
use guardian_store::Severity;
use serde::{Deserialize, Serialize};

/// Fixed hash literal of the genesis block, identical on every honest node.
pub const GENESIS_HASH: &str = "genesis";

/// Fixed timestamp literal of the genesis block.
pub const GENESIS_TIMESTAMP: &str = "2024-01-01T00:00:00Z";

const GENESIS_PREVIOUS_HASH: &str = "0";
const GENESIS_VALIDATOR: &str = "system";

/// One learned fingerprint as carried inside a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPattern {
    pub pattern: String,
    pub category: String,
    pub severity: Severity,
    /// When the fingerprint was learned, RFC-3339.
    pub ts: String,
}

/// A block in the replication log.
///
/// Immutable once linked: `hash` covers the index, the predecessor's hash,
/// the timestamp and the canonical JSON of the patterns, so any mutation is
/// detectable by every peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternBlock {
    pub index: u64,
    pub timestamp: String,
    pub patterns: Vec<BlockPattern>,
    pub previous_hash: String,
    pub hash: String,
    pub validator_id: String,
}

impl PatternBlock {
    /// The deterministic genesis block.
    ///
    /// Every field is a fixed literal - the genesis hash is *not* computed,
    /// it is compared verbatim during validation so all nodes agree on the
    /// chain root without sharing any state.
    pub fn genesis() -> Self {
        Self {
            index: 0,
            timestamp: GENESIS_TIMESTAMP.to_string(),
            patterns: Vec::new(),
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            hash: GENESIS_HASH.to_string(),
            validator_id: GENESIS_VALIDATOR.to_string(),
        }
    }

    /// Builds the successor of `previous` carrying `patterns`, stamped now.
    pub fn next(previous: &PatternBlock, patterns: Vec<BlockPattern>, validator_id: &str) -> Self {
        let index = previous.index + 1;
        let timestamp = Utc::now().to_rfc3339();
        let hash = Self::compute_hash(index, &previous.hash, &timestamp, &patterns);
        Self {
            index,
            timestamp,
            patterns,
            previous_hash: previous.hash.clone(),
            hash,
            validator_id: validator_id.to_string(),
        }
    }

    /// SHA-256 over `index || previous_hash || timestamp ||
    /// canonical_json(patterns)`.
    pub fn compute_hash(
        index: u64,
        previous_hash: &str,
        timestamp: &str,
        patterns: &[BlockPattern],
    ) -> String {
        let patterns_value =
            serde_json::to_value(patterns).unwrap_or(serde_json::Value::Array(Vec::new()));
        let material = format!(
            "{index}{previous_hash}{timestamp}{}",
            canonical_json(&patterns_value)
        );
        sha256_hex(material.as_bytes())
    }

    /// Whether this block is the canonical genesis literal.
    pub fn is_genesis(&self) -> bool {
        *self == Self::genesis()
    }

    /// Recomputes the hash from the block's own contents and compares.
    /// The genesis block is exempt (its hash is a fixed literal).
    pub fn hash_is_valid(&self) -> bool {
        if self.index == 0 {
            return self.is_genesis();
        }
        self.hash
            == Self::compute_hash(self.index, &self.previous_hash, &self.timestamp, &self.patterns)
    }
}
