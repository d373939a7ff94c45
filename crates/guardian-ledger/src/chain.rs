//! The replication log: an append-only chain of pattern blocks with a
//! longest-valid-chain rule for reconciling divergent histories.

use crate::block::{BlockPattern, PatternBlock};
use tracing::{debug, info, warn};

/// Ordered list of blocks starting at the canonical genesis.
///
/// # Concurrency
///
/// The log is single-writer: wrap it in a mutex and keep `add_block` /
/// `resolve` mutually exclusive. No method blocks or performs I/O.
#[derive(Debug)]
pub struct ReplicationLog {
    blocks: Vec<PatternBlock>,
    validator_id: String,
}

impl ReplicationLog {
    /// Creates a log containing only the genesis block.
    pub fn new(validator_id: impl Into<String>) -> Self {
        Self {
            blocks: vec![PatternBlock::genesis()],
            validator_id: validator_id.into(),
        }
    }

    /// The current tip.
    pub fn latest(&self) -> &PatternBlock {
        // The chain always holds at least the genesis block.
        self.blocks.last().expect("chain never empty")
    }

    /// Chain length including genesis.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when only the genesis block is present.
    pub fn is_empty(&self) -> bool {
        self.blocks.len() <= 1
    }

    /// Full history, genesis first.
    pub fn blocks(&self) -> &[PatternBlock] {
        &self.blocks
    }

    /// Builds the block that would extend the current tip.
    ///
    /// Pure: nothing is appended. Pass the result to [`Self::add_block`]
    /// once it should become part of history.
    pub fn create_block(&self, patterns: Vec<BlockPattern>) -> PatternBlock {
        PatternBlock::next(self.latest(), patterns, &self.validator_id)
    }

    /// Appends `block` iff it validly extends the current tip.
    ///
    /// Rejection is idempotent by design: a re-delivered block carries an
    /// index the chain already holds and fails the tip check, which is what
    /// terminates gossip flooding.
    pub fn add_block(&mut self, block: PatternBlock) -> bool {
        let tip = self.latest();
        if block.index != tip.index + 1 {
            debug!(
                "rejecting block {}: tip is {} (duplicate or gap)",
                block.index, tip.index
            );
            return false;
        }
        if block.previous_hash != tip.hash {
            warn!("rejecting block {}: previous_hash does not match tip", block.index);
            return false;
        }
        if !block.hash_is_valid() {
            warn!("rejecting block {}: hash does not recompute", block.index);
            return false;
        }
        info!("block {} appended ({} patterns)", block.index, block.patterns.len());
        self.blocks.push(block);
        true
    }

    /// Validates a foreign chain in full.
    ///
    /// The first block must equal the canonical genesis; every later block
    /// must satisfy the same checks [`Self::add_block`] applies.
    pub fn validate_chain(chain: &[PatternBlock]) -> bool {
        let Some(first) = chain.first() else {
            return false;
        };
        if !first.is_genesis() {
            return false;
        }
        for window in chain.windows(2) {
            let (prev, block) = (&window[0], &window[1]);
            if block.index != prev.index + 1
                || block.previous_hash != prev.hash
                || !block.hash_is_valid()
            {
                return false;
            }
        }
        true
    }

    /// Longest-valid-chain reconciliation.
    ///
    /// Adopts the longest candidate that validates and is strictly longer
    /// than the local chain. Ties keep the local chain. Returns whether the
    /// local chain was replaced.
    pub fn resolve(&mut self, candidates: Vec<Vec<PatternBlock>>) -> bool {
        let mut best: Option<Vec<PatternBlock>> = None;
        for candidate in candidates {
            if candidate.len() <= self.blocks.len() {
                continue;
            }
            if !Self::validate_chain(&candidate) {
                warn!("discarding invalid candidate chain of length {}", candidate.len());
                continue;
            }
            if best.as_ref().map_or(true, |b| candidate.len() > b.len()) {
                best = Some(candidate);
            }
        }

        match best {
            Some(replacement) => {
                info!(
                    "chain replaced: {} -> {} blocks",
                    self.blocks.len(),
                    replacement.len()
                );
                self.blocks = replacement;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardian_store::Severity;

    fn pattern(text: &str) -> BlockPattern {
        BlockPattern {
            pattern: text.to_string(),
            category: "test_family".to_string(),
            severity: Severity::High,
            ts: "2025-06-01T00:00:00Z".to_string(),
        }
    }

    fn grown_chain(node: &str, blocks: usize) -> ReplicationLog {
        let mut log = ReplicationLog::new(node);
        for i in 0..blocks {
            let block = log.create_block(vec![pattern(&format!("payload {i}"))]);
            assert!(log.add_block(block));
        }
        log
    }

    #[test]
    fn test_new_log_is_genesis_only() {
        let log = ReplicationLog::new("node-a");
        assert_eq!(log.len(), 1);
        assert!(log.latest().is_genesis());
        assert!(log.is_empty());
    }

    #[test]
    fn test_create_block_is_pure() {
        let log = ReplicationLog::new("node-a");
        let _unappended = log.create_block(vec![pattern("x")]);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_append_chain() {
        let log = grown_chain("node-a", 3);
        assert_eq!(log.len(), 4);
        assert_eq!(log.latest().index, 3);
        assert!(ReplicationLog::validate_chain(log.blocks()));
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let mut log = ReplicationLog::new("node-a");
        let block = log.create_block(vec![pattern("x")]);
        assert!(log.add_block(block.clone()));
        // Re-delivery of the same block: tip moved on, index collides.
        assert!(!log.add_block(block));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_wrong_previous_hash_rejected() {
        let mut log = ReplicationLog::new("node-a");
        let mut block = log.create_block(vec![pattern("x")]);
        block.previous_hash = "forged".to_string();
        assert!(!log.add_block(block));
    }

    #[test]
    fn test_tampered_block_rejected() {
        let mut log = ReplicationLog::new("node-a");
        let mut block = log.create_block(vec![pattern("x")]);
        block.patterns.push(pattern("smuggled"));
        assert!(!log.add_block(block));
    }

    #[test]
    fn test_validate_rejects_wrong_genesis() {
        let log = grown_chain("node-a", 2);
        let mut chain = log.blocks().to_vec();
        chain[0].validator_id = "attacker".to_string();
        assert!(!ReplicationLog::validate_chain(&chain));
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(!ReplicationLog::validate_chain(&[]));
    }

    #[test]
    fn test_resolve_adopts_longer_valid_chain() {
        // Local chain length 2 (genesis + 1), peer offers length 4.
        let mut local = grown_chain("node-a", 1);
        let peer = grown_chain("node-b", 3);
        assert_eq!(local.len(), 2);
        assert_eq!(peer.len(), 4);

        let replaced = local.resolve(vec![peer.blocks().to_vec()]);
        assert!(replaced);
        assert_eq!(local.len(), 4);
        assert_eq!(local.blocks(), peer.blocks());
        assert!(ReplicationLog::validate_chain(local.blocks()));
    }

    #[test]
    fn test_resolve_keeps_local_on_tie() {
        let mut local = grown_chain("node-a", 2);
        let peer = grown_chain("node-b", 2);
        let before = local.blocks().to_vec();
        assert!(!local.resolve(vec![peer.blocks().to_vec()]));
        assert_eq!(local.blocks(), before.as_slice());
    }

    #[test]
    fn test_resolve_rejects_longer_invalid_chain() {
        let mut local = grown_chain("node-a", 1);
        let mut forged = grown_chain("node-b", 4).blocks().to_vec();
        forged[2].patterns.push(pattern("smuggled"));
        assert!(!local.resolve(vec![forged]));
        assert_eq!(local.len(), 2);
    }

    #[test]
    fn test_resolve_picks_longest_of_many() {
        let mut local = grown_chain("node-a", 0);
        let mid = grown_chain("node-b", 2).blocks().to_vec();
        let long = grown_chain("node-c", 5).blocks().to_vec();
        assert!(local.resolve(vec![mid, long.clone()]));
        assert_eq!(local.len(), long.len());
    }

    #[test]
    fn test_resolve_never_shrinks_local() {
        let mut local = grown_chain("node-a", 5);
        let shorter = grown_chain("node-b", 1).blocks().to_vec();
        assert!(!local.resolve(vec![shorter]));
        assert_eq!(local.len(), 6);
    }
}
