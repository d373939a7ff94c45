//! # Guardian Filter
//!
//! The two local detection stages of the validation pipeline:
//!
//! 1. **Rule set** - hard-coded, named, case-insensitive regexes covering
//!    well-known attack families. Cheap, deterministic, zero network I/O.
//! 2. **Pattern matcher** - fuzzy word-set similarity against the learned
//!    fingerprint store, so variants of known attacks are caught even when
//!    no static rule fires.
//!
//! Both stages are pure lookups; neither mutates the store.

mod matcher;
mod rules;

pub use matcher::{MatchOutcome, PatternMatcher, SimilarMatch, BLOCK_SIMILARITY, BLOCK_WEIGHT};
pub use rules::{FilterError, FilterOutcome, RuleSet};
