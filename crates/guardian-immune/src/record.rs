//! Attack records: the transient payload that travels from a pipeline block
//! to the trigger bus and, when deemed worth saving, into learning.

use chrono::Utc;
use guardian_store::Severity;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which detection stage produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttackSource {
    /// Static regex rule match.
    #[serde(rename = "regex")]
    Regex,
    /// Validator-model verdict.
    #[serde(rename = "ai")]
    Ai,
    /// Fuzzy similarity against the pattern store.
    #[serde(rename = "heuristic")]
    Heuristic,
    /// Rate-limit style detection (repeated offender).
    #[serde(rename = "rate-limit")]
    RateLimit,
    #[serde(rename = "unknown")]
    Unknown,
}

/// Loose context attached to a record by whoever produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordMetadata {
    pub ip: Option<String>,
    pub session_key: Option<String>,
    pub agent_id: Option<String>,
    pub tool_name: Option<String>,
    pub container_name: Option<String>,
    /// Name of the rule that matched, when a rule stage produced the record.
    pub matched_rule: Option<String>,
}

/// One detected attack.
///
/// Records are transient: they live across the trigger-bus → learning
/// handoff and are dropped afterwards. The durable artifact is the
/// fingerprint the learning service distils from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackRecord {
    pub id: String,
    pub timestamp: String,
    pub source: AttackSource,
    pub raw_input: String,
    /// Extracted pattern; falls back to `raw_input` during learning when
    /// empty.
    pub pattern: String,
    pub severity: Severity,
    /// Anomaly score in [0, 1] when an anomaly detector produced one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_score: Option<f64>,
    #[serde(default)]
    pub metadata: RecordMetadata,
}

impl AttackRecord {
    /// Creates a record stamped with a fresh id and the current time.
    pub fn new(
        source: AttackSource,
        raw_input: impl Into<String>,
        pattern: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            source,
            raw_input: raw_input.into(),
            pattern: pattern.into(),
            severity,
            anomaly_score: None,
            metadata: RecordMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: RecordMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_anomaly_score(mut self, score: f64) -> Self {
        self.anomaly_score = Some(score);
        self
    }
}
