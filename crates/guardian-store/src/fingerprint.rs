//! Fingerprint identity and the severity taxonomy.
//!
//! A fingerprint's identity is the first 16 hex digits of the SHA-256 of its
//! lowercased, trimmed form. The prefix keeps the identity index small while
//! leaving 64 bits of collision resistance, which is plenty for a catalog
//! that tops out in the tens of thousands of entries.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex digits retained from the SHA-256 digest.
const IDENTITY_HEX_LEN: usize = 16;

/// Severity level attached to a category and to individual detections.
///
/// Ordering is by danger: `Critical > High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Immediate compromise potential (remote shell, data destruction).
    Critical,
    /// Serious but typically requires further steps to exploit.
    High,
    /// Suspicious, worth learning, not immediately destructive.
    Medium,
    /// Informational or noisy signal.
    Low,
}

impl Severity {
    /// Numeric weight on the 0-10 scale used by the matcher and trigger
    /// policy. Thresholds elsewhere stated as "severity >= 8" compare
    /// against this weight.
    pub const fn weight(self) -> u8 {
        match self {
            Severity::Critical => 10,
            Severity::High => 8,
            Severity::Medium => 5,
            Severity::Low => 2,
        }
    }

    /// Lenient parse used on model replies; unknown strings fall back to
    /// `Medium` so a sloppy categorisation never drops a pattern.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "low" => Severity::Low,
            _ => Severity::Medium,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        };
        write!(f, "{s}")
    }
}

/// Normalises a payload for identity purposes: trim, lowercase.
pub fn normalize_pattern(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Computes the identity of a fingerprint: the first 16 hex digits of the
/// SHA-256 of its normalised form.
///
/// # Example
///
/// ```rust
/// use guardian_store::fingerprint_id;
///
/// // Identity is case- and padding-insensitive.
/// assert_eq!(fingerprint_id("  DROP TABLE users  "), fingerprint_id("drop table users"));
/// assert_eq!(fingerprint_id("x").len(), 16);
/// ```
pub fn fingerprint_id(text: &str) -> String {
    let digest = Sha256::digest(normalize_pattern(text).as_bytes());
    hex::encode(digest)[..IDENTITY_HEX_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_16_hex() {
        let id = fingerprint_id("UNION SELECT * FROM users --");
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identity_normalises_case_and_whitespace() {
        assert_eq!(
            fingerprint_id("  Ignore Previous Instructions  "),
            fingerprint_id("ignore previous instructions")
        );
    }

    #[test]
    fn test_distinct_payloads_distinct_identity() {
        assert_ne!(fingerprint_id("rm -rf /"), fingerprint_id("rm -rf /tmp"));
    }

    #[test]
    fn test_severity_weights() {
        assert_eq!(Severity::Critical.weight(), 10);
        assert_eq!(Severity::High.weight(), 8);
        assert_eq!(Severity::Medium.weight(), 5);
        assert_eq!(Severity::Low.weight(), 2);
    }

    #[test]
    fn test_severity_parse_lenient() {
        assert_eq!(Severity::parse_lenient("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::parse_lenient(" high "), Severity::High);
        assert_eq!(Severity::parse_lenient("nonsense"), Severity::Medium);
    }

    #[test]
    fn test_severity_serde_is_lowercase() {
        let json = serde_json::to_string(&Severity::High).unwrap();
        assert_eq!(json, "\"high\"");
        let parsed: Severity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(parsed, Severity::Critical);
    }
}
