//! Strict, fail-closed parsing of validator-model replies.
//!
//! The model is instructed to reply with
//! `{"result": bool, "confidence": number, "flags": [string]}` and nothing
//! else. This parser holds it to that: any deviation from the contract is a
//! tagged rejection, and a rejection blocks the request upstream. One
//! recovery pass is attempted for replies that wrap the JSON in prose or a
//! code fence: the first `{...}` substring is extracted and re-parsed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Successfully parsed model verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardianVerdict {
    /// `true` iff the reply's `result` field was the boolean literal `true`.
    pub allowed: bool,
    /// Confidence, kept only when numeric and within [0, 1].
    pub confidence: Option<f64>,
    /// Flags, keeping only string members.
    pub flags: Vec<String>,
}

/// Why a reply was rejected. Each variant maps to a stable tag that
/// surfaces in the pipeline's block reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseRejection {
    /// Reply was empty or whitespace.
    EmptyResponse,
    /// Reply (and its recovered substring) was not valid JSON.
    NotJson,
    /// Reply was JSON but not an object.
    NotObject,
    /// The object carried no `result` field.
    MissingResult,
    /// `result` existed but was not strictly a boolean.
    ResultNotBool,
}

impl ParseRejection {
    /// Stable tag used in block reasons.
    pub const fn tag(self) -> &'static str {
        match self {
            ParseRejection::EmptyResponse => "EMPTY_RESPONSE",
            ParseRejection::NotJson => "NOT_JSON",
            ParseRejection::NotObject => "NOT_OBJECT",
            ParseRejection::MissingResult => "MISSING_RESULT",
            ParseRejection::ResultNotBool => "RESULT_NOT_BOOL",
        }
    }
}

impl fmt::Display for ParseRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Extracts the first `{...}` substring from free-form text.
///
/// Used as the single recovery attempt when a model wraps its JSON in prose
/// or markdown fences. Returns the span from the first `{` to the last `}`;
/// nesting inside that span is the JSON parser's problem.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end > start {
        Some(&raw[start..=end])
    } else {
        None
    }
}

/// Parses a raw model reply under fail-closed rules.
pub fn parse_verdict(raw: &str) -> Result<GuardianVerdict, ParseRejection> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseRejection::EmptyResponse);
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => {
            // Single recovery attempt: first {...} substring.
            let candidate = extract_json_object(trimmed).ok_or(ParseRejection::NotJson)?;
            serde_json::from_str(candidate).map_err(|_| ParseRejection::NotJson)?
        }
    };

    let object = value.as_object().ok_or(ParseRejection::NotObject)?;
    let result = object.get("result").ok_or(ParseRejection::MissingResult)?;
    let allowed = match result {
        Value::Bool(b) => *b,
        _ => return Err(ParseRejection::ResultNotBool),
    };

    let confidence = object
        .get("confidence")
        .and_then(Value::as_f64)
        .filter(|c| (0.0..=1.0).contains(c));

    let flags = object
        .get("flags")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(GuardianVerdict {
        allowed,
        confidence,
        flags,
    })
}
