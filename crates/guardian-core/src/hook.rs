//! Before-tool-call hook glue.
//!
//! The host plugin API invokes the gateway just before a tool executes.
//! The event's parameter bag is flattened to text, validated through the
//! pipeline, and a block verdict is mapped to the host's
//! `{block, blockReason}` result shape. Absence means pass-through.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The host's before-tool-call event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallEvent {
    pub tool_name: String,
    #[serde(default)]
    pub params: Value,
}

/// Request context delivered alongside the event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HookContext {
    pub agent_id: Option<String>,
    pub session_key: Option<String>,
    pub tool_name: Option<String>,
}

/// The host's block result. Returning `None` from the hook passes the call
/// through instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookBlock {
    pub block: bool,
    pub block_reason: String,
}

impl HookBlock {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            block: true,
            block_reason: reason.into(),
        }
    }
}

/// Flattens a parameter bag to the text the pipeline inspects.
///
/// Collects every string leaf in depth-first order, newline-joined; numbers
/// and booleans are included in rendered form so `{"cmd": "rm", "force":
/// true}` still exposes its shape to the rule set.
pub fn flatten_params(params: &Value) -> String {
    let mut parts = Vec::new();
    collect(params, &mut parts);
    parts.join("\n")
}

fn collect(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Array(items) => {
            for item in items {
                collect(item, out);
            }
        }
        Value::Object(map) => {
            for (_, item) in map {
                collect(item, out);
            }
        }
        Value::Null => {}
    }
}
