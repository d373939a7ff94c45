//! Pipeline verdict types.

use serde::{Deserialize, Serialize};

/// Telemetry for one executed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    /// Stage number, 1..4.
    pub stage: u8,
    /// Stage name (`regex`, `pattern_db`, `guardian_ai`, `json_parser`).
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StageReport {
    pub fn passed(stage: u8, name: &str) -> Self {
        Self {
            stage,
            name: name.to_string(),
            passed: true,
            detail: None,
        }
    }

    pub fn blocked(stage: u8, name: &str, detail: impl Into<String>) -> Self {
        Self {
            stage,
            name: name.to_string(),
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

/// The pipeline's answer for one payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub allowed: bool,
    /// `<STAGE_TAG>` or `<STAGE_TAG>: <detail>` when blocked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    /// Highest stage that executed, 0 when short-circuited before stage 1.
    pub stage_reached: u8,
    pub stages: Vec<StageReport>,
    pub duration_ms: u64,
}

impl Verdict {
    pub fn allow(stage_reached: u8, stages: Vec<StageReport>, duration_ms: u64) -> Self {
        Self {
            allowed: true,
            block_reason: None,
            stage_reached,
            stages,
            duration_ms,
        }
    }

    pub fn block(
        reason: impl Into<String>,
        stage_reached: u8,
        stages: Vec<StageReport>,
        duration_ms: u64,
    ) -> Self {
        Self {
            allowed: false,
            block_reason: Some(reason.into()),
            stage_reached,
            stages,
            duration_ms,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}
