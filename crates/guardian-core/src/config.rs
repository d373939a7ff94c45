//! The recognised configuration surface.
//!
//! All keys are camelCase on disk and every struct has full defaults, so a
//! partial (or absent) configuration file always yields a runnable gateway.

use guardian_immune::{
    AutoAction, DiscoveryConfig, KillSwitchConfig, TriggerBusConfig, TriggerToggles,
};
use guardian_ledger::GossipConfig;
use guardian_model::ModelSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardianConfig {
    /// Global on/off toggle.
    pub enabled: bool,

    /// Per-stage enables for the validation pipeline.
    pub stages: StageToggles,

    /// Validator-model adapter settings.
    pub guardian_ai: ModelSettings,

    /// Tool names subject to validation on the before-tool-call hook.
    pub blocked_tools: Vec<String>,

    /// Trigger-bus policy.
    pub attack_trigger: AttackTriggerConfig,

    /// Discovery worker.
    pub auto_discovery: AutoDiscoveryConfig,

    /// Kill-switch.
    pub kill_switch: KillSwitchOptions,

    /// Peer replication.
    pub distributed_ledger: LedgerOptions,

    /// Directory for the pattern store, offline queue and runtime state.
    pub data_dir: PathBuf,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stages: StageToggles::default(),
            guardian_ai: ModelSettings::default(),
            blocked_tools: vec![
                "exec".to_string(),
                "bash".to_string(),
                "shell".to_string(),
                "write_file".to_string(),
                "send_email".to_string(),
                "browser".to_string(),
            ],
            attack_trigger: AttackTriggerConfig::default(),
            auto_discovery: AutoDiscoveryConfig::default(),
            kill_switch: KillSwitchOptions::default(),
            distributed_ledger: LedgerOptions::default(),
            data_dir: PathBuf::from("./guardian-data"),
        }
    }
}

/// Per-stage enables, pipeline order 1..4.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageToggles {
    pub regex: bool,
    pub pattern_db: bool,
    pub guardian_ai: bool,
    pub json_parser: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            regex: true,
            pattern_db: true,
            guardian_ai: true,
            json_parser: true,
        }
    }
}

/// Trigger-bus policy surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttackTriggerConfig {
    /// Per-rule toggles.
    pub triggers: TriggerRuleToggles,
    pub thresholds: TriggerThresholds,
    /// Whether save-worthy records are buffered for learning at all.
    pub auto_save: bool,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
}

impl Default for AttackTriggerConfig {
    fn default() -> Self {
        Self {
            triggers: TriggerRuleToggles::default(),
            thresholds: TriggerThresholds::default(),
            auto_save: true,
            batch_size: 10,
            flush_interval_ms: 30_000,
        }
    }
}

impl AttackTriggerConfig {
    /// Maps the serde surface onto the bus's runtime config.
    pub fn to_bus_config(&self) -> TriggerBusConfig {
        TriggerBusConfig {
            toggles: TriggerToggles {
                ai_block: self.triggers.ai_block,
                high_anomaly: self.triggers.high_anomaly,
                unknown_pattern: self.triggers.unknown_pattern,
                repeated_attack: self.triggers.repeated_attack,
            },
            anomaly_threshold: self.thresholds.anomaly_score,
            repeat_threshold: self.thresholds.repeat_count,
            repeat_window: Duration::from_millis(self.thresholds.repeat_window_ms),
            batch_size: self.batch_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
        }
    }
}

/// Which trigger rules are active.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerRuleToggles {
    pub ai_block: bool,
    pub high_anomaly: bool,
    pub unknown_pattern: bool,
    pub repeated_attack: bool,
}

impl Default for TriggerRuleToggles {
    fn default() -> Self {
        Self {
            ai_block: true,
            high_anomaly: true,
            unknown_pattern: true,
            repeated_attack: true,
        }
    }
}

/// Numeric trigger thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerThresholds {
    /// Anomaly score at or above which HIGH_ANOMALY fires.
    pub anomaly_score: f64,
    /// Same-IP hits inside the window at which REPEATED_ATTACK fires.
    pub repeat_count: usize,
    pub repeat_window_ms: u64,
}

impl Default for TriggerThresholds {
    fn default() -> Self {
        Self {
            anomaly_score: 0.8,
            repeat_count: 3,
            repeat_window_ms: 60_000,
        }
    }
}

/// Discovery worker surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoDiscoveryConfig {
    pub enabled: bool,
    pub target_count: usize,
    pub timeout_minutes: u64,
    pub run_on_startup: bool,
    /// Optional model override for generation calls.
    pub model: Option<String>,
    pub iteration_delay_ms: u64,
}

impl Default for AutoDiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_count: 5,
            timeout_minutes: 10,
            run_on_startup: false,
            model: None,
            iteration_delay_ms: 2_000,
        }
    }
}

impl AutoDiscoveryConfig {
    pub fn to_discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            target_count: self.target_count,
            timeout: Duration::from_secs(self.timeout_minutes * 60),
            iteration_delay: Duration::from_millis(self.iteration_delay_ms),
        }
    }
}

/// Kill-switch surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KillSwitchOptions {
    pub enabled: bool,
    pub auto_action: AutoAction,
}

impl Default for KillSwitchOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_action: AutoAction::Pause,
        }
    }
}

impl KillSwitchOptions {
    pub fn to_kill_switch_config(&self) -> KillSwitchConfig {
        KillSwitchConfig {
            enabled: self.enabled,
            auto_action: self.auto_action,
            ..Default::default()
        }
    }
}

/// Replication surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LedgerOptions {
    pub enabled: bool,
    pub network: NetworkOptions,
    pub consensus: ConsensusOptions,
}

/// Gossip network knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkOptions {
    pub bootstrap_nodes: Vec<String>,
    pub listen_port: u16,
    pub max_peers: usize,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            bootstrap_nodes: Vec::new(),
            listen_port: 7432,
            max_peers: 16,
        }
    }
}

impl NetworkOptions {
    pub fn to_gossip_config(&self) -> GossipConfig {
        GossipConfig {
            listen_port: self.listen_port,
            bootstrap: self.bootstrap_nodes.clone(),
            max_peers: self.max_peers,
        }
    }
}

/// Consensus knobs.
///
/// Consensus itself is the longest-valid-chain rule; `minValidators` and
/// `approvalThreshold` are accepted for forward compatibility but do not
/// drive behaviour. `blockInterval` (seconds) is the minimum spacing
/// between locally minted blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsensusOptions {
    pub min_validators: usize,
    pub approval_threshold: f64,
    pub block_interval: u64,
}

impl Default for ConsensusOptions {
    fn default() -> Self {
        Self {
            min_validators: 1,
            approval_threshold: 0.5,
            block_interval: 0,
        }
    }
}
