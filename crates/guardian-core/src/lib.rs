//! # Guardian Core
//!
//! The unified facade of the gateway: a multi-stage validation pipeline in
//! front of dangerous tools, wired to the learning loop and the fleet
//! replication layer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Guardian                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  tool call ──▶ ValidationPipeline                            │
//! │                 1 regex   2 pattern-db   3 model   4 parser  │
//! │                      │ (block)                               │
//! │                      ▼                                       │
//! │                 TriggerBus ──▶ LearningService ──▶ Store     │
//! │                      │                  │                    │
//! │                 KillSwitch        ReplicationLog ──▶ Gossip  │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security model
//!
//! The request path is fail-closed: a model transport failure, a malformed
//! model reply, or any stage's block verdict stops the tool call. The
//! replication path is fail-open: peers being unreachable never affects
//! request handling, and outgoing gossip degrades to the offline queue.

mod api;
mod config;
mod error;
mod guardian;
mod hook;
mod pipeline;
mod verdict;

pub use api::{ApiResponse, Method};
pub use config::{
    AttackTriggerConfig, AutoDiscoveryConfig, ConsensusOptions, GuardianConfig, KillSwitchOptions,
    LedgerOptions, NetworkOptions, StageToggles, TriggerRuleToggles, TriggerThresholds,
};
pub use error::GuardianError;
pub use guardian::{Guardian, GatewayStats};
pub use hook::{flatten_params, HookBlock, HookContext, ToolCallEvent};
pub use pipeline::ValidationPipeline;
pub use verdict::{StageReport, Verdict};

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GuardianError>;
