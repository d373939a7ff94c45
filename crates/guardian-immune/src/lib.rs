//! # Guardian Immune System
//!
//! The learning half of the gateway: deciding which blocked payloads are
//! worth remembering, distilling them into fingerprints, hunting for novel
//! attacks proactively, and pulling the handbrake when something critical
//! gets through to a sandbox.
//!
//! ## Flow
//!
//! ```text
//!   pipeline blocks ──▶ TriggerBus ──batch──▶ LearningService ──▶ PatternStore
//!                          │                        ▲
//!                          │ TriggerEvent           │ direct entry
//!                          ▼                        │
//!                      KillSwitch            DiscoveryService
//! ```
//!
//! The trigger bus and the discovery worker are two *separate* entry points
//! into the learning service: discovery acceptances never loop back through
//! the bus, so synthetic payloads cannot masquerade as live AI blocks.

mod discovery;
mod error;
mod killswitch;
mod learn;
mod record;
mod trigger;

pub use discovery::{DiscoveryConfig, DiscoveryResult, DiscoveryService, SEED_CATEGORIES};
pub use error::ImmuneError;
pub use killswitch::{
    slug, AutoAction, KillSwitch, KillSwitchConfig, NoopSandboxDriver, SandboxDriver,
};
pub use learn::{LearnOutcome, LearnedPattern, LearningService};
pub use record::{AttackRecord, AttackSource, RecordMetadata};
pub use trigger::{
    TriggerBus, TriggerBusConfig, TriggerEvent, TriggerToggles, TriggerVerdict,
};

/// Result type for immune-system operations.
pub type Result<T> = std::result::Result<T, ImmuneError>;
