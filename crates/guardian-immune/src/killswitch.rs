//! Kill-switch: quiesces the offending sandbox on critical detections.
//!
//! The switch subscribes to the trigger bus's detection stream and reacts
//! only to the sharpest signals: severity critical/high AND priority >= 9.
//! The actual container runtime lives behind [`SandboxDriver`]; the switch
//! only emits abstract pause/stop actions and never retries a failed one.

use crate::record::RecordMetadata;
use crate::trigger::TriggerEvent;
use crate::Result;
use async_trait::async_trait;
use guardian_store::Severity;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Minimum trigger priority that can fire the switch.
const MIN_PRIORITY: u8 = 9;

/// What the switch does to an offending sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoAction {
    Pause,
    Stop,
    None,
}

/// Kill-switch settings.
#[derive(Debug, Clone)]
pub struct KillSwitchConfig {
    pub enabled: bool,
    pub auto_action: AutoAction,
    /// Prefix used when synthesising a sandbox name from a session key.
    pub sandbox_prefix: String,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_action: AutoAction::Pause,
            sandbox_prefix: "moltbot-sandbox-".to_string(),
        }
    }
}

/// The seam to the container runtime.
#[async_trait]
pub trait SandboxDriver: Send + Sync {
    /// One-shot availability probe at startup.
    async fn probe(&self) -> Result<()>;
    async fn pause(&self, target: &str) -> Result<()>;
    async fn stop(&self, target: &str) -> Result<()>;
}

/// Driver that only logs. Used when no runtime is wired up.
pub struct NoopSandboxDriver;

#[async_trait]
impl SandboxDriver for NoopSandboxDriver {
    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    async fn pause(&self, target: &str) -> Result<()> {
        info!("sandbox driver (noop): pause {target}");
        Ok(())
    }

    async fn stop(&self, target: &str) -> Result<()> {
        info!("sandbox driver (noop): stop {target}");
        Ok(())
    }
}

/// Lowercases and replaces every non-alphanumeric character with `-`.
pub fn slug(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// The kill-switch.
pub struct KillSwitch {
    config: KillSwitchConfig,
    driver: Arc<dyn SandboxDriver>,
    /// Result of the startup probe; a failed probe silences all events.
    available: AtomicBool,
}

impl KillSwitch {
    pub fn new(config: KillSwitchConfig, driver: Arc<dyn SandboxDriver>) -> Self {
        Self {
            config,
            driver,
            available: AtomicBool::new(false),
        }
    }

    /// Probes the driver once. Events are silently skipped until this
    /// succeeds; it is not retried.
    pub async fn init(&self) {
        match self.driver.probe().await {
            Ok(()) => {
                self.available.store(true, Ordering::SeqCst);
                debug!("sandbox driver available");
            }
            Err(e) => {
                warn!("sandbox driver probe failed ({e}); kill-switch inert");
            }
        }
    }

    /// Resolves the sandbox a detection refers to.
    ///
    /// Uses the explicit container name when present, else synthesises
    /// `<prefix><slug(session_key)>`.
    pub fn resolve_target(&self, metadata: &RecordMetadata) -> Option<String> {
        if let Some(container) = &metadata.container_name {
            return Some(container.clone());
        }
        metadata
            .session_key
            .as_ref()
            .map(|key| format!("{}{}", self.config.sandbox_prefix, slug(key)))
    }

    /// Reacts to one detection event.
    pub async fn handle(&self, event: &TriggerEvent) {
        if !self.config.enabled || self.config.auto_action == AutoAction::None {
            return;
        }
        if !self.available.load(Ordering::SeqCst) {
            return;
        }
        if !matches!(event.record.severity, Severity::Critical | Severity::High) {
            return;
        }
        if event.verdict.priority < MIN_PRIORITY {
            return;
        }

        let Some(target) = self.resolve_target(&event.record.metadata) else {
            warn!("critical detection {} has no resolvable sandbox", event.record.id);
            return;
        };

        info!(
            "kill-switch firing: {:?} {} (priority {})",
            self.config.auto_action, target, event.verdict.priority
        );
        let outcome = match self.config.auto_action {
            AutoAction::Pause => self.driver.pause(&target).await,
            AutoAction::Stop => self.driver.stop(&target).await,
            AutoAction::None => return,
        };
        if let Err(e) = outcome {
            // Driver failures are logged, never retried.
            warn!("sandbox driver failed for {target}: {e}");
        }
    }

    /// Spawns the subscriber task over the trigger bus's detection stream.
    pub fn spawn(self: Arc<Self>, mut events: broadcast::Receiver<TriggerEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => self.handle(&event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("kill-switch lagged; {missed} detections dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
