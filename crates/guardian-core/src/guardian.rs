//! The unified gateway facade.
//!
//! [`Guardian`] constructs every component from one [`GuardianConfig`],
//! owns the background tasks, and exposes the small API the host embeds:
//! validate, the before-tool-call hook, toggle, status and stats.

use crate::config::GuardianConfig;
use crate::hook::{flatten_params, HookBlock, HookContext, ToolCallEvent};
use crate::pipeline::ValidationPipeline;
use crate::verdict::Verdict;
use crate::Result;
use chrono::Utc;
use guardian_immune::{
    AttackRecord, DiscoveryService, KillSwitch, LearnOutcome, LearningService, RecordMetadata,
    SandboxDriver, TriggerBus,
};
use guardian_ledger::{BlockPattern, GossipEvent, GossipNode, OfflineQueue, ReplicationLog};
use guardian_model::LanguageModel;
use guardian_store::{BatchPattern, PatternStore, SharedPatternStore, StoreError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Running counters surfaced by the stats endpoint.
#[derive(Debug, Default)]
pub struct GatewayStats {
    pub validations: AtomicU64,
    pub blocked: AtomicU64,
    pub patterns_learned: AtomicU64,
    pub blocks_minted: AtomicU64,
}

impl GatewayStats {
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "validations": self.validations.load(Ordering::Relaxed),
            "blocked": self.blocked.load(Ordering::Relaxed),
            "patternsLearned": self.patterns_learned.load(Ordering::Relaxed),
            "blocksMinted": self.blocks_minted.load(Ordering::Relaxed),
        })
    }
}

/// The gateway: validation pipeline plus the learning and replication loop.
pub struct Guardian {
    config: GuardianConfig,
    enabled: Arc<AtomicBool>,
    store: SharedPatternStore,
    pipeline: Arc<ValidationPipeline>,
    bus: Arc<TriggerBus>,
    learner: Arc<LearningService>,
    discovery: Arc<DiscoveryService>,
    killswitch: Arc<KillSwitch>,
    chain: Arc<Mutex<ReplicationLog>>,
    gossip: Option<Arc<GossipNode>>,
    stats: Arc<GatewayStats>,
    batch_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<AttackRecord>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Guardian {
    /// Wires up every component. No background task runs until
    /// [`Guardian::start`].
    pub fn new(
        config: GuardianConfig,
        model: Arc<dyn LanguageModel>,
        driver: Arc<dyn SandboxDriver>,
    ) -> Self {
        let enabled = Arc::new(AtomicBool::new(config.enabled));
        let store: SharedPatternStore = Arc::new(RwLock::new(PatternStore::load(
            config.data_dir.join("patterns.json"),
        )));

        let node_id = Uuid::new_v4().to_string();
        let chain = Arc::new(Mutex::new(ReplicationLog::new(node_id)));

        let (bus, batch_rx) = TriggerBus::new(config.attack_trigger.to_bus_config());
        bus.set_enabled(config.attack_trigger.auto_save);

        let learner = Arc::new(LearningService::new(store.clone(), model.clone()));
        let discovery = Arc::new(DiscoveryService::new(
            learner.clone(),
            model.clone(),
            store.clone(),
            config.auto_discovery.to_discovery_config(),
        ));
        let killswitch = Arc::new(KillSwitch::new(
            config.kill_switch.to_kill_switch_config(),
            driver,
        ));

        let gossip = if config.distributed_ledger.enabled {
            let queue = Arc::new(OfflineQueue::load(config.data_dir.join("offline-queue.json")));
            Some(GossipNode::new(
                config.distributed_ledger.network.to_gossip_config(),
                chain.clone(),
                Some(queue),
            ))
        } else {
            None
        };

        let pipeline = Arc::new(ValidationPipeline::new(
            enabled.clone(),
            config.stages.clone(),
            store.clone(),
            model,
            config.guardian_ai.max_tokens,
            bus.clone(),
        ));

        Self {
            config,
            enabled,
            store,
            pipeline,
            bus,
            learner,
            discovery,
            killswitch,
            chain,
            gossip,
            stats: Arc::new(GatewayStats::default()),
            batch_rx: Mutex::new(Some(batch_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the background machinery: flush timer, kill-switch
    /// subscriber, learning consumer, ledger bridge, gossip and (when
    /// configured) a startup discovery run.
    pub async fn start(&self) -> Result<()> {
        let mut tasks = Vec::new();

        tasks.push(self.bus.spawn_flush_timer());

        self.killswitch.init().await;
        tasks.push(self.killswitch.clone().spawn(self.bus.subscribe()));

        if let Some(rx) = self.batch_rx.lock().expect("batch_rx lock poisoned").take() {
            tasks.push(self.spawn_learning_consumer(rx));
        }
        tasks.push(self.spawn_ledger_bridge());

        if let Some(gossip) = &self.gossip {
            let mut events = gossip.subscribe();
            gossip.start().await?;
            let store = self.store.clone();
            let chain = self.chain.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(GossipEvent::BlockAppended(block)) => {
                            mirror_patterns(&store, block.patterns);
                        }
                        Ok(GossipEvent::ChainReplaced { .. }) => {
                            let patterns: Vec<BlockPattern> = chain
                                .lock()
                                .expect("chain lock poisoned")
                                .blocks()
                                .iter()
                                .flat_map(|b| b.patterns.clone())
                                .collect();
                            mirror_patterns(&store, patterns);
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("gossip mirror lagged; {missed} events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }

        if self.config.auto_discovery.enabled && self.config.auto_discovery.run_on_startup {
            let discovery = self.discovery.clone();
            tasks.push(tokio::spawn(async move {
                match discovery.start().await {
                    Ok(result) => info!(
                        "startup discovery: {} accepted, {} duplicates",
                        result.accepted, result.duplicates
                    ),
                    Err(e) => warn!("startup discovery failed: {e}"),
                }
            }));
        }

        self.tasks.lock().expect("tasks lock poisoned").extend(tasks);
        info!("guardian started (enabled: {})", self.is_enabled());
        Ok(())
    }

    /// Drains trigger-bus batches into the learning service.
    fn spawn_learning_consumer(
        &self,
        mut rx: mpsc::UnboundedReceiver<Vec<AttackRecord>>,
    ) -> JoinHandle<()> {
        let learner = self.learner.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                for record in batch {
                    match learner.learn(&record).await {
                        Ok(LearnOutcome::Learned(learned)) => {
                            stats.patterns_learned.fetch_add(1, Ordering::Relaxed);
                            info!("learned '{}' from trigger batch", learned.category);
                        }
                        Ok(_) => {}
                        Err(e) => warn!("learning failed: {e}"),
                    }
                }
            }
        })
    }

    /// Turns learned patterns (from both entry points) into chain blocks
    /// and gossips them. `blockInterval` seconds is the minimum spacing;
    /// patterns learned earlier fold into the next minted block.
    fn spawn_ledger_bridge(&self) -> JoinHandle<()> {
        let mut learned_rx = self.learner.subscribe();
        let chain = self.chain.clone();
        let gossip = self.gossip.clone();
        let stats = self.stats.clone();
        let block_interval =
            Duration::from_secs(self.config.distributed_ledger.consensus.block_interval);

        tokio::spawn(async move {
            let mut pending: Vec<BlockPattern> = Vec::new();
            let mut last_mint: Option<Instant> = None;
            loop {
                match learned_rx.recv().await {
                    Ok(learned) => {
                        pending.push(BlockPattern {
                            pattern: learned.pattern,
                            category: learned.category,
                            severity: learned.severity,
                            ts: Utc::now().to_rfc3339(),
                        });
                        let due = last_mint.map_or(true, |t| t.elapsed() >= block_interval);
                        if !due {
                            continue;
                        }

                        let minted = {
                            let mut log = chain.lock().expect("chain lock poisoned");
                            let block = log.create_block(std::mem::take(&mut pending));
                            log.add_block(block.clone()).then_some(block)
                        };
                        if let Some(block) = minted {
                            last_mint = Some(Instant::now());
                            stats.blocks_minted.fetch_add(1, Ordering::Relaxed);
                            // Broadcast only after local acceptance.
                            if let Some(gossip) = &gossip {
                                if let Err(e) = gossip.broadcast_block(&block) {
                                    warn!("block broadcast failed: {e}");
                                }
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("ledger bridge lagged; {missed} learned patterns unminted");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Stops background work and persists the store.
    pub async fn shutdown(&self) {
        self.discovery.stop();
        self.bus.stop();
        if let Some(gossip) = &self.gossip {
            gossip.stop();
        }
        for task in self.tasks.lock().expect("tasks lock poisoned").drain(..) {
            task.abort();
        }
        if let Ok(mut store) = self.store.write() {
            match store.save() {
                Ok(()) | Err(StoreError::NoBackingPath) => {}
                Err(e) => warn!("final store persist failed: {e}"),
            }
        }
        info!("guardian stopped");
    }

    /// Validates one payload.
    pub async fn validate(&self, text: &str) -> Verdict {
        self.validate_with_metadata(text, RecordMetadata::default()).await
    }

    /// Validates one payload with request context.
    pub async fn validate_with_metadata(&self, text: &str, metadata: RecordMetadata) -> Verdict {
        self.stats.validations.fetch_add(1, Ordering::Relaxed);
        let verdict = self.pipeline.validate_with_metadata(text, metadata).await;
        if !verdict.allowed {
            self.stats.blocked.fetch_add(1, Ordering::Relaxed);
        }
        verdict
    }

    /// The before-tool-call hook.
    ///
    /// Returns `None` (pass-through) for tools outside `blockedTools` and
    /// for payloads the pipeline allows.
    pub async fn on_before_tool_call(
        &self,
        event: &ToolCallEvent,
        ctx: &HookContext,
    ) -> Option<HookBlock> {
        if !self.config.blocked_tools.iter().any(|t| t == &event.tool_name) {
            return None;
        }
        let text = flatten_params(&event.params);
        let metadata = RecordMetadata {
            tool_name: Some(event.tool_name.clone()),
            agent_id: ctx.agent_id.clone(),
            session_key: ctx.session_key.clone(),
            ..Default::default()
        };
        let verdict = self.validate_with_metadata(&text, metadata).await;
        if verdict.allowed {
            None
        } else {
            let reason = verdict
                .block_reason
                .unwrap_or_else(|| "SECURITY_BLOCK".to_string());
            warn!("tool call '{}' blocked: {reason}", event.tool_name);
            Some(HookBlock::new(reason))
        }
    }

    /// Flips the global toggle.
    pub fn toggle(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        info!("guardian {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Runs a discovery session now, regardless of `runOnStartup`.
    pub async fn run_discovery(&self) -> Result<guardian_immune::DiscoveryResult> {
        Ok(self.discovery.start().await?)
    }

    /// Adds a regex rule at runtime.
    pub fn add_rule(&self, name: &str, pattern: &str) -> Result<()> {
        Ok(self.pipeline.add_rule(name, pattern)?)
    }

    pub fn config(&self) -> &GuardianConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedPatternStore {
        &self.store
    }

    pub fn stats(&self) -> &GatewayStats {
        &self.stats
    }

    /// Current chain length including genesis.
    pub fn chain_length(&self) -> usize {
        self.chain.lock().expect("chain lock poisoned").len()
    }

    /// Shared chain handle (tests and tooling).
    pub fn chain(&self) -> &Arc<Mutex<ReplicationLog>> {
        &self.chain
    }

    /// Live peer connections, 0 when replication is disabled.
    pub fn peer_count(&self) -> usize {
        self.gossip.as_ref().map_or(0, |g| g.peer_count())
    }

    /// Gossip handle when replication is enabled.
    pub fn gossip(&self) -> Option<&Arc<GossipNode>> {
        self.gossip.as_ref()
    }
}

/// Mirrors replicated block patterns into the local store. Duplicates are
/// rejected by identity, so replaying a whole chain is idempotent.
fn mirror_patterns(store: &SharedPatternStore, patterns: Vec<BlockPattern>) {
    if patterns.is_empty() {
        return;
    }
    let batch: Vec<BatchPattern> = patterns
        .into_iter()
        .map(|p| BatchPattern {
            category: p.category,
            pattern: p.pattern,
            severity: p.severity,
        })
        .collect();

    let Ok(mut store) = store.write() else {
        warn!("pattern store lock poisoned; mirror skipped");
        return;
    };
    let (added, duplicated) = store.add_batch(batch);
    if added > 0 {
        info!("mirrored {added} replicated pattern(s) ({duplicated} duplicate)");
        match store.save() {
            Ok(()) | Err(StoreError::NoBackingPath) => {}
            Err(e) => warn!("mirror persist failed: {e}"),
        }
    }
}
