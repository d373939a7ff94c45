//! Discovery: a background red-team loop that asks the model for novel
//! attack payloads and feeds them straight into learning.
//!
//! Discovery is deliberately a *direct* caller of the learning service.
//! Its records carry `source = ai`, which would rank as priority-10
//! `AI_BLOCK` if they ever re-entered the trigger bus; bypassing the bus
//! keeps synthetic traffic out of the live-detection statistics.

use crate::error::ImmuneError;
use crate::learn::{LearnOutcome, LearningService};
use crate::record::{AttackRecord, AttackSource};
use crate::Result;
use guardian_model::{CompletionRequest, LanguageModel};
use guardian_store::{Severity, SharedPatternStore};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Categories used to seed generation when the store is still empty.
pub const SEED_CATEGORIES: &[&str] = &[
    "prompt_injection",
    "sql_injection",
    "command_injection",
    "path_traversal",
    "xss",
];

/// Maximum number of existing patterns listed as exclusions in the
/// generation prompt.
const MAX_EXCLUSIONS: usize = 10;

const GENERATION_SYSTEM_PROMPT: &str = "\
You are a red-team payload generator hardening an AI agent gateway. Given an \
attack category and a list of payloads the gateway already recognises, \
produce exactly ONE novel payload of that category that is NOT in the list. \
Reply with the payload only: no commentary, no markdown, no quotes.";

/// Discovery knobs.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Acceptances after which a run stops.
    pub target_count: usize,
    /// Overall budget for one run.
    pub timeout: Duration,
    /// Pause between iterations to throttle the model.
    pub iteration_delay: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            target_count: 5,
            timeout: Duration::from_secs(10 * 60),
            iteration_delay: Duration::from_secs(2),
        }
    }
}

/// Summary of one discovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryResult {
    /// Payloads produced by the model.
    pub generated: usize,
    /// Payloads accepted into the store.
    pub accepted: usize,
    /// Payloads rejected as duplicates.
    pub duplicates: usize,
    /// Iterations lost to model failures or unusable payloads.
    pub rejected: usize,
    /// Whether the run hit its time budget.
    pub timed_out: bool,
}

/// The discovery worker. At most one run is in flight per instance.
pub struct DiscoveryService {
    learner: Arc<LearningService>,
    model: Arc<dyn LanguageModel>,
    store: SharedPatternStore,
    config: DiscoveryConfig,
    running: AtomicBool,
    cancel: AtomicBool,
}

impl DiscoveryService {
    pub fn new(
        learner: Arc<LearningService>,
        model: Arc<dyn LanguageModel>,
        store: SharedPatternStore,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            learner,
            model,
            store,
            config,
            running: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
        }
    }

    /// Whether a run is currently in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests cancellation; observed at the head of the work loop.
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Runs one discovery session.
    ///
    /// Refuses concurrent starts. The work loop races a single overall
    /// deadline; whatever was accepted before the deadline stands.
    pub async fn start(&self) -> Result<DiscoveryResult> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ImmuneError::DiscoveryBusy);
        }
        self.cancel.store(false, Ordering::SeqCst);

        info!(
            "discovery run started (target {}, budget {:?})",
            self.config.target_count, self.config.timeout
        );

        let counters = Mutex::new(DiscoveryResult::default());
        let timed_out = tokio::select! {
            _ = self.work_loop(&counters) => false,
            _ = tokio::time::sleep(self.config.timeout) => true,
        };

        self.running.store(false, Ordering::SeqCst);

        let mut result = counters
            .lock()
            .map_err(|_| ImmuneError::Internal("discovery counters poisoned".to_string()))?
            .clone();
        result.timed_out = timed_out;
        info!(
            "discovery run finished: {} accepted, {} duplicates, {} rejected{}",
            result.accepted,
            result.duplicates,
            result.rejected,
            if timed_out { " (timed out)" } else { "" }
        );
        Ok(result)
    }

    async fn work_loop(&self, counters: &Mutex<DiscoveryResult>) {
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                debug!("discovery cancelled");
                return;
            }
            {
                let done = counters
                    .lock()
                    .map(|c| c.accepted >= self.config.target_count)
                    .unwrap_or(true);
                if done {
                    return;
                }
            }

            let (category, exclusions) = self.pick_target();
            match self.generate(&category, &exclusions).await {
                Ok(payload) if payload.chars().count() >= 3 => {
                    if let Ok(mut c) = counters.lock() {
                        c.generated += 1;
                    }
                    let record =
                        AttackRecord::new(AttackSource::Ai, payload.clone(), payload, Severity::Medium);
                    match self.learner.learn(&record).await {
                        Ok(LearnOutcome::Learned(_)) => {
                            if let Ok(mut c) = counters.lock() {
                                c.accepted += 1;
                            }
                        }
                        Ok(LearnOutcome::Duplicate) => {
                            if let Ok(mut c) = counters.lock() {
                                c.duplicates += 1;
                            }
                        }
                        Ok(LearnOutcome::TooShort) => {
                            if let Ok(mut c) = counters.lock() {
                                c.rejected += 1;
                            }
                        }
                        Err(e) => {
                            warn!("discovery learn step failed: {e}");
                            if let Ok(mut c) = counters.lock() {
                                c.rejected += 1;
                            }
                        }
                    }
                }
                Ok(_) => {
                    if let Ok(mut c) = counters.lock() {
                        c.rejected += 1;
                    }
                }
                Err(e) => {
                    // Skip the iteration; the budget keeps the loop bounded.
                    warn!("discovery generation failed: {e}");
                    if let Ok(mut c) = counters.lock() {
                        c.rejected += 1;
                    }
                }
            }

            tokio::time::sleep(self.config.iteration_delay).await;
        }
    }

    /// Picks a category uniformly and collects up to 10 of its stored
    /// patterns as exclusions for the generation prompt.
    fn pick_target(&self) -> (String, Vec<String>) {
        let store = match self.store.read() {
            Ok(store) => store,
            Err(_) => return (SEED_CATEGORIES[0].to_string(), Vec::new()),
        };

        let names = store.category_names();
        let category = if names.is_empty() {
            let idx = rand::thread_rng().gen_range(0..SEED_CATEGORIES.len());
            SEED_CATEGORIES[idx].to_string()
        } else {
            let idx = rand::thread_rng().gen_range(0..names.len());
            names[idx].clone()
        };

        let exclusions = store
            .categories()
            .get(&category)
            .map(|entry| entry.patterns.iter().take(MAX_EXCLUSIONS).cloned().collect())
            .unwrap_or_default();

        (category, exclusions)
    }

    async fn generate(&self, category: &str, exclusions: &[String]) -> Result<String> {
        let mut user = format!("Category: {category}\n");
        if !exclusions.is_empty() {
            user.push_str("Already known payloads:\n");
            for pattern in exclusions {
                user.push_str("- ");
                user.push_str(pattern);
                user.push('\n');
            }
        }
        user.push_str("Produce one novel payload.");

        let raw = self
            .model
            .complete(CompletionRequest::deterministic(GENERATION_SYSTEM_PROMPT, user, 256))
            .await?;
        Ok(clean_payload(&raw))
    }
}

/// Strips code fences and surrounding quotes from a generated payload.
fn clean_payload(raw: &str) -> String {
    let mut text = raw.trim();
    if text.starts_with("```") {
        text = text.trim_start_matches("```");
        // Drop a language tag on the opening fence.
        if let Some(idx) = text.find('\n') {
            text = &text[idx + 1..];
        }
        text = text.trim_end_matches("```");
    }
    let text = text.trim();
    let text = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')).unwrap_or(text);
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use guardian_model::ModelError;
    use guardian_store::PatternStore;
    use std::collections::VecDeque;
    use std::sync::RwLock;

    /// Scripted model shared by generation and categorisation calls.
    struct ScriptedModel {
        replies: Mutex<VecDeque<guardian_model::Result<String>>>,
        delay: Duration,
    }

    impl ScriptedModel {
        fn new(replies: Vec<guardian_model::Result<String>>) -> Arc<Self> {
            Self::with_delay(replies, Duration::ZERO)
        }

        fn with_delay(
            replies: Vec<guardian_model::Result<String>>,
            delay: Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                delay,
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, _request: CompletionRequest) -> guardian_model::Result<String> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::EmptyReply))
        }
    }

    fn shared_store() -> SharedPatternStore {
        Arc::new(RwLock::new(PatternStore::in_memory()))
    }

    fn quick_config(target: usize) -> DiscoveryConfig {
        DiscoveryConfig {
            target_count: target,
            timeout: Duration::from_secs(5),
            iteration_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_discovery_accepts_generated_payload() {
        let store = shared_store();
        // Call order: generate, then categorise inside learn.
        let model = ScriptedModel::new(vec![
            Ok("UNION SELECT * FROM users --".to_string()),
            Ok(r#"{"category": "sql_injection", "severity": "high"}"#.to_string()),
        ]);
        let learner = Arc::new(LearningService::new(store.clone(), model.clone()));
        let service = DiscoveryService::new(learner, model, store.clone(), quick_config(1));

        let result = service.start().await.unwrap();
        assert_eq!(result.accepted, 1);
        assert!(!result.timed_out);

        let store = store.read().unwrap();
        assert_eq!(store.total_patterns(), 1);
        assert!(store.categories().contains_key("sql_injection"));
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_duplicate_payload_counted_not_stored_twice() {
        let store = shared_store();
        store
            .write()
            .unwrap()
            .add("sql_injection", "UNION SELECT * FROM users --", Severity::High, None);
        let model = ScriptedModel::new(vec![
            // First generation duplicates an existing fingerprint.
            Ok("union select * from users --".to_string()),
            // Second one is novel; categorisation reply follows.
            Ok("'; DROP TABLE accounts; --".to_string()),
            Ok(r#"{"category": "sql_injection", "severity": "high"}"#.to_string()),
        ]);
        let learner = Arc::new(LearningService::new(store.clone(), model.clone()));
        let service = DiscoveryService::new(learner, model, store.clone(), quick_config(1));

        let result = service.start().await.unwrap();
        assert_eq!(result.accepted, 1);
        assert_eq!(result.duplicates, 1);
        assert_eq!(store.read().unwrap().total_patterns(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_start_rejected() {
        let store = shared_store();
        let model = ScriptedModel::with_delay(
            (0..8).map(|i| Ok(format!("slow payload {i}"))).collect(),
            Duration::from_millis(50),
        );
        let learner = Arc::new(LearningService::new(store.clone(), model.clone()));
        let service = Arc::new(DiscoveryService::new(learner, model, store, quick_config(100)));

        let background = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.start().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = service.start().await.unwrap_err();
        assert!(matches!(err, ImmuneError::DiscoveryBusy));

        service.stop();
        let _ = background.await.unwrap();
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_timeout_bounds_the_run() {
        let store = shared_store();
        let model = ScriptedModel::with_delay(
            (0..1000).map(|_| Err(ModelError::EmptyReply)).collect(),
            Duration::from_millis(10),
        );
        let learner = Arc::new(LearningService::new(store.clone(), model.clone()));
        let config = DiscoveryConfig {
            target_count: 50,
            timeout: Duration::from_millis(60),
            iteration_delay: Duration::ZERO,
        };
        let service = DiscoveryService::new(learner, model, store, config);

        let result = service.start().await.unwrap();
        assert!(result.timed_out);
        assert_eq!(result.accepted, 0);
        assert!(!service.is_running());
    }

    #[test]
    fn test_clean_payload() {
        assert_eq!(clean_payload("  payload  "), "payload");
        assert_eq!(clean_payload("```sql\nUNION SELECT 1\n```"), "UNION SELECT 1");
        assert_eq!(clean_payload("\"quoted payload\""), "quoted payload");
    }
}
