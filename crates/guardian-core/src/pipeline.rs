//! The four-stage validation pipeline.
//!
//! Stages execute in fixed order, each behind its own enable flag:
//!
//! 1. **regex** - static rule set, no I/O
//! 2. **pattern_db** - fuzzy similarity against learned fingerprints
//! 3. **guardian_ai** - validator-model call (the only network hop)
//! 4. **json_parser** - strict, fail-closed interpretation of the reply
//!
//! The first blocking outcome terminates the request; no stage is retried,
//! and later stages never observe an earlier stage's decision. A model
//! transport failure blocks with `GUARDIAN_ERROR` (fail-closed) but does not
//! feed the trigger bus - an outage is not a detection.

use crate::config::StageToggles;
use crate::verdict::{StageReport, Verdict};
use crate::Result;
use guardian_filter::{FilterError, PatternMatcher, RuleSet};
use guardian_immune::{AttackRecord, AttackSource, RecordMetadata, TriggerBus};
use guardian_model::{parse_verdict, GuardianClient, LanguageModel};
use guardian_store::{Severity, SharedPatternStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, warn};

/// Orchestrates stages 1-4 and publishes attack records on blocks.
pub struct ValidationPipeline {
    enabled: Arc<AtomicBool>,
    stages: StageToggles,
    rules: RwLock<RuleSet>,
    matcher: PatternMatcher,
    guardian: GuardianClient,
    bus: Arc<TriggerBus>,
}

impl ValidationPipeline {
    pub fn new(
        enabled: Arc<AtomicBool>,
        stages: StageToggles,
        store: SharedPatternStore,
        model: Arc<dyn LanguageModel>,
        max_tokens: u32,
        bus: Arc<TriggerBus>,
    ) -> Self {
        Self {
            enabled,
            stages,
            rules: RwLock::new(RuleSet::builtin()),
            matcher: PatternMatcher::new(store),
            guardian: GuardianClient::new(model, max_tokens),
            bus,
        }
    }

    /// Adds a regex rule at runtime.
    pub fn add_rule(&self, name: &str, pattern: &str) -> std::result::Result<(), FilterError> {
        self.rules
            .write()
            .expect("rule set lock poisoned")
            .add_rule(name, pattern)
    }

    /// Validates a payload with no request context.
    pub async fn validate(&self, input: &str) -> Verdict {
        self.validate_with_metadata(input, RecordMetadata::default()).await
    }

    /// Validates a payload; `metadata` travels on any attack record.
    pub async fn validate_with_metadata(&self, input: &str, metadata: RecordMetadata) -> Verdict {
        let start = Instant::now();
        let mut stages: Vec<StageReport> = Vec::new();

        if !self.enabled.load(Ordering::SeqCst) {
            return Verdict::allow(0, stages, elapsed_ms(start));
        }
        // Nothing to inspect; only the global toggle applies.
        if input.is_empty() {
            return Verdict::allow(0, stages, elapsed_ms(start));
        }

        let mut stage_reached = 0;

        // Stage 1: regex rules.
        if self.stages.regex {
            stage_reached = 1;
            let outcome = match self.rules.read() {
                Ok(rules) => rules.check(input),
                Err(_) => {
                    warn!("rule set lock poisoned; skipping regex stage");
                    guardian_filter::FilterOutcome {
                        blocked: false,
                        matched: Vec::new(),
                    }
                }
            };
            if outcome.blocked {
                let detail = outcome.matched.join(", ");
                stages.push(StageReport::blocked(1, "regex", detail.clone()));
                let mut meta = metadata;
                meta.matched_rule = outcome.matched.first().cloned();
                self.publish(AttackSource::Regex, input, input, Severity::High, meta);
                return Verdict::block(
                    format!("REGEX_MATCH: {detail}"),
                    1,
                    stages,
                    elapsed_ms(start),
                );
            }
            stages.push(StageReport::passed(1, "regex"));
        }

        // Stage 2: fuzzy match against the learned store.
        if self.stages.pattern_db {
            stage_reached = 2;
            let outcome = self.matcher.find_similar(input);
            if outcome.blocked {
                let top = &outcome.matches[0];
                let detail = format!("{} (similarity {:.2})", top.category, top.similarity);
                stages.push(StageReport::blocked(2, "pattern_db", detail));
                let severity = top.severity;
                let pattern = top.pattern.clone();
                self.publish(AttackSource::Heuristic, input, &pattern, severity, metadata);
                return Verdict::block(
                    format!("PATTERN_MATCH: {}", outcome.matches[0].category),
                    2,
                    stages,
                    elapsed_ms(start),
                );
            }
            stages.push(StageReport::passed(2, "pattern_db"));
        }

        // Stage 3: validator model. Fail-closed on any adapter error.
        if self.stages.guardian_ai {
            stage_reached = 3;
            let raw = match self.guardian.validate(input).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("validator model unavailable: {e}");
                    stages.push(StageReport::blocked(3, "guardian_ai", e.to_string()));
                    return Verdict::block("GUARDIAN_ERROR", 3, stages, elapsed_ms(start));
                }
            };
            stages.push(StageReport::passed(3, "guardian_ai"));

            // Stage 4: strict parse of the reply.
            if self.stages.json_parser {
                stage_reached = 4;
                match parse_verdict(&raw) {
                    Err(rejection) => {
                        stages.push(StageReport::blocked(4, "json_parser", rejection.tag()));
                        self.publish(AttackSource::Ai, input, input, Severity::Critical, metadata);
                        return Verdict::block(
                            format!("PARSE_ERROR: {}", rejection.tag()),
                            4,
                            stages,
                            elapsed_ms(start),
                        );
                    }
                    Ok(model_verdict) if !model_verdict.allowed => {
                        let detail = if model_verdict.flags.is_empty() {
                            "model verdict: unsafe".to_string()
                        } else {
                            format!("flags: {}", model_verdict.flags.join(", "))
                        };
                        stages.push(StageReport::blocked(4, "json_parser", detail));
                        self.publish(AttackSource::Ai, input, input, Severity::Critical, metadata);
                        return Verdict::block("GUARDIAN_BLOCKED", 4, stages, elapsed_ms(start));
                    }
                    Ok(_) => {
                        stages.push(StageReport::passed(4, "json_parser"));
                    }
                }
            }
        }

        debug!("payload allowed after stage {stage_reached}");
        Verdict::allow(stage_reached, stages, elapsed_ms(start))
    }

    fn publish(
        &self,
        source: AttackSource,
        raw_input: &str,
        pattern: &str,
        severity: Severity,
        metadata: RecordMetadata,
    ) {
        let record =
            AttackRecord::new(source, raw_input, pattern, severity).with_metadata(metadata);
        let verdict = self.bus.publish(record);
        debug!(
            "attack record published: {} (priority {})",
            verdict.reason, verdict.priority
        );
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
