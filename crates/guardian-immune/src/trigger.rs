//! The attack trigger bus: decides which blocked payloads are worth
//! learning from, buffers them, and flushes batches to the learning service.
//!
//! ## Policy
//!
//! Rules are evaluated in order; the first match wins and fixes the
//! verdict's priority:
//!
//! | # | Condition | Save | Reason | Priority |
//! |---|-----------|------|--------|----------|
//! | 1 | source == ai | yes | `AI_BLOCK` | 10 |
//! | 2 | anomaly_score >= threshold | yes | `HIGH_ANOMALY` | 9 |
//! | 3 | source == heuristic or rule UNKNOWN | yes | `UNKNOWN_PATTERN` | 8 |
//! | 4 | >= N hits from one IP in window | yes | `REPEATED_ATTACK` | 7 |
//! | 5 | source == regex | no | `KNOWN_PATTERN` | 3 |
//! | 6 | otherwise | no | `NOT_SIGNIFICANT` | 0 |
//!
//! Every evaluated record is also broadcast as a [`TriggerEvent`] so
//! observers (the kill-switch) see detections regardless of the save
//! decision. Event delivery is synchronous on the publishing task;
//! subscribers must not block.

use crate::record::{AttackRecord, AttackSource};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Per-rule enable flags.
#[derive(Debug, Clone, Copy)]
pub struct TriggerToggles {
    pub ai_block: bool,
    pub high_anomaly: bool,
    pub unknown_pattern: bool,
    pub repeated_attack: bool,
}

impl Default for TriggerToggles {
    fn default() -> Self {
        Self {
            ai_block: true,
            high_anomaly: true,
            unknown_pattern: true,
            repeated_attack: true,
        }
    }
}

/// Bus policy and batching knobs.
#[derive(Debug, Clone)]
pub struct TriggerBusConfig {
    pub toggles: TriggerToggles,
    /// Anomaly score at or above which rule 2 fires.
    pub anomaly_threshold: f64,
    /// Hits from one IP within the window at which rule 4 fires.
    pub repeat_threshold: usize,
    /// Sliding window for per-IP repeat counting.
    pub repeat_window: Duration,
    /// Buffer size that forces an immediate flush.
    pub batch_size: usize,
    /// Period of the background flush timer.
    pub flush_interval: Duration,
}

impl Default for TriggerBusConfig {
    fn default() -> Self {
        Self {
            toggles: TriggerToggles::default(),
            anomaly_threshold: 0.8,
            repeat_threshold: 3,
            repeat_window: Duration::from_secs(60),
            batch_size: 10,
            flush_interval: Duration::from_secs(30),
        }
    }
}

/// The decision the bus takes for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerVerdict {
    pub should_save: bool,
    pub reason: String,
    pub priority: u8,
}

impl TriggerVerdict {
    fn new(should_save: bool, reason: &str, priority: u8) -> Self {
        Self {
            should_save,
            reason: reason.to_string(),
            priority,
        }
    }
}

/// Broadcast to observers for every record the bus evaluates.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub record: AttackRecord,
    pub verdict: TriggerVerdict,
}

struct BusState {
    buffer: Vec<AttackRecord>,
    /// Per-IP hit timestamps inside the sliding window.
    hits: HashMap<String, Vec<Instant>>,
}

/// The attack trigger bus.
///
/// Single-writer from the pipeline's perspective: `publish` takes `&self`
/// and serialises internal state behind one mutex, so concurrent producers
/// are safe but see a consistent buffer.
pub struct TriggerBus {
    config: TriggerBusConfig,
    enabled: AtomicBool,
    state: Mutex<BusState>,
    batch_tx: mpsc::UnboundedSender<Vec<AttackRecord>>,
    events: broadcast::Sender<TriggerEvent>,
}

impl TriggerBus {
    /// Creates the bus and hands back the receiving end of the
    /// "patterns-ready" channel the learning consumer drains.
    pub fn new(config: TriggerBusConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<AttackRecord>>) {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);
        let bus = Arc::new(Self {
            config,
            enabled: AtomicBool::new(true),
            state: Mutex::new(BusState {
                buffer: Vec::new(),
                hits: HashMap::new(),
            }),
            batch_tx,
            events,
        });
        (bus, batch_rx)
    }

    /// Subscribes to the per-record detection stream.
    pub fn subscribe(&self) -> broadcast::Receiver<TriggerEvent> {
        self.events.subscribe()
    }

    /// Enables or disables the bus. A disabled bus drops inputs silently.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Evaluates one record: computes the trigger verdict, broadcasts the
    /// detection, and buffers the record when it is worth saving.
    pub fn publish(&self, record: AttackRecord) -> TriggerVerdict {
        if !self.enabled.load(Ordering::SeqCst) {
            trace!("trigger bus disabled; dropping record {}", record.id);
            return TriggerVerdict::new(false, "DISABLED", 0);
        }

        let (batch, verdict) = {
            let mut state = self.state.lock().expect("trigger bus state poisoned");
            let now = Instant::now();

            // Prune the sliding window on every record.
            let window = self.config.repeat_window;
            state.hits.retain(|_, stamps| {
                stamps.retain(|t| now.duration_since(*t) <= window);
                !stamps.is_empty()
            });

            let repeat_count = match record.metadata.ip.as_deref() {
                Some(ip) => {
                    let stamps = state.hits.entry(ip.to_string()).or_default();
                    stamps.push(now);
                    stamps.len()
                }
                None => 0,
            };

            let verdict = self.decide(&record, repeat_count);

            // Synchronous fan-out; a lagging subscriber only loses its own
            // backlog.
            let _ = self.events.send(TriggerEvent {
                record: record.clone(),
                verdict: verdict.clone(),
            });

            let mut batch = None;
            if verdict.should_save {
                debug!(
                    "buffering record {} ({}, priority {})",
                    record.id, verdict.reason, verdict.priority
                );
                state.buffer.push(record);
                if state.buffer.len() >= self.config.batch_size {
                    batch = Some(std::mem::take(&mut state.buffer));
                }
            }
            (batch, verdict)
        };

        if let Some(batch) = batch {
            debug!("flushing {} records (batch size reached)", batch.len());
            let _ = self.batch_tx.send(batch);
        }
        verdict
    }

    /// Drains any buffered records to the learning channel.
    pub fn flush(&self) {
        let batch = {
            let mut state = self.state.lock().expect("trigger bus state poisoned");
            if state.buffer.is_empty() {
                return;
            }
            std::mem::take(&mut state.buffer)
        };
        debug!("flushing {} records", batch.len());
        let _ = self.batch_tx.send(batch);
    }

    /// Spawns the periodic flush timer.
    pub fn spawn_flush_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(bus.config.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                bus.flush();
            }
        })
    }

    /// Disables the bus and flushes whatever is pending.
    pub fn stop(&self) {
        self.set_enabled(false);
        self.flush();
    }

    /// Applies the policy table. `repeat_count` includes the current record.
    fn decide(&self, record: &AttackRecord, repeat_count: usize) -> TriggerVerdict {
        let toggles = &self.config.toggles;

        if toggles.ai_block && record.source == AttackSource::Ai {
            return TriggerVerdict::new(true, "AI_BLOCK", 10);
        }
        if toggles.high_anomaly {
            if let Some(score) = record.anomaly_score {
                if score >= self.config.anomaly_threshold {
                    return TriggerVerdict::new(true, "HIGH_ANOMALY", 9);
                }
            }
        }
        if toggles.unknown_pattern
            && (record.source == AttackSource::Heuristic
                || record.metadata.matched_rule.as_deref() == Some("UNKNOWN"))
        {
            return TriggerVerdict::new(true, "UNKNOWN_PATTERN", 8);
        }
        if toggles.repeated_attack && repeat_count >= self.config.repeat_threshold {
            return TriggerVerdict::new(true, "REPEATED_ATTACK", 7);
        }
        if record.source == AttackSource::Regex {
            return TriggerVerdict::new(false, "KNOWN_PATTERN", 3);
        }
        TriggerVerdict::new(false, "NOT_SIGNIFICANT", 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordMetadata;
    use guardian_store::Severity;

    fn record(source: AttackSource) -> AttackRecord {
        AttackRecord::new(source, "payload text", "payload text", Severity::High)
    }

    fn bus() -> (Arc<TriggerBus>, mpsc::UnboundedReceiver<Vec<AttackRecord>>) {
        TriggerBus::new(TriggerBusConfig::default())
    }

    #[tokio::test]
    async fn test_ai_block_has_top_priority() {
        let (bus, _rx) = bus();
        // Rule 1 wins even when the anomaly score would also fire.
        let verdict = bus.publish(record(AttackSource::Ai).with_anomaly_score(0.99));
        assert!(verdict.should_save);
        assert_eq!(verdict.reason, "AI_BLOCK");
        assert_eq!(verdict.priority, 10);
    }

    #[tokio::test]
    async fn test_high_anomaly() {
        let (bus, _rx) = bus();
        let verdict = bus.publish(record(AttackSource::Unknown).with_anomaly_score(0.85));
        assert_eq!(verdict.reason, "HIGH_ANOMALY");
        assert_eq!(verdict.priority, 9);

        let verdict = bus.publish(record(AttackSource::Unknown).with_anomaly_score(0.5));
        assert!(!verdict.should_save);
    }

    #[tokio::test]
    async fn test_heuristic_is_unknown_pattern() {
        let (bus, _rx) = bus();
        let verdict = bus.publish(record(AttackSource::Heuristic));
        assert_eq!(verdict.reason, "UNKNOWN_PATTERN");
        assert_eq!(verdict.priority, 8);
    }

    #[tokio::test]
    async fn test_unknown_matched_rule_is_unknown_pattern() {
        let (bus, _rx) = bus();
        let rec = record(AttackSource::Unknown).with_metadata(RecordMetadata {
            matched_rule: Some("UNKNOWN".to_string()),
            ..Default::default()
        });
        let verdict = bus.publish(rec);
        assert_eq!(verdict.reason, "UNKNOWN_PATTERN");
    }

    #[tokio::test]
    async fn test_regex_is_known_pattern_not_saved() {
        let (bus, mut rx) = bus();
        let verdict = bus.publish(record(AttackSource::Regex));
        assert!(!verdict.should_save);
        assert_eq!(verdict.reason, "KNOWN_PATTERN");

        bus.flush();
        assert!(rx.try_recv().is_err(), "nothing buffered, nothing flushed");
    }

    #[tokio::test]
    async fn test_repeated_attack_from_same_ip() {
        let (bus, _rx) = bus();
        let meta = RecordMetadata {
            ip: Some("203.0.113.9".to_string()),
            ..Default::default()
        };
        // Regex records would not normally be saved; the third hit from the
        // same IP promotes the stream to REPEATED_ATTACK.
        let v1 = bus.publish(record(AttackSource::Regex).with_metadata(meta.clone()));
        let v2 = bus.publish(record(AttackSource::Regex).with_metadata(meta.clone()));
        let v3 = bus.publish(record(AttackSource::Regex).with_metadata(meta));
        assert_eq!(v1.reason, "KNOWN_PATTERN");
        assert_eq!(v2.reason, "KNOWN_PATTERN");
        assert_eq!(v3.reason, "REPEATED_ATTACK");
        assert_eq!(v3.priority, 7);
    }

    #[tokio::test]
    async fn test_window_pruning_resets_repeat_count() {
        let config = TriggerBusConfig {
            repeat_window: Duration::from_millis(20),
            ..Default::default()
        };
        let (bus, _rx) = TriggerBus::new(config);
        let meta = RecordMetadata {
            ip: Some("198.51.100.2".to_string()),
            ..Default::default()
        };
        bus.publish(record(AttackSource::Regex).with_metadata(meta.clone()));
        bus.publish(record(AttackSource::Regex).with_metadata(meta.clone()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        // Old hits aged out; this is hit #1 again, not #3.
        let verdict = bus.publish(record(AttackSource::Regex).with_metadata(meta));
        assert_eq!(verdict.reason, "KNOWN_PATTERN");
    }

    #[tokio::test]
    async fn test_batch_size_forces_flush() {
        let config = TriggerBusConfig {
            batch_size: 3,
            ..Default::default()
        };
        let (bus, mut rx) = TriggerBus::new(config);
        for _ in 0..3 {
            bus.publish(record(AttackSource::Ai));
        }
        let batch = rx.try_recv().expect("batch should flush at batch_size");
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test]
    async fn test_manual_flush_drains_buffer() {
        let (bus, mut rx) = bus();
        bus.publish(record(AttackSource::Ai));
        assert!(rx.try_recv().is_err());
        bus.flush();
        assert_eq!(rx.try_recv().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_bus_drops_silently() {
        let (bus, mut rx) = bus();
        bus.set_enabled(false);
        let verdict = bus.publish(record(AttackSource::Ai));
        assert!(!verdict.should_save);
        assert_eq!(verdict.reason, "DISABLED");
        bus.set_enabled(true);
        bus.flush();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_flushes_residue() {
        let (bus, mut rx) = bus();
        bus.publish(record(AttackSource::Ai));
        bus.stop();
        assert_eq!(rx.try_recv().unwrap().len(), 1);
        // After stop, further inputs are dropped.
        let verdict = bus.publish(record(AttackSource::Ai));
        assert_eq!(verdict.reason, "DISABLED");
    }

    #[tokio::test]
    async fn test_every_record_broadcasts_event() {
        let (bus, _rx) = bus();
        let mut events = bus.subscribe();
        bus.publish(record(AttackSource::Regex));
        let event = events.try_recv().expect("detection event expected");
        assert_eq!(event.verdict.reason, "KNOWN_PATTERN");
        assert!(!event.verdict.should_save);
    }

    #[tokio::test]
    async fn test_disabled_rule_is_skipped() {
        let config = TriggerBusConfig {
            toggles: TriggerToggles {
                ai_block: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let (bus, _rx) = TriggerBus::new(config);
        let verdict = bus.publish(record(AttackSource::Ai));
        assert_eq!(verdict.reason, "NOT_SIGNIFICANT");
        assert!(!verdict.should_save);
    }
}
