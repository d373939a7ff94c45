//! Persistent offline queue for gossip that could not be delivered.
//!
//! One JSON array file per node data directory. Every mutation is made
//! durable with the same write-temp-then-rename discipline the pattern
//! store uses, so an enqueue that returned is readable by a fresh process.

use crate::error::LedgerError;
use crate::Result;
use chrono::Utc;
use guardian_store::write_atomic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// What an undelivered payload contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Block,
    Pattern,
}

/// One queued payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub kind: QueueKind,
    pub payload: Value,
    pub enqueued_at: String,
    pub retry_count: u32,
}

/// Summary of one `process` run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub delivered: usize,
    pub retained: usize,
}

/// Persistent FIFO of unsent gossip payloads.
///
/// Internally synchronised; share behind an `Arc`. `process` is
/// reentrancy-guarded: a second call while one is in flight returns
/// [`LedgerError::ProcessInFlight`].
pub struct OfflineQueue {
    path: PathBuf,
    items: Mutex<Vec<QueueItem>>,
    in_flight: AtomicBool,
}

impl OfflineQueue {
    /// Opens the queue at `path`. A missing or malformed file starts empty.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let items = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<QueueItem>>(&raw) {
                Ok(items) => items,
                Err(e) => {
                    warn!("malformed offline queue at {}: {e} - starting empty", path.display());
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        debug!("offline queue opened with {} item(s)", items.len());
        Self {
            path,
            items: Mutex::new(items),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Appends a payload and persists. Returns the item id.
    pub fn enqueue(&self, kind: QueueKind, payload: Value) -> Result<String> {
        let item = QueueItem {
            id: Uuid::new_v4().to_string(),
            kind,
            payload,
            enqueued_at: Utc::now().to_rfc3339(),
            retry_count: 0,
        };
        let id = item.id.clone();
        let mut items = self.lock_items()?;
        items.push(item);
        self.persist(&items)?;
        Ok(id)
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replays queued items serially through `handler`.
    ///
    /// An item is removed only when the handler returns `true`; otherwise
    /// its retry count is incremented and it stays queued. The queue is
    /// persisted once at the end of the run.
    pub fn process<F>(&self, mut handler: F) -> Result<ProcessReport>
    where
        F: FnMut(&QueueItem) -> bool,
    {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(LedgerError::ProcessInFlight);
        }

        let result = (|| {
            let snapshot = self.lock_items()?.clone();
            let mut report = ProcessReport::default();
            let mut retained = Vec::new();

            for mut item in snapshot {
                if handler(&item) {
                    report.delivered += 1;
                } else {
                    item.retry_count += 1;
                    report.retained += 1;
                    retained.push(item);
                }
            }

            let mut items = self.lock_items()?;
            *items = retained;
            self.persist(&items)?;
            debug!(
                "queue processed: {} delivered, {} retained",
                report.delivered, report.retained
            );
            Ok(report)
        })();

        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    fn lock_items(&self) -> Result<std::sync::MutexGuard<'_, Vec<QueueItem>>> {
        self.items.lock().map_err(|_| {
            LedgerError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "offline queue lock poisoned",
            ))
        })
    }

    fn persist(&self, items: &[QueueItem]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(items)?;
        write_atomic(&self.path, &bytes, false)?;
        Ok(())
    }
}
