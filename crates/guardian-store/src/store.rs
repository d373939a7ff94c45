//! The pattern store: categorised fingerprints with identity-indexed
//! duplicate detection and crash-safe snapshots.

use crate::error::StoreError;
use crate::fingerprint::{fingerprint_id, Severity};
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Fingerprints longer than this are truncated before learning.
pub const MAX_FINGERPRINT_LEN: usize = 500;

/// The store is constructed once at startup and threaded by reference to
/// every consumer; all mutations go through the single owner.
pub type SharedPatternStore = Arc<RwLock<PatternStore>>;

/// One category of fingerprints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    /// Human-readable description of the attack family.
    pub description: String,
    /// Severity assigned to every fingerprint in the category.
    pub severity: Severity,
    /// Fingerprints in insertion order.
    pub patterns: Vec<String>,
}

/// Outcome of a single insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The fingerprint was new and has been stored.
    Added,
    /// A fingerprint with the same identity already exists somewhere in the
    /// store.
    Duplicate,
}

/// One entry of an `add_batch` call.
#[derive(Debug, Clone)]
pub struct BatchPattern {
    pub category: String,
    pub pattern: String,
    pub severity: Severity,
}

/// One match returned by `search`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub category: String,
    pub pattern: String,
}

/// On-disk snapshot shape. Keys are camelCase for compatibility with the
/// persisted state format consumed by peers and tooling.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    version: String,
    total_patterns: usize,
    last_updated: String,
    source: String,
    categories: BTreeMap<String, Category>,
}

/// Append-only catalog of attack fingerprints.
///
/// # Concurrency
///
/// `PatternStore` is not internally synchronised; wrap it in the
/// [`SharedPatternStore`] alias and keep lock scopes short. Persistence is
/// serialised by the write lock, so at most one save is in flight per
/// instance.
#[derive(Debug)]
pub struct PatternStore {
    /// Canonical snapshot path; `None` for a purely in-memory store.
    path: Option<PathBuf>,
    /// Patch-level version string, bumped on every save.
    version: String,
    /// RFC-3339 timestamp of the last committed snapshot.
    last_updated: String,
    source: String,
    categories: BTreeMap<String, Category>,
    /// Identity index over the whole store, rebuilt on load.
    identity: HashSet<String>,
}

impl PatternStore {
    /// Creates an empty in-memory store with no backing path.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            version: "1.0.0".to_string(),
            last_updated: Utc::now().to_rfc3339(),
            source: "local".to_string(),
            categories: BTreeMap::new(),
            identity: HashSet::new(),
        }
    }

    /// Loads a store from `path`.
    ///
    /// A missing, unreadable or malformed snapshot degrades to an empty
    /// store bound to the same path; loading never fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut store = Self::in_memory();
        store.path = Some(path.clone());

        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("no pattern snapshot at {}: {}", path.display(), e);
                return store;
            }
        };

        let snapshot: Snapshot = match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    "malformed pattern snapshot at {}: {} - starting empty",
                    path.display(),
                    e
                );
                return store;
            }
        };

        store.version = snapshot.version;
        store.last_updated = snapshot.last_updated;
        store.source = snapshot.source;

        // Rebuild the identity index, dropping any duplicate that slipped
        // into the snapshot so the uniqueness invariant holds in memory.
        for (name, category) in snapshot.categories {
            let mut kept = Vec::with_capacity(category.patterns.len());
            for pattern in category.patterns {
                let id = fingerprint_id(&pattern);
                if store.identity.insert(id) {
                    kept.push(pattern);
                } else {
                    warn!("dropping duplicate fingerprint in category '{name}'");
                }
            }
            store.categories.insert(
                name,
                Category {
                    description: category.description,
                    severity: category.severity,
                    patterns: kept,
                },
            );
        }

        debug!(
            "loaded {} patterns in {} categories from {}",
            store.total_patterns(),
            store.categories.len(),
            path.display()
        );
        store
    }

    /// Inserts a fingerprint, creating the category on first use.
    ///
    /// Duplicate detection is O(1) against the identity index and spans the
    /// whole store, not just the target category.
    pub fn add(
        &mut self,
        category: &str,
        pattern: &str,
        severity: Severity,
        description: Option<&str>,
    ) -> AddOutcome {
        let id = fingerprint_id(pattern);
        if self.identity.contains(&id) {
            return AddOutcome::Duplicate;
        }

        let entry = self.categories.entry(category.to_string()).or_insert_with(|| Category {
            description: description
                .map(str::to_string)
                .unwrap_or_else(|| format!("Learned {category} patterns")),
            severity,
            patterns: Vec::new(),
        });
        entry.patterns.push(pattern.to_string());
        self.identity.insert(id);
        AddOutcome::Added
    }

    /// Inserts a batch, returning `(added, duplicated)` counts.
    pub fn add_batch(&mut self, batch: Vec<BatchPattern>) -> (usize, usize) {
        let mut added = 0;
        let mut duplicated = 0;
        for item in batch {
            match self.add(&item.category, &item.pattern, item.severity, None) {
                AddOutcome::Added => added += 1,
                AddOutcome::Duplicate => duplicated += 1,
            }
        }
        (added, duplicated)
    }

    /// Removes a fingerprint from a category by identity.
    ///
    /// Returns `true` if something was removed.
    pub fn remove(&mut self, category: &str, pattern: &str) -> bool {
        let id = fingerprint_id(pattern);
        let Some(entry) = self.categories.get_mut(category) else {
            return false;
        };
        let before = entry.patterns.len();
        entry.patterns.retain(|p| fingerprint_id(p) != id);
        if entry.patterns.len() < before {
            self.identity.remove(&id);
            true
        } else {
            false
        }
    }

    /// Case-insensitive substring search over all fingerprints.
    pub fn search(&self, needle: &str) -> Vec<SearchHit> {
        let needle = needle.to_lowercase();
        let mut hits = Vec::new();
        for (name, category) in &self.categories {
            for pattern in &category.patterns {
                if pattern.to_lowercase().contains(&needle) {
                    hits.push(SearchHit {
                        category: name.clone(),
                        pattern: pattern.clone(),
                    });
                }
            }
        }
        hits
    }

    /// SHA-256 over the sorted list of all fingerprints.
    ///
    /// Two stores holding the same fingerprint set hash identically
    /// regardless of category layout or insertion order; this is the ground
    /// truth for cross-node equality checks.
    pub fn snapshot_hash(&self) -> String {
        let mut all: Vec<&str> = self
            .categories
            .values()
            .flat_map(|c| c.patterns.iter().map(String::as_str))
            .collect();
        all.sort_unstable();
        let mut hasher = Sha256::new();
        for pattern in all {
            hasher.update(pattern.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Whether a fingerprint with this identity is already stored.
    pub fn contains_identity(&self, id: &str) -> bool {
        self.identity.contains(id)
    }

    /// Current category map.
    pub fn categories(&self) -> &BTreeMap<String, Category> {
        &self.categories
    }

    /// Names of all known categories.
    pub fn category_names(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    /// Total fingerprints across all categories.
    pub fn total_patterns(&self) -> usize {
        self.categories.values().map(|c| c.patterns.len()).sum()
    }

    /// Current snapshot version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Timestamp of the last committed snapshot.
    pub fn last_updated(&self) -> &str {
        &self.last_updated
    }

    /// Persists the store.
    ///
    /// Crash-safe: the snapshot is written to a sibling temp file, fsynced
    /// and renamed over the canonical path. The previous snapshot survives
    /// as `<path>.backup`. An I/O error is surfaced to the caller and leaves
    /// the on-disk snapshot untouched.
    pub fn save(&mut self) -> Result<()> {
        let path = self.path.clone().ok_or(StoreError::NoBackingPath)?;

        self.version = bump_patch(&self.version);
        self.last_updated = Utc::now().to_rfc3339();

        let snapshot = Snapshot {
            version: self.version.clone(),
            total_patterns: self.total_patterns(),
            last_updated: self.last_updated.clone(),
            source: self.source.clone(),
            categories: self.categories.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        write_atomic(&path, &bytes, true)?;

        debug!(
            "persisted {} patterns (version {})",
            snapshot.total_patterns, self.version
        );
        Ok(())
    }
}

/// Writes `bytes` to `path` atomically: temp file, fsync, rename.
///
/// With `keep_backup`, the previous canonical file is first copied to
/// `<path>.backup`, so a readable snapshot exists at every instant.
pub fn write_atomic(path: &Path, bytes: &[u8], keep_backup: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    let tmp = path.with_file_name(format!("{file_name}.tmp"));

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    if keep_backup && path.exists() {
        let backup = path.with_file_name(format!("{file_name}.backup"));
        fs::copy(path, &backup)?;
    }

    fs::rename(&tmp, path)?;
    Ok(())
}

/// Bumps the patch component of a `major.minor.patch` version string.
fn bump_patch(version: &str) -> String {
    let mut parts: Vec<&str> = version.split('.').collect();
    if parts.len() == 3 {
        if let Ok(patch) = parts.pop().unwrap_or_default().parse::<u64>() {
            return format!("{}.{}.{}", parts[0], parts[1], patch + 1);
        }
    }
    // Unparseable version strings restart the sequence.
    "1.0.1".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_at(dir: &TempDir) -> PatternStore {
        PatternStore::load(dir.path().join("patterns.json"))
    }

    #[test]
    fn test_add_and_duplicate() {
        let mut store = PatternStore::in_memory();
        assert_eq!(
            store.add("sql_injection", "UNION SELECT * FROM users --", Severity::High, None),
            AddOutcome::Added
        );
        // Same identity after normalisation.
        assert_eq!(
            store.add("sql_injection", "  union select * from users --  ", Severity::High, None),
            AddOutcome::Duplicate
        );
        assert_eq!(store.total_patterns(), 1);
    }

    #[test]
    fn test_duplicate_detection_spans_categories() {
        let mut store = PatternStore::in_memory();
        store.add("sql_injection", "drop table users", Severity::High, None);
        assert_eq!(
            store.add("prompt_injection", "DROP TABLE users", Severity::High, None),
            AddOutcome::Duplicate
        );
    }

    #[test]
    fn test_redundant_adds_report_duplicate() {
        let mut store = PatternStore::in_memory();
        let mut duplicates = 0;
        for _ in 0..5 {
            if store.add("xss", "<script>alert(1)</script>", Severity::High, None)
                == AddOutcome::Duplicate
            {
                duplicates += 1;
            }
        }
        assert_eq!(store.total_patterns(), 1);
        assert_eq!(duplicates, 4);
    }

    #[test]
    fn test_add_batch_counts() {
        let mut store = PatternStore::in_memory();
        let (added, duplicated) = store.add_batch(vec![
            BatchPattern {
                category: "xss".into(),
                pattern: "<script>".into(),
                severity: Severity::High,
            },
            BatchPattern {
                category: "xss".into(),
                pattern: "<SCRIPT>".into(),
                severity: Severity::High,
            },
            BatchPattern {
                category: "ssrf".into(),
                pattern: "http://169.254.169.254/".into(),
                severity: Severity::High,
            },
        ]);
        assert_eq!(added, 2);
        assert_eq!(duplicated, 1);
    }

    #[test]
    fn test_remove() {
        let mut store = PatternStore::in_memory();
        store.add("xss", "<script>alert(1)</script>", Severity::High, None);
        assert!(store.remove("xss", "<script>ALERT(1)</script>"));
        assert!(!store.remove("xss", "not there"));
        assert_eq!(store.total_patterns(), 0);

        // Removal frees the identity for re-insertion.
        assert_eq!(
            store.add("xss", "<script>alert(1)</script>", Severity::High, None),
            AddOutcome::Added
        );
    }

    #[test]
    fn test_search_case_insensitive() {
        let mut store = PatternStore::in_memory();
        store.add("sql_injection", "UNION SELECT password FROM accounts", Severity::High, None);
        store.add("xss", "<img onerror=alert(1)>", Severity::Medium, None);

        let hits = store.search("union select");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].category, "sql_injection");
        assert!(store.search("nothing-here").is_empty());
    }

    #[test]
    fn test_snapshot_hash_order_independent() {
        let mut a = PatternStore::in_memory();
        a.add("one", "alpha attack", Severity::High, None);
        a.add("two", "beta attack", Severity::Low, None);

        let mut b = PatternStore::in_memory();
        b.add("two", "beta attack", Severity::Low, None);
        b.add("one", "alpha attack", Severity::High, None);

        assert_eq!(a.snapshot_hash(), b.snapshot_hash());

        b.add("three", "gamma attack", Severity::Medium, None);
        assert_ne!(a.snapshot_hash(), b.snapshot_hash());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut store = store_at(&dir);
        store.add("prompt_injection", "ignore previous instructions", Severity::High, None);
        store.add("sql_injection", "or 1=1 --", Severity::High, None);
        store.save().unwrap();

        let reloaded = store_at(&dir);
        assert_eq!(reloaded.total_patterns(), 2);
        assert_eq!(reloaded.snapshot_hash(), store.snapshot_hash());
        assert_eq!(reloaded.version(), "1.0.1");
    }

    #[test]
    fn test_save_bumps_patch_version() {
        let dir = TempDir::new().unwrap();
        let mut store = store_at(&dir);
        store.add("xss", "<script>", Severity::High, None);
        store.save().unwrap();
        store.save().unwrap();
        assert_eq!(store.version(), "1.0.2");
    }

    #[test]
    fn test_save_keeps_backup() {
        let dir = TempDir::new().unwrap();
        let mut store = store_at(&dir);
        store.add("xss", "<script>", Severity::High, None);
        store.save().unwrap();
        store.add("xss", "<img onerror=1>", Severity::High, None);
        store.save().unwrap();

        let backup = dir.path().join("patterns.json.backup");
        assert!(backup.exists());

        // The backup is the previous good snapshot: one pattern, not two.
        let previous = PatternStore::load(&backup);
        assert_eq!(previous.total_patterns(), 1);
    }

    #[test]
    fn test_malformed_snapshot_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("patterns.json");
        fs::write(&path, b"{not json at all").unwrap();

        let store = PatternStore::load(&path);
        assert_eq!(store.total_patterns(), 0);
    }

    #[test]
    fn test_snapshot_drops_duplicates_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("patterns.json");
        let raw = serde_json::json!({
            "version": "1.0.3",
            "totalPatterns": 2,
            "lastUpdated": "2025-01-01T00:00:00Z",
            "source": "local",
            "categories": {
                "a": { "description": "a", "severity": "high", "patterns": ["same thing"] },
                "b": { "description": "b", "severity": "low", "patterns": ["SAME THING"] }
            }
        });
        fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        let store = PatternStore::load(&path);
        assert_eq!(store.total_patterns(), 1);
    }

    #[test]
    fn test_in_memory_save_is_an_error() {
        let mut store = PatternStore::in_memory();
        store.add("xss", "<script>", Severity::High, None);
        assert!(matches!(store.save(), Err(StoreError::NoBackingPath)));
    }
}
