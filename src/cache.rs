//! Two-tier response cache.
//!
//! The memory tier answers TTL questions for the life of the process. Every
//! successful `put` is also written to a durable snapshot on disk which is
//! only read back when the provider refuses to serve us (quota exhausted),
//! regardless of its age.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Deterministic cache key: resource identity plus every parameter that
/// changes the response content. Parameter order never matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn builder(resource: impl Into<String>) -> CacheKeyBuilder {
        CacheKeyBuilder {
            resource: resource.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct CacheKeyBuilder {
    resource: String,
    params: BTreeMap<String, String>,
}

impl CacheKeyBuilder {
    pub fn param(mut self, name: &str, value: impl AsRef<str>) -> Self {
        self.params
            .insert(name.to_string(), value.as_ref().trim().to_string());
        self
    }

    /// List-valued parameter, canonicalised: trimmed, blanks dropped,
    /// de-duplicated and sorted.
    pub fn list<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut items: Vec<String> = values
            .into_iter()
            .map(|v| v.as_ref().trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        items.sort();
        items.dedup();
        self.params.insert(name.to_string(), items.join(","));
        self
    }

    pub fn build(self) -> CacheKey {
        if self.params.is_empty() {
            return CacheKey(self.resource);
        }
        let query = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        CacheKey(format!("{}?{}", self.resource, query))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub fetched_at: DateTime<Utc>,
    pub payload: Value,
}

impl CacheEntry {
    pub fn new(key: &CacheKey, payload: Value) -> Self {
        Self {
            key: key.as_str().to_string(),
            fetched_at: Utc::now(),
            payload,
        }
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.is_fresh_at(ttl, Utc::now())
    }

    pub fn is_fresh_at(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.fetched_at).to_std() {
            Ok(age) => age < ttl,
            // fetched_at ahead of the clock
            Err(_) => true,
        }
    }
}

/// Outcome of a durable write. Never an error for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotWrite {
    Persisted,
    /// Serialized entry exceeded the size cap; dropped.
    Oversized,
    /// I/O failure, logged; the snapshot is treated as unavailable.
    Failed,
}

/// Last-known-good payloads on local disk, one JSON file per key.
///
/// Writes go to a temporary file first and are renamed into place, so an
/// interrupted write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    max_bytes: usize,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        let name: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        self.dir.join(format!("{}.json", name))
    }

    pub async fn save(&self, entry: &CacheEntry) -> SnapshotWrite {
        let json = match serde_json::to_vec(entry) {
            Ok(j) => j,
            Err(e) => {
                warn!(key = %entry.key, error = %e, "Failed to serialize snapshot");
                return SnapshotWrite::Failed;
            }
        };

        if json.len() > self.max_bytes {
            warn!(
                key = %entry.key,
                bytes = json.len(),
                cap = self.max_bytes,
                "Snapshot exceeds size cap, not persisted"
            );
            return SnapshotWrite::Oversized;
        }

        match self.write_atomic(&entry.key, &json).await {
            Ok(()) => {
                debug!(key = %entry.key, bytes = json.len(), "Snapshot persisted");
                SnapshotWrite::Persisted
            }
            Err(e) => {
                warn!(key = %entry.key, error = %e, "Snapshot write failed");
                SnapshotWrite::Failed
            }
        }
    }

    async fn write_atomic(&self, key: &str, json: &[u8]) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        // Unique per write so concurrent writers never share a temp file.
        let tmp = path.with_extension(format!("json.tmp-{}", Uuid::new_v4().simple()));

        if let Err(e) = fs::write(&tmp, json).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    /// Read a snapshot ignoring its age. Missing, unreadable or corrupt
    /// snapshots all read as `None`.
    pub async fn load(&self, key: &str) -> Option<CacheEntry> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(key, error = %e, "Failed to read snapshot");
                return None;
            }
        };

        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) if entry.key == key => Some(entry),
            Ok(entry) => {
                warn!(key, stored = %entry.key, "Snapshot key mismatch, ignoring");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "Corrupt snapshot, ignoring");
                None
            }
        }
    }
}

/// Shared cache handle. Cloning shares the same tiers.
///
/// Writes are full-value replacements; concurrent writers of one key simply
/// leave the last value.
#[derive(Clone)]
pub struct CacheStore {
    memory: Arc<RwLock<HashMap<String, CacheEntry>>>,
    snapshots: Option<SnapshotStore>,
}

impl CacheStore {
    pub fn new(snapshots: Option<SnapshotStore>) -> Self {
        Self {
            memory: Arc::new(RwLock::new(HashMap::new())),
            snapshots,
        }
    }

    /// Memory-only cache, no durable tier.
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let cache = self.memory.read().await;
        cache.get(key.as_str()).cloned()
    }

    /// Store a fresh payload in memory and persist it to the durable tier.
    pub async fn put(&self, key: &CacheKey, payload: Value) -> CacheEntry {
        let entry = CacheEntry::new(key, payload);
        {
            let mut cache = self.memory.write().await;
            cache.insert(key.as_str().to_string(), entry.clone());
        }

        if let Some(store) = &self.snapshots {
            store.save(&entry).await;
        }
        entry
    }

    pub fn is_fresh(entry: &CacheEntry, ttl: Duration) -> bool {
        entry.is_fresh(ttl)
    }

    /// Durable tier lookup, ignoring TTL.
    pub async fn snapshot(&self, key: &CacheKey) -> Option<CacheEntry> {
        match &self.snapshots {
            Some(store) => store.load(key.as_str()).await,
            None => None,
        }
    }

    /// Drop memory entries older than `max_age`. Snapshots are untouched.
    pub async fn purge_expired(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut cache = self.memory.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.is_fresh_at(max_age, now));
        let removed = before - cache.len();
        if removed > 0 {
            info!("Purged {} expired cache entries", removed);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.memory.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.memory.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn key() -> CacheKey {
        CacheKey::builder("odds")
            .param("sport", "americanfootball_nfl")
            .list("markets", ["player_pass_tds"])
            .build()
    }

    #[test]
    fn key_is_independent_of_parameter_order() {
        let a = CacheKey::builder("odds")
            .param("sport", "nfl")
            .list("books", ["fanduel", "draftkings"])
            .list("markets", ["player_pass_yds", "player_pass_tds"])
            .build();
        let b = CacheKey::builder("odds")
            .list("markets", [" player_pass_tds", "player_pass_yds", "player_pass_tds"])
            .list("books", ["draftkings", "fanduel"])
            .param("sport", "nfl")
            .build();
        assert_eq!(a, b);
        assert_eq!(
            a.as_str(),
            "odds?books=draftkings,fanduel&markets=player_pass_tds,player_pass_yds&sport=nfl"
        );
    }

    #[test]
    fn key_differs_when_content_parameters_differ() {
        let a = CacheKey::builder("event_odds").param("event", "E1").build();
        let b = CacheKey::builder("event_odds").param("event", "E2").build();
        assert_ne!(a, b);
    }

    #[test]
    fn freshness_is_strictly_less_than_ttl() {
        let now = Utc::now();
        let mut entry = CacheEntry::new(&key(), json!([]));
        entry.fetched_at = now - chrono::Duration::seconds(59);
        assert!(entry.is_fresh_at(Duration::from_secs(60), now));
        entry.fetched_at = now - chrono::Duration::seconds(60);
        assert!(!entry.is_fresh_at(Duration::from_secs(60), now));
        entry.fetched_at = now + chrono::Duration::seconds(5);
        assert!(entry.is_fresh_at(Duration::from_secs(60), now));
    }

    #[tokio::test]
    async fn put_then_get_returns_payload() {
        let cache = CacheStore::in_memory();
        assert!(cache.get(&key()).await.is_none());

        let stored = cache.put(&key(), json!([{"id": "E1"}])).await;
        let got = cache.get(&key()).await.unwrap();
        assert_eq!(got, stored);
        assert!(CacheStore::is_fresh(&got, Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn put_persists_snapshot_readable_by_a_new_store() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::new(Some(SnapshotStore::new(dir.path(), 1 << 20)));
        cache.put(&key(), json!({"data": [1, 2, 3]})).await;

        // fresh process: empty memory, same snapshot dir
        let restarted = CacheStore::new(Some(SnapshotStore::new(dir.path(), 1 << 20)));
        assert!(restarted.get(&key()).await.is_none());
        let snap = restarted.snapshot(&key()).await.unwrap();
        assert_eq!(snap.payload, json!({"data": [1, 2, 3]}));
    }

    #[tokio::test]
    async fn oversized_snapshot_is_dropped_but_memory_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), 64);
        let entry = CacheEntry::new(&key(), json!({"blob": "x".repeat(500)}));
        assert_eq!(store.save(&entry).await, SnapshotWrite::Oversized);
        assert!(store.load(entry.key.as_str()).await.is_none());

        let cache = CacheStore::new(Some(store));
        cache.put(&key(), json!({"blob": "x".repeat(500)})).await;
        assert!(cache.get(&key()).await.is_some());
        assert!(cache.snapshot(&key()).await.is_none());
    }

    #[tokio::test]
    async fn overwrite_replaces_snapshot_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), 1 << 20);
        let mut entry = CacheEntry::new(&key(), json!(1));
        assert_eq!(store.save(&entry).await, SnapshotWrite::Persisted);
        entry.payload = json!(2);
        assert_eq!(store.save(&entry).await, SnapshotWrite::Persisted);

        assert_eq!(store.load(key().as_str()).await.unwrap().payload, json!(2));
        let files: Vec<_> = assert_ok!(std::fs::read_dir(dir.path()))
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_snapshot_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), 1 << 20);
        let path = store.path_for(key().as_str());
        assert_ok!(std::fs::write(&path, b"{not json"));
        assert!(store.load(key().as_str()).await.is_none());
    }

    #[tokio::test]
    async fn unwritable_snapshot_dir_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("occupied");
        assert_ok!(std::fs::write(&blocker, b"file, not a dir"));
        assert_err!(std::fs::read_dir(&blocker));

        let store = SnapshotStore::new(&blocker, 1 << 20);
        let entry = CacheEntry::new(&key(), json!([]));
        assert_eq!(store.save(&entry).await, SnapshotWrite::Failed);
    }

    #[tokio::test]
    async fn purge_drops_only_old_entries() {
        let cache = CacheStore::in_memory();
        let old = CacheKey::builder("old").build();
        cache.put(&old, json!(1)).await;
        cache.put(&key(), json!(2)).await;
        {
            let mut mem = cache.memory.write().await;
            if let Some(e) = mem.get_mut(old.as_str()) {
                e.fetched_at = Utc::now() - chrono::Duration::hours(3);
            }
        }
        assert_eq!(cache.purge_expired(Duration::from_secs(3600)).await, 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.get(&key()).await.is_some());
    }
}
