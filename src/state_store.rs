use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::errors::{SimError, SimResult};
use crate::poi::PoiDraft;

/// State-store key holding the global score boost factor
pub const KEY_BOOST_FACTOR: &str = "boost_factor";

/// One successful narration, for cooldown and variety history.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlayedRecord {
    pub qid: String,
    pub category: String,
    pub played_at: DateTime<Utc>,
}

/// Persistence delegated by the core. No on-disk format is mandated; the
/// narration pipeline only relies on these operations.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_state(&self, key: &str) -> SimResult<Option<String>>;
    async fn set_state(&self, key: &str, value: &str) -> SimResult<()>;

    /// Load a POI previously saved; None if unknown.
    async fn load_poi(&self, qid: &str) -> SimResult<Option<PoiDraft>>;
    async fn save_poi(&self, draft: &PoiDraft) -> SimResult<()>;

    /// Narrations since `since`, oldest first.
    async fn recent_played(&self, since: DateTime<Utc>) -> SimResult<Vec<PlayedRecord>>;
    async fn record_played(&self, record: &PlayedRecord) -> SimResult<()>;
    /// Forget all last-played timestamps (cooldown reset).
    async fn reset_last_played(&self) -> SimResult<()>;

    /// Track that an entity has been offered to the pipeline at least once.
    async fn record_seen(&self, qid: &str) -> SimResult<()>;
    async fn is_seen(&self, qid: &str) -> SimResult<bool>;
}

/// Convenience: the boost factor with its 1.0 default.
pub async fn boost_factor(store: &dyn StateStore) -> f64 {
    match store.get_state(KEY_BOOST_FACTOR).await {
        Ok(Some(value)) => value.parse().unwrap_or(1.0),
        _ => 1.0,
    }
}

/// In-memory store used by the binary default wiring and by tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    kv: RwLock<HashMap<String, String>>,
    pois: RwLock<HashMap<String, PoiDraft>>,
    played: RwLock<Vec<PlayedRecord>>,
    seen: RwLock<HashSet<String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_state(&self, key: &str) -> SimResult<Option<String>> {
        Ok(self
            .kv
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    async fn set_state(&self, key: &str, value: &str) -> SimResult<()> {
        self.kv
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn load_poi(&self, qid: &str) -> SimResult<Option<PoiDraft>> {
        Ok(self
            .pois
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(qid)
            .cloned())
    }

    async fn save_poi(&self, draft: &PoiDraft) -> SimResult<()> {
        if draft.qid.is_empty() {
            return Err(SimError::StoreFailure("empty qid".to_string()));
        }
        self.pois
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(draft.qid.clone(), draft.clone());
        Ok(())
    }

    async fn recent_played(&self, since: DateTime<Utc>) -> SimResult<Vec<PlayedRecord>> {
        let mut records: Vec<PlayedRecord> = self
            .played
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.played_at >= since)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.played_at);
        Ok(records)
    }

    async fn record_played(&self, record: &PlayedRecord) -> SimResult<()> {
        self.played
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }

    async fn reset_last_played(&self) -> SimResult<()> {
        self.played.write().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }

    async fn record_seen(&self, qid: &str) -> SimResult<()> {
        self.seen
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(qid.to_string());
        Ok(())
    }

    async fn is_seen(&self, qid: &str) -> SimResult<bool> {
        Ok(self
            .seen
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(qid))
    }
}

/// Serialized layout of the JSON file store
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct JsonStoreFile {
    kv: HashMap<String, String>,
    pois: HashMap<String, PoiDraft>,
    played: Vec<PlayedRecord>,
    seen: Vec<String>,
}

/// File-backed store: the whole state lives in one JSON document, rewritten
/// on every mutation. Small-state sessions only; a database-backed
/// implementation slots in behind the same trait.
pub struct JsonFileStateStore {
    path: std::path::PathBuf,
    inner: MemoryStateStore,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStateStore {
    pub fn open(path: impl Into<std::path::PathBuf>) -> SimResult<Self> {
        let path = path.into();
        let inner = MemoryStateStore::new();
        if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| SimError::StoreFailure(format!("read {path:?}: {e}")))?;
            let file: JsonStoreFile = serde_json::from_str(&text)
                .map_err(|e| SimError::StoreFailure(format!("parse {path:?}: {e}")))?;
            *inner.kv.write().unwrap_or_else(|e| e.into_inner()) = file.kv;
            *inner.pois.write().unwrap_or_else(|e| e.into_inner()) = file.pois;
            *inner.played.write().unwrap_or_else(|e| e.into_inner()) = file.played;
            *inner.seen.write().unwrap_or_else(|e| e.into_inner()) =
                file.seen.into_iter().collect();
        }
        Ok(Self {
            path,
            inner,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn flush(&self) -> SimResult<()> {
        let _guard = self.write_lock.lock().await;
        let file = JsonStoreFile {
            kv: self.inner.kv.read().unwrap_or_else(|e| e.into_inner()).clone(),
            pois: self.inner.pois.read().unwrap_or_else(|e| e.into_inner()).clone(),
            played: self
                .inner
                .played
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            seen: self
                .inner
                .seen
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .cloned()
                .collect(),
        };
        let text = serde_json::to_string_pretty(&file)
            .map_err(|e| SimError::StoreFailure(format!("serialize: {e}")))?;
        tokio::fs::write(&self.path, text)
            .await
            .map_err(|e| SimError::StoreFailure(format!("write {:?}: {e}", self.path)))
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn get_state(&self, key: &str) -> SimResult<Option<String>> {
        self.inner.get_state(key).await
    }

    async fn set_state(&self, key: &str, value: &str) -> SimResult<()> {
        self.inner.set_state(key, value).await?;
        self.flush().await
    }

    async fn load_poi(&self, qid: &str) -> SimResult<Option<PoiDraft>> {
        self.inner.load_poi(qid).await
    }

    async fn save_poi(&self, draft: &PoiDraft) -> SimResult<()> {
        self.inner.save_poi(draft).await?;
        self.flush().await
    }

    async fn recent_played(&self, since: DateTime<Utc>) -> SimResult<Vec<PlayedRecord>> {
        self.inner.recent_played(since).await
    }

    async fn record_played(&self, record: &PlayedRecord) -> SimResult<()> {
        self.inner.record_played(record).await?;
        self.flush().await
    }

    async fn reset_last_played(&self) -> SimResult<()> {
        self.inner.reset_last_played().await?;
        self.flush().await
    }

    async fn record_seen(&self, qid: &str) -> SimResult<()> {
        self.inner.record_seen(qid).await?;
        self.flush().await
    }

    async fn is_seen(&self, qid: &str) -> SimResult<bool> {
        self.inner.is_seen(qid).await
    }
}
