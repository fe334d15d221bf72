use crate::layout::StoreLayout;
use crate::{atomic_write, GenericCache, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// File-backed [`GenericCache`]. Keys are hashed into file names; expired
/// entries are removed lazily on read.
pub struct FileCache {
    layout: StoreLayout,
}

impl FileCache {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let name = blake3::hash(key.as_bytes()).to_hex();
        self.layout.cache_dir().join(format!("{}.json", &name[..32]))
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let dir = self.layout.cache_dir();
        if !dir.exists() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut removed = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let expired = fs::read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str::<CacheEntry>(&c).ok())
                .is_none_or(|e| e.is_expired(now));
            if expired {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl GenericCache for FileCache {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let entry: CacheEntry = serde_json::from_str(&fs::read_to_string(&path)?)?;
        if entry.key != key {
            return Ok(None);
        }
        if entry.is_expired(Utc::now()) {
            let _ = fs::remove_file(&path);
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let expires_at = ttl
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);
        let entry = CacheEntry {
            key: key.to_owned(),
            value,
            expires_at,
        };
        let content = serde_json::to_vec(&entry)?;
        atomic_write(&self.entry_path(key), &content)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.entry_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
