//! Local backup store for feedback that could not be delivered

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::constants::MAX_LOCAL_BACKUPS,
    error::{BackupError, StorageError},
    state::{BackupRecord, FeedbackPayload},
};

pub const BACKUP_KEY_PREFIX: &str = "mcp_feedback_backup_";
const PROBE_KEY: &str = "mcp_storage_test";

/// Client-side key-value storage
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// One JSON file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                keys.push(stem.to_string());
            }
        }
        Ok(keys)
    }
}

/// In-memory storage with an optional byte quota
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn entries(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>, StorageError> {
        self.entries
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("storage lock poisoned: {}", e)))
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries()?;
        if let Some(quota) = self.quota_bytes {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries()?.keys().cloned().collect())
    }
}

/// A stored backup together with its key
#[derive(Debug, Clone, PartialEq)]
pub struct BackupEntry {
    pub key: String,
    pub record: BackupRecord,
}

impl BackupEntry {
    /// Backup time, falling back to the capture time
    pub fn timestamp(&self) -> &str {
        if self.record.backup_time.is_empty() {
            &self.record.payload.timestamp
        } else {
            &self.record.backup_time
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupStats {
    pub count: usize,
    pub total_size: usize,
    pub text_count: usize,
    pub image_count: usize,
    pub oldest_backup: Option<String>,
    pub newest_backup: Option<String>,
}

pub fn backup_key(epoch_ms: i64) -> String {
    format!("{}{}", BACKUP_KEY_PREFIX, epoch_ms)
}

/// Timestamp embedded in a backup key
fn key_timestamp(key: &str) -> i64 {
    key.rsplit('_')
        .next()
        .and_then(|ts| ts.parse().ok())
        .unwrap_or(0)
}

pub struct BackupStore {
    storage: Arc<dyn Storage>,
    max_backups: usize,
}

impl BackupStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_capacity(storage, MAX_LOCAL_BACKUPS)
    }

    /// The store always keeps at least the record it just wrote
    pub fn with_capacity(storage: Arc<dyn Storage>, max_backups: usize) -> Self {
        Self {
            storage,
            max_backups: max_backups.max(1),
        }
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    /// Persist a payload; every failure is reported to the caller
    pub fn save(&self, payload: &FeedbackPayload) -> Result<String, BackupError> {
        self.probe()?;

        let now = Utc::now();
        // New keys sort after every existing backup
        let newest = self
            .sorted_keys()
            .ok()
            .and_then(|keys| keys.first().map(|key| key_timestamp(key)));
        let mut millis = match newest {
            Some(newest) if newest >= now.timestamp_millis() => newest + 1,
            _ => now.timestamp_millis(),
        };
        let mut key = backup_key(millis);
        while matches!(self.storage.get(&key), Ok(Some(_))) {
            millis += 1;
            key = backup_key(millis);
        }

        let record = BackupRecord::new(
            payload.clone(),
            now.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        let json = serde_json::to_string(&record)?;
        self.storage
            .set(&key, &json)
            .map_err(|source| BackupError::Write {
                key: key.clone(),
                source,
            })?;

        match self.storage.get(&key) {
            Ok(Some(saved)) if !saved.is_empty() => {}
            _ => return Err(BackupError::VerificationFailed(key)),
        }

        let pruned = self.cleanup_old_backups();
        info!("Saved local backup {} ({} older backups pruned)", key, pruned);
        Ok(key)
    }

    /// Throwaway write/delete to check availability and free space
    fn probe(&self) -> Result<(), BackupError> {
        self.storage
            .set(PROBE_KEY, "test")
            .and_then(|_| self.storage.remove(PROBE_KEY))
            .map_err(BackupError::Unavailable)
    }

    /// Backup keys, newest first
    fn sorted_keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self
            .storage
            .keys()?
            .into_iter()
            .filter(|key| key.starts_with(BACKUP_KEY_PREFIX))
            .collect();
        keys.sort_by_key(|key| std::cmp::Reverse(key_timestamp(key)));
        Ok(keys)
    }

    /// Keep only the newest `max_backups` records; returns how many were removed
    pub fn cleanup_old_backups(&self) -> usize {
        let keys = match self.sorted_keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to list backups for cleanup: {}", e);
                return 0;
            }
        };
        let mut removed = 0;
        for key in keys.iter().skip(self.max_backups) {
            match self.storage.remove(key) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove old backup {}: {}", key, e),
            }
        }
        removed
    }

    /// All readable backups, newest first
    pub fn list_all(&self) -> Vec<BackupEntry> {
        let keys = match self.sorted_keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to list backups: {}", e);
                return Vec::new();
            }
        };
        keys.into_iter()
            .filter_map(|key| {
                let record = self.get(&key)?;
                Some(BackupEntry { key, record })
            })
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<BackupRecord> {
        let raw = match self.storage.get(key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Failed to read backup {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Skipping unreadable backup {}: {}", key, e);
                None
            }
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        match self.storage.remove(key) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to remove backup {}: {}", key, e);
                false
            }
        }
    }

    /// Delete every backup; returns how many were removed
    pub fn clear_all(&self) -> usize {
        let keys = match self.sorted_keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to list backups for clearing: {}", e);
                return 0;
            }
        };
        let removed = keys.iter().filter(|key| self.remove(key)).count();
        if removed > 0 {
            info!("Cleared {} local backups", removed);
        }
        removed
    }

    pub fn has_backups(&self) -> bool {
        self.sorted_keys().map(|keys| !keys.is_empty()).unwrap_or(false)
    }

    pub fn stats(&self) -> BackupStats {
        let backups = self.list_all();
        let mut stats = BackupStats {
            count: backups.len(),
            ..Default::default()
        };
        for entry in &backups {
            let payload = &entry.record.payload;
            if !payload.text.is_empty() {
                stats.text_count += 1;
            }
            stats.image_count += payload.images.len();
            stats.total_size += serde_json::to_string(&entry.record).map_or(0, |s| s.len());
        }
        stats.newest_backup = backups.first().map(|e| e.timestamp().to_string());
        stats.oldest_backup = backups.last().map(|e| e.timestamp().to_string());
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ImageAttachment, TIMEOUT_SOURCE};

    fn payload(text: &str) -> FeedbackPayload {
        FeedbackPayload {
            text: text.to_string(),
            images: vec![],
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            source: TIMEOUT_SOURCE.to_string(),
        }
    }

    struct BrokenStorage;

    impl Storage for BrokenStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("disabled".into()))
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::QuotaExceeded)
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disabled".into()))
        }
        fn keys(&self) -> Result<Vec<String>, StorageError> {
            Err(StorageError::Unavailable("disabled".into()))
        }
    }

    /// Accepts writes but never returns them
    struct ForgetfulStorage;

    impl Storage for ForgetfulStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Ok(())
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
        fn keys(&self) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn save_round_trips_payload() {
        let store = BackupStore::new(Arc::new(MemoryStorage::new()));
        let mut original = payload("please keep this");
        original.images.push(ImageAttachment {
            name: Some("shot.png".into()),
            data: "data:image/png;base64,iVBORw0KGgo=".into(),
        });

        let key = store.save(&original).unwrap();
        assert!(key.starts_with(BACKUP_KEY_PREFIX));

        let record = store.get(&key).unwrap();
        assert_eq!(record.payload, original);
        assert_eq!(record.version, "1.0");
        assert!(store.has_backups());
    }

    #[test]
    fn save_fails_loudly_when_storage_rejects_writes() {
        let store = BackupStore::new(Arc::new(BrokenStorage));
        assert!(matches!(
            store.save(&payload("x")),
            Err(BackupError::Unavailable(StorageError::QuotaExceeded))
        ));
        // Accessors degrade instead of failing
        assert!(store.list_all().is_empty());
        assert!(!store.has_backups());
        assert_eq!(store.clear_all(), 0);
        assert_eq!(store.stats(), BackupStats::default());
    }

    #[test]
    fn save_detects_missing_record() {
        let store = BackupStore::new(Arc::new(ForgetfulStorage));
        assert!(matches!(
            store.save(&payload("x")),
            Err(BackupError::VerificationFailed(_))
        ));
    }

    #[test]
    fn quota_exhaustion_is_reported_as_unavailable() {
        let store = BackupStore::new(Arc::new(MemoryStorage::with_quota(8)));
        assert!(matches!(
            store.save(&payload("x")),
            Err(BackupError::Unavailable(_))
        ));
    }

    #[test]
    fn pruning_keeps_newest_records() {
        let storage = Arc::new(MemoryStorage::new());
        let record =
            serde_json::to_string(&BackupRecord::new(payload("old"), String::new())).unwrap();
        for ts in [5_i64, 1, 4, 2, 3] {
            storage.set(&backup_key(ts), &record).unwrap();
        }
        storage.set("unrelated_key", "{}").unwrap();

        let store = BackupStore::with_capacity(storage.clone(), 3);
        let newest = store.save(&payload("new")).unwrap();

        let keys: Vec<String> = store.list_all().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![newest, backup_key(5), backup_key(4)]);
        assert!(storage.get("unrelated_key").unwrap().is_some());
    }

    #[test]
    fn zero_capacity_still_keeps_the_new_record() {
        let storage = Arc::new(MemoryStorage::new());
        let store = BackupStore::with_capacity(storage, 0);
        assert_eq!(store.max_backups(), 1);

        let first = store.save(&payload("first")).unwrap();
        let second = store.save(&payload("second")).unwrap();
        assert!(store.get(&first).is_none());
        assert_eq!(store.get(&second).unwrap().payload.text, "second");
    }

    #[test]
    fn stats_and_clear() {
        let storage = Arc::new(MemoryStorage::new());
        let store = BackupStore::new(storage.clone());
        store.save(&payload("first")).unwrap();
        let mut with_image = payload("");
        with_image.images.push(ImageAttachment {
            name: None,
            data: "data:image/gif;base64,R0lGOD".into(),
        });
        store.save(&with_image).unwrap();

        let stats = store.stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.text_count, 1);
        assert_eq!(stats.image_count, 1);
        assert!(stats.total_size > 0);
        assert!(stats.newest_backup.is_some());

        assert_eq!(store.clear_all(), 2);
        assert!(!store.has_backups());
    }

    #[test]
    fn file_storage_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        assert!(matches!(
            storage.set("../escape", "x"),
            Err(StorageError::InvalidKey(_))
        ));
        storage.set("mcp_feedback_backup_1", "{}").unwrap();
        assert_eq!(storage.keys().unwrap(), vec!["mcp_feedback_backup_1".to_string()]);
        storage.remove("mcp_feedback_backup_1").unwrap();
        storage.remove("mcp_feedback_backup_1").unwrap();
        assert!(storage.get("mcp_feedback_backup_1").unwrap().is_none());
    }
}
