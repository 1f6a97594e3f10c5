//! Backup store persisted through `FileStorage`

use std::sync::Arc;

use timeout_capture::{
    services::{BackupStore, FileStorage, Storage},
    state::{FeedbackPayload, ImageAttachment, TIMEOUT_SOURCE},
};

fn payload(text: &str, images: usize) -> FeedbackPayload {
    FeedbackPayload {
        text: text.to_string(),
        images: (0..images)
            .map(|i| ImageAttachment {
                name: Some(format!("shot-{}.png", i)),
                data: "data:image/png;base64,aGk=".to_string(),
            })
            .collect(),
        timestamp: "2024-03-01T10:00:00.000Z".to_string(),
        source: TIMEOUT_SOURCE.to_string(),
    }
}

#[test]
fn backups_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let key = {
        let store = BackupStore::new(Arc::new(FileStorage::new(dir.path().join("backups"))));
        store.save(&payload("first draft", 1)).unwrap()
    };

    let store = BackupStore::new(Arc::new(FileStorage::new(dir.path().join("backups"))));
    let entries = store.list_all();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, key);
    assert_eq!(entries[0].record.payload.text, "first draft");
    assert_eq!(entries[0].record.payload.images.len(), 1);

    let file = dir.path().join("backups").join(format!("{}.json", key));
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(file).unwrap()).unwrap();
    assert_eq!(raw["source"], "frontend_timeout");
    assert_eq!(raw["version"], "1.0");
    assert!(raw["backupTime"].is_string());
}

#[test]
fn store_is_pruned_to_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let store = BackupStore::with_capacity(Arc::new(FileStorage::new(dir.path())), 3);

    let keys: Vec<String> = (0..5)
        .map(|i| store.save(&payload(&format!("note {}", i), 0)).unwrap())
        .collect();

    let entries = store.list_all();
    assert_eq!(entries.len(), 3);
    let kept: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(kept, [keys[4].as_str(), keys[3].as_str(), keys[2].as_str()]);

    // No temp files or probe keys left behind
    let files = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(files, 3);
}

#[test]
fn stats_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileStorage::new(dir.path()));
    let store = BackupStore::new(storage.clone());

    store.save(&payload("with text", 2)).unwrap();
    store.save(&payload("", 1)).unwrap();
    // Unrelated keys are left alone
    storage.set("unrelated", "{}").unwrap();

    let stats = store.stats();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.text_count, 1);
    assert_eq!(stats.image_count, 3);
    assert!(stats.total_size > 0);
    assert!(stats.oldest_backup.is_some());

    assert_eq!(store.clear_all(), 2);
    assert!(!store.has_backups());
    assert_eq!(storage.keys().unwrap(), ["unrelated"]);
}

#[test]
fn corrupt_entries_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileStorage::new(dir.path()));
    let store = BackupStore::new(storage.clone());

    let key = store.save(&payload("good", 0)).unwrap();
    storage.set("mcp_feedback_backup_1", "not json").unwrap();

    let entries = store.list_all();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, key);
    assert!(store.get("mcp_feedback_backup_1").is_none());
    assert!(store.remove(&key));
    assert!(store.list_all().is_empty());
}
