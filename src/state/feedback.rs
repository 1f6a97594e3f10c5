//! Feedback payloads, backup records and the live form state

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Source tag for data captured when the countdown expires
pub const TIMEOUT_SOURCE: &str = "frontend_timeout";
/// Source tag for data sent with the submit button
pub const MANUAL_SOURCE: &str = "manual_submit";

pub const BACKUP_FORMAT_VERSION: &str = "1.0";

/// A selected image, held as a `data:<mime>;base64,<payload>` URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub data: String,
}

/// Snapshot of the user's input at capture time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackPayload {
    pub text: String,
    #[serde(default)]
    pub images: Vec<ImageAttachment>,
    pub timestamp: String,
    pub source: String,
}

impl FeedbackPayload {
    pub fn has_content(&self) -> bool {
        !self.text.is_empty() || !self.images.is_empty()
    }
}

/// Payload persisted locally after a failed submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    #[serde(flatten)]
    pub payload: FeedbackPayload,
    pub backup_time: String,
    pub version: String,
}

impl BackupRecord {
    pub fn new(payload: FeedbackPayload, backup_time: String) -> Self {
        Self {
            payload,
            backup_time,
            version: BACKUP_FORMAT_VERSION.to_string(),
        }
    }
}

/// Current contents of the feedback form
#[derive(Debug, Clone, Default)]
pub struct FeedbackForm {
    pub text: String,
    pub images: Vec<ImageAttachment>,
    pub csrf_token: Option<String>,
    pub submit_enabled: bool,
}

impl FeedbackForm {
    /// Build a payload from the trimmed text and selected images
    pub fn snapshot(&self, timestamp: String, source: &str) -> FeedbackPayload {
        FeedbackPayload {
            text: self.text.trim().to_string(),
            images: self.images.clone(),
            timestamp,
            source: source.to_string(),
        }
    }
}

/// Images currently selected for upload, shared with the capture path
#[derive(Debug, Clone, Default)]
pub struct ImageSelection {
    images: Arc<Mutex<Vec<ImageAttachment>>>,
}

impl ImageSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, image: ImageAttachment) -> anyhow::Result<()> {
        self.images
            .lock()
            .map_err(|e| anyhow::anyhow!("image selection poisoned: {}", e))?
            .push(image);
        Ok(())
    }

    pub fn clear(&self) {
        if let Ok(mut images) = self.images.lock() {
            images.clear();
        }
    }

    pub fn snapshot(&self) -> anyhow::Result<Vec<ImageAttachment>> {
        Ok(self
            .images
            .lock()
            .map_err(|e| anyhow::anyhow!("image selection poisoned: {}", e))?
            .clone())
    }

    pub fn len(&self) -> usize {
        self.images.lock().map(|images| images.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_record_uses_flat_camel_case_layout() {
        let record = BackupRecord::new(
            FeedbackPayload {
                text: "hello".into(),
                images: vec![],
                timestamp: "2024-01-01T00:00:00.000Z".into(),
                source: TIMEOUT_SOURCE.into(),
            },
            "2024-01-01T00:00:01.000Z".into(),
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["text"], "hello");
        assert_eq!(value["source"], "frontend_timeout");
        assert_eq!(value["backupTime"], "2024-01-01T00:00:01.000Z");
        assert_eq!(value["version"], "1.0");
    }

    #[test]
    fn snapshot_trims_text() {
        let form = FeedbackForm {
            text: "  looks good \n".into(),
            ..Default::default()
        };
        let payload = form.snapshot("t".into(), TIMEOUT_SOURCE);
        assert_eq!(payload.text, "looks good");
        assert!(payload.has_content());
    }
}
