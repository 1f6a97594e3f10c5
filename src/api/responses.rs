//! API response structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Receiver status with counts of what has arrived so far
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub received: usize,
    pub timeout_captures: usize,
    pub manual_submissions: usize,
    pub images: usize,
    pub sessions_closed: usize,
    pub last_received_at: Option<DateTime<Utc>>,
    pub uptime: String,
    pub port: u16,
    pub host: String,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl HealthResponse {
    /// Create a new health response
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// JSON body sent when the client goes away
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionNotice {
    pub status: String,
}
