//! Device clock adjusted by a one-time server time offset

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use tracing::info;

use crate::error::ConfigError;

/// Wall clock shifted by the offset between server and device time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncedClock {
    offset_ms: i64,
}

impl SyncedClock {
    pub fn new(offset_ms: i64) -> Self {
        Self { offset_ms }
    }

    /// Compute the offset from a server timestamp observed at `device_now`
    pub fn from_server_time(
        server_time: &str,
        device_now: DateTime<Utc>,
    ) -> Result<Self, ConfigError> {
        let server = DateTime::parse_from_rfc3339(server_time.trim())
            .map_err(|_| ConfigError::InvalidServerTime(server_time.to_string()))?;
        let offset_ms = (server.with_timezone(&Utc) - device_now).num_milliseconds();
        info!("Server time synchronised: offset {}ms", offset_ms);
        Ok(Self { offset_ms })
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    /// Logical now: device time plus the server offset
    pub fn now(&self) -> DateTime<Utc> {
        self.adjust(Utc::now())
    }

    pub fn adjust(&self, device_time: DateTime<Utc>) -> DateTime<Utc> {
        device_time + Duration::milliseconds(self.offset_ms)
    }

    /// Logical now as an RFC 3339 string with millisecond precision
    pub fn now_iso(&self) -> String {
        self.now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn offset_is_server_minus_device() {
        let device = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = SyncedClock::from_server_time("2024-05-01T12:00:02.500Z", device).unwrap();
        assert_eq!(clock.offset_ms(), 2500);
        assert_eq!(clock.adjust(device), device + Duration::milliseconds(2500));
    }

    #[test]
    fn rejects_unparsable_server_time() {
        assert!(SyncedClock::from_server_time("yesterday", Utc::now()).is_err());
    }
}
