//! In-memory state of the feedback receiver

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Instant,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::constants::RECEIVER_RETAINED_SUBMISSIONS;

/// An uploaded image, kept as metadata only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedImage {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
}

/// One accepted `POST /submit_feedback`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedFeedback {
    pub text: Option<String>,
    pub is_timeout_capture: bool,
    pub source_event: Option<String>,
    pub timestamp: Option<String>,
    pub csrf_token: Option<String>,
    pub images: Vec<ReceivedImage>,
    pub received_at: DateTime<Utc>,
}

/// Running counts over every submission, including ones no longer retained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverTotals {
    pub received: usize,
    pub timeout_captures: usize,
    pub images: usize,
    pub last_received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct SubmissionLog {
    recent: VecDeque<ReceivedFeedback>,
    totals: ReceiverTotals,
}

#[derive(Debug)]
pub struct ReceiverState {
    pub start_time: Instant,
    pub host: String,
    pub port: u16,
    submissions: Mutex<SubmissionLog>,
    retained: usize,
    sessions_closed: AtomicUsize,
    /// Submissions still to be rejected with 503
    failures_remaining: AtomicUsize,
}

impl ReceiverState {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            start_time: Instant::now(),
            host,
            port,
            submissions: Mutex::new(SubmissionLog::default()),
            retained: RECEIVER_RETAINED_SUBMISSIONS,
            sessions_closed: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
        }
    }

    /// Reject the first `count` submissions
    pub fn with_failures(self, count: usize) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Keep at most `count` submissions in memory
    pub fn with_retention(mut self, count: usize) -> Self {
        self.retained = count.max(1);
        self
    }

    /// Consume one scheduled failure, if any are left
    pub fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Store one submission; returns how many have been received so far
    pub fn record(&self, feedback: ReceivedFeedback) -> Result<usize, String> {
        let mut log = self
            .submissions
            .lock()
            .map_err(|e| format!("Failed to lock submissions: {}", e))?;
        info!(
            "Received {} feedback: {} chars, {} images",
            if feedback.is_timeout_capture { "timeout" } else { "manual" },
            feedback.text.as_deref().map_or(0, str::len),
            feedback.images.len()
        );

        let totals = &mut log.totals;
        totals.received += 1;
        if feedback.is_timeout_capture {
            totals.timeout_captures += 1;
        }
        totals.images += feedback.images.len();
        totals.last_received_at = Some(feedback.received_at);
        let received = totals.received;

        log.recent.push_back(feedback);
        while log.recent.len() > self.retained {
            log.recent.pop_front();
            debug!("Dropped oldest retained submission");
        }
        Ok(received)
    }

    /// The most recently received submissions, oldest first
    pub fn submissions(&self) -> Result<Vec<ReceivedFeedback>, String> {
        self.submissions
            .lock()
            .map(|log| log.recent.iter().cloned().collect())
            .map_err(|e| format!("Failed to lock submissions: {}", e))
    }

    pub fn totals(&self) -> Result<ReceiverTotals, String> {
        self.submissions
            .lock()
            .map(|log| log.totals)
            .map_err(|e| format!("Failed to lock submissions: {}", e))
    }

    pub fn close_session(&self) -> usize {
        info!("Feedback session closed by client");
        self.sessions_closed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn sessions_closed(&self) -> usize {
        self.sessions_closed.load(Ordering::SeqCst)
    }

    /// Calculate receiver uptime as a formatted string
    pub fn get_uptime(&self) -> String {
        let duration = self.start_time.elapsed();
        let hours = duration.as_secs() / 3600;
        let minutes = (duration.as_secs() % 3600) / 60;
        let seconds = duration.as_secs() % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_failures_run_out() {
        let state = ReceiverState::new("127.0.0.1".into(), 0).with_failures(2);
        assert!(state.take_failure());
        assert!(state.take_failure());
        assert!(!state.take_failure());
    }

    fn feedback(timeout: bool, images: usize) -> ReceivedFeedback {
        ReceivedFeedback {
            text: Some("note".into()),
            is_timeout_capture: timeout,
            source_event: None,
            timestamp: None,
            csrf_token: None,
            images: vec![
                ReceivedImage {
                    file_name: None,
                    content_type: None,
                    size: 3,
                };
                images
            ],
            received_at: Utc::now(),
        }
    }

    #[test]
    fn only_recent_submissions_are_retained() {
        let state = ReceiverState::new("127.0.0.1".into(), 0).with_retention(2);
        assert_eq!(state.record(feedback(true, 1)).unwrap(), 1);
        assert_eq!(state.record(feedback(false, 0)).unwrap(), 2);
        assert_eq!(state.record(feedback(true, 2)).unwrap(), 3);

        let recent = state.submissions().unwrap();
        assert_eq!(recent.len(), 2);
        assert!(!recent[0].is_timeout_capture);
        assert_eq!(recent[1].images.len(), 2);

        let totals = state.totals().unwrap();
        assert_eq!(totals.received, 3);
        assert_eq!(totals.timeout_captures, 2);
        assert_eq!(totals.images, 3);
        assert_eq!(totals.last_received_at, Some(recent[1].received_at));
    }
}
