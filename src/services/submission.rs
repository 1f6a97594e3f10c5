//! Timeout capture: deliver feedback with bounded retries, fall back to local backup

use std::{sync::Arc, time::Duration};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::{
    backup::BackupStore,
    transport::{SubmissionForm, Transport},
};
use crate::{
    config::constants::{MAX_RETRY_ATTEMPTS, NETWORK_TIMEOUT, RETRY_DELAYS},
    error::SubmitError,
    state::{FeedbackPayload, ImageSelection, SyncedClock, MANUAL_SOURCE, TIMEOUT_SOURCE},
    ui::{ElementKey, NotificationLevel, Renderer},
};

/// Attempt cap, per-request timeout and the delay schedule between attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub request_timeout: Duration,
    pub delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Delay after the given zero-based attempt; the last entry repeats
    pub fn delay_after(&self, attempt: usize) -> Duration {
        self.delays
            .get(attempt)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRY_ATTEMPTS,
            request_timeout: NETWORK_TIMEOUT,
            delays: RETRY_DELAYS.to_vec(),
        }
    }
}

/// Sends payloads through a transport with retries
pub struct Submitter {
    transport: Arc<dyn Transport>,
    backups: Arc<BackupStore>,
    renderer: Arc<Renderer>,
    policy: RetryPolicy,
}

impl Submitter {
    pub fn new(
        transport: Arc<dyn Transport>,
        backups: Arc<BackupStore>,
        renderer: Arc<Renderer>,
    ) -> Self {
        Self::with_policy(transport, backups, renderer, RetryPolicy::default())
    }

    pub fn with_policy(
        transport: Arc<dyn Transport>,
        backups: Arc<BackupStore>,
        renderer: Arc<Renderer>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            backups,
            renderer,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver a payload; true only if one attempt succeeded
    pub async fn send_with_retries(&self, payload: &FeedbackPayload) -> bool {
        match self.deliver(payload).await {
            Ok(delivered) => delivered,
            Err(e) => {
                error!("Could not prepare submission: {}", e);
                false
            }
        }
    }

    /// Like `send_with_retries`, but a payload that cannot be encoded is an error
    pub async fn deliver(&self, payload: &FeedbackPayload) -> Result<bool, SubmitError> {
        let csrf_token = self.renderer.value(ElementKey::CsrfToken);
        let form = SubmissionForm::from_payload(payload, csrf_token.as_deref())?;
        let started = tokio::time::Instant::now();

        for attempt in 0..self.policy.max_attempts {
            debug!("Submission attempt {}/{}", attempt + 1, self.policy.max_attempts);
            let attempt_result =
                timeout(self.policy.request_timeout, self.transport.submit(&form)).await;
            let result = match attempt_result {
                Ok(result) => result,
                Err(_) => Err(SubmitError::Timeout(self.policy.request_timeout)),
            };

            match result {
                Ok(response) if response.success => {
                    self.handle_success(started.elapsed());
                    return Ok(true);
                }
                Ok(response) => {
                    let message = response.message.unwrap_or_else(|| "unknown error".to_string());
                    self.report_attempt_failure(&SubmitError::Rejected(message), attempt);
                }
                Err(e) => self.report_attempt_failure(&e, attempt),
            }

            if attempt + 1 < self.policy.max_attempts {
                sleep(self.policy.delay_after(attempt)).await;
            }
        }

        warn!(
            "Submission failed after {} attempts ({:?})",
            self.policy.max_attempts,
            started.elapsed()
        );
        Ok(false)
    }

    fn handle_success(&self, elapsed: Duration) {
        info!("Feedback delivered in {:?}", elapsed);
        self.backups.clear_all();
        self.renderer
            .notify("Your data was saved successfully", NotificationLevel::Success);
    }

    fn report_attempt_failure(&self, err: &SubmitError, attempt: usize) {
        warn!("Submission attempt {} failed: {}", attempt + 1, err);
        if err.is_network() {
            self.renderer.notify(
                &format!("Network connection failed (attempt {})", attempt + 1),
                NotificationLevel::Warning,
            );
        } else {
            self.renderer.notify(
                &format!("Submission failed: {} (attempt {})", err, attempt + 1),
                NotificationLevel::Error,
            );
        }
    }

    /// Best-effort session close notice; errors are only logged
    pub async fn notify_session_closed(&self) {
        match timeout(self.policy.request_timeout, self.transport.session_closed()).await {
            Ok(Ok(())) => debug!("Session close notice sent"),
            Ok(Err(e)) => debug!("Session close notice failed: {}", e),
            Err(_) => debug!("Session close notice timed out"),
        }
    }
}

/// What became of the data captured at timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Delivered,
    BackedUp(String),
    NothingToSave,
    Lost,
}

/// Gathers the form on timeout and runs delivery with backup fallbacks
pub struct SubmissionHandler {
    submitter: Arc<Submitter>,
    backups: Arc<BackupStore>,
    renderer: Arc<Renderer>,
    images: ImageSelection,
    clock: SyncedClock,
}

impl SubmissionHandler {
    pub fn new(
        submitter: Arc<Submitter>,
        backups: Arc<BackupStore>,
        renderer: Arc<Renderer>,
        images: ImageSelection,
        clock: SyncedClock,
    ) -> Self {
        Self {
            submitter,
            backups,
            renderer,
            images,
            clock,
        }
    }

    pub fn submitter(&self) -> &Arc<Submitter> {
        &self.submitter
    }

    pub fn backups(&self) -> &Arc<BackupStore> {
        &self.backups
    }

    /// Snapshot of the current text and images
    pub fn collect_payload(&self, source: &str) -> anyhow::Result<FeedbackPayload> {
        let images = self.images.snapshot()?;
        Ok(self
            .renderer
            .form_snapshot(images)
            .snapshot(self.clock.now_iso(), source))
    }

    /// Capture and deliver the user's input after the countdown expired
    pub async fn capture_on_timeout(&self) -> CaptureOutcome {
        let payload = match self.collect_payload(TIMEOUT_SOURCE) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to collect feedback on timeout: {:#}", e);
                self.renderer
                    .notify("Could not gather any data for backup", NotificationLevel::Error);
                return CaptureOutcome::Lost;
            }
        };
        info!(
            "Capturing feedback on timeout ({} chars, {} images)",
            payload.text.len(),
            payload.images.len()
        );

        match self.submitter.deliver(&payload).await {
            Ok(true) => CaptureOutcome::Delivered,
            Ok(false) => self.handle_failed_submission(&payload),
            Err(e) => {
                error!("Timeout capture failed unexpectedly: {}", e);
                self.fallback_backup(&payload)
            }
        }
    }

    /// Send the form as a regular submission
    pub async fn submit_manual(&self) -> bool {
        let payload = match self.collect_payload(MANUAL_SOURCE) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to collect feedback: {:#}", e);
                self.renderer
                    .notify("Could not read the feedback form", NotificationLevel::Error);
                return false;
            }
        };
        match self.submitter.deliver(&payload).await {
            Ok(delivered) => delivered,
            Err(e) => {
                self.renderer
                    .notify(&format!("Submission failed: {}", e), NotificationLevel::Error);
                false
            }
        }
    }

    /// Local backup after every delivery attempt failed
    pub fn handle_failed_submission(&self, payload: &FeedbackPayload) -> CaptureOutcome {
        if !payload.has_content() {
            self.renderer.notify(
                "Network failed, but there was nothing to save",
                NotificationLevel::Info,
            );
            return CaptureOutcome::NothingToSave;
        }
        match self.backups.save(payload) {
            Ok(key) => {
                self.renderer.notify(
                    "Network failed, your data was saved locally",
                    NotificationLevel::Warning,
                );
                CaptureOutcome::BackedUp(key)
            }
            Err(e) => {
                error!("Local backup failed: {}", e);
                self.notify_total_loss();
                CaptureOutcome::Lost
            }
        }
    }

    /// Last resort after an unexpected error in the capture sequence
    fn fallback_backup(&self, payload: &FeedbackPayload) -> CaptureOutcome {
        if !payload.has_content() {
            self.renderer.notify(
                "System error, and there was nothing to save",
                NotificationLevel::Info,
            );
            return CaptureOutcome::NothingToSave;
        }
        match self.backups.save(payload) {
            Ok(key) => {
                self.renderer.notify(
                    "System error, but your data was saved locally",
                    NotificationLevel::Warning,
                );
                CaptureOutcome::BackedUp(key)
            }
            Err(e) => {
                error!("Fallback backup failed: {}", e);
                self.notify_total_loss();
                CaptureOutcome::Lost
            }
        }
    }

    fn notify_total_loss(&self) {
        self.renderer.notify(
            "Saving failed completely, please copy your input manually",
            NotificationLevel::Error,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::{backup::MemoryStorage, transport::SubmitResponse},
        state::ImageAttachment,
        ui::Document,
    };
    use futures::future::BoxFuture;
    use std::sync::Mutex;

    /// Replies from a script; the last reply repeats
    struct ScriptedTransport {
        replies: Mutex<Vec<Result<SubmitResponse, SubmitError>>>,
        attempts: Mutex<Vec<tokio::time::Instant>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<SubmitResponse, SubmitError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                attempts: Mutex::new(Vec::new()),
            })
        }

        fn attempt_times(&self) -> Vec<tokio::time::Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn submit<'a>(
            &'a self,
            _form: &'a SubmissionForm,
        ) -> BoxFuture<'a, Result<SubmitResponse, SubmitError>> {
            self.attempts.lock().unwrap().push(tokio::time::Instant::now());
            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.len() > 1 {
                replies.remove(0)
            } else {
                match &replies[0] {
                    Ok(r) => Ok(r.clone()),
                    Err(_) => Err(SubmitError::Network("connection refused".into())),
                }
            };
            Box::pin(async move { reply })
        }

        fn session_closed(&self) -> BoxFuture<'_, Result<(), SubmitError>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct Fixture {
        handler: SubmissionHandler,
        renderer: Arc<Renderer>,
        backups: Arc<BackupStore>,
    }

    fn fixture(transport: Arc<dyn Transport>, text: &str) -> Fixture {
        let document = Arc::new(Document::with_standard_layout());
        let renderer = Arc::new(Renderer::new(document));
        renderer.set_value(ElementKey::TextFeedback, text);
        let backups = Arc::new(BackupStore::new(Arc::new(MemoryStorage::new())));
        let submitter = Arc::new(Submitter::new(
            transport,
            Arc::clone(&backups),
            Arc::clone(&renderer),
        ));
        let handler = SubmissionHandler::new(
            submitter,
            Arc::clone(&backups),
            Arc::clone(&renderer),
            ImageSelection::new(),
            SyncedClock::default(),
        );
        Fixture {
            handler,
            renderer,
            backups,
        }
    }

    fn levels(renderer: &Renderer) -> Vec<NotificationLevel> {
        renderer
            .document()
            .notifications()
            .into_iter()
            .map(|n| n.level)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn retries_follow_delay_schedule_until_success() {
        let transport = ScriptedTransport::new(vec![
            Err(SubmitError::Network("connection reset".into())),
            Err(SubmitError::Http { status: 502 }),
            Ok(SubmitResponse::ok("stored")),
        ]);
        let fx = fixture(transport.clone(), "feedback");
        fx.backups.save(&fx.handler.collect_payload(TIMEOUT_SOURCE).unwrap()).unwrap();

        let payload = fx.handler.collect_payload(TIMEOUT_SOURCE).unwrap();
        assert!(fx.handler.submitter().send_with_retries(&payload).await);

        let times = transport.attempt_times();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_secs(1));
        assert_eq!(times[2] - times[1], Duration::from_secs(2));
        assert!(!fx.backups.has_backups(), "success clears old backups");
        assert_eq!(
            levels(&fx.renderer),
            [
                NotificationLevel::Warning,
                NotificationLevel::Error,
                NotificationLevel::Success
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_stops_at_attempt_cap() {
        let transport = ScriptedTransport::new(vec![Ok(SubmitResponse::failed("disk full"))]);
        let fx = fixture(transport.clone(), "feedback");
        let payload = fx.handler.collect_payload(TIMEOUT_SOURCE).unwrap();

        let before = tokio::time::Instant::now();
        assert!(!fx.handler.submitter().send_with_retries(&payload).await);
        assert_eq!(transport.attempt_times().len(), MAX_RETRY_ATTEMPTS);
        // No wait after the final attempt
        assert_eq!(before.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_requests_time_out_and_are_retried() {
        struct HangingTransport;
        impl Transport for HangingTransport {
            fn submit<'a>(
                &'a self,
                _form: &'a SubmissionForm,
            ) -> BoxFuture<'a, Result<SubmitResponse, SubmitError>> {
                Box::pin(futures::future::pending())
            }
            fn session_closed(&self) -> BoxFuture<'_, Result<(), SubmitError>> {
                Box::pin(futures::future::pending())
            }
        }

        let fx = fixture(Arc::new(HangingTransport), "");
        let outcome = fx.handler.capture_on_timeout().await;
        assert_eq!(outcome, CaptureOutcome::NothingToSave);

        // Three 10s timeouts plus 1s and 2s waits; earlier notices have expired by now
        let notes = fx.renderer.document().notifications();
        assert!(notes
            .iter()
            .any(|n| n.message == "Network connection failed (attempt 3)"));
        assert_eq!(notes.last().unwrap().level, NotificationLevel::Info);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_capture_is_backed_up_locally() {
        let transport = ScriptedTransport::new(vec![Err(SubmitError::Network("offline".into()))]);
        let fx = fixture(transport, "  unsent words ");

        let outcome = fx.handler.capture_on_timeout().await;
        let CaptureOutcome::BackedUp(key) = outcome else {
            panic!("expected a backup, got {:?}", outcome);
        };
        let record = fx.backups.get(&key).unwrap();
        assert_eq!(record.payload.text, "unsent words");
        assert_eq!(record.payload.source, TIMEOUT_SOURCE);
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_image_still_triggers_backup() {
        let transport = ScriptedTransport::new(vec![Ok(SubmitResponse::ok("stored"))]);
        let fx = fixture(transport.clone(), "");
        fx.handler
            .images
            .add(ImageAttachment {
                name: Some("broken.png".into()),
                data: "data:image/png;base64,###".into(),
            })
            .unwrap();

        let outcome = fx.handler.capture_on_timeout().await;
        assert!(matches!(outcome, CaptureOutcome::BackedUp(_)));
        assert!(transport.attempt_times().is_empty());
        let last = fx.renderer.document().notifications().pop().unwrap();
        assert_eq!(last.level, NotificationLevel::Warning);
        assert_eq!(last.message, "System error, but your data was saved locally");
    }

    #[test]
    fn delay_schedule_repeats_last_entry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(0), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(7), Duration::from_secs(4));
    }
}
