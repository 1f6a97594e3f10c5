//! Feedback session: owns the page, the countdown, activity monitoring and capture

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{ImageAttachment, ImageSelection, SyncedClock};
use crate::{
    config::{parse_custom_timeout, parse_initial_timeout, TimerConfig, WatchArgs},
    error::ConfigError,
    services::{
        BackupStore, CaptureOutcome, FileStorage, HttpTransport, Storage, SubmissionHandler,
        Submitter, Transport,
    },
    tasks::{
        activity::{ActivityDetector, ActivityEvent},
        countdown::{Countdown, CountdownEvent, CountdownEventKind},
    },
    ui::{format_friendly_time, Document, ElementKey, NotificationLevel, Renderer},
};

/// Everything a session is assembled from
pub struct SessionParts {
    pub document: Arc<Document>,
    pub transport: Arc<dyn Transport>,
    pub storage: Arc<dyn Storage>,
    pub max_backups: usize,
    /// Raw initial timeout; the page's `timeoutData` element is used when absent
    pub timeout: Option<String>,
    pub warning_threshold: u64,
    pub clock: SyncedClock,
    pub csrf_token: Option<String>,
}

type CaptureSlot = Arc<Mutex<Option<JoinHandle<CaptureOutcome>>>>;

pub struct Session {
    document: Arc<Document>,
    renderer: Arc<Renderer>,
    countdown: Countdown,
    activity: ActivityDetector,
    handler: Arc<SubmissionHandler>,
    images: ImageSelection,
    clock: SyncedClock,
    warning_threshold: u64,
    capture: CaptureSlot,
}

impl Session {
    pub fn new(parts: SessionParts) -> Result<Self, ConfigError> {
        let renderer = Arc::new(Renderer::new(Arc::clone(&parts.document)));
        if let Some(token) = parts.csrf_token.as_deref().filter(|t| !t.is_empty()) {
            renderer.set_value(ElementKey::CsrfToken, token);
        }

        let raw_timeout = parts
            .timeout
            .clone()
            .or_else(|| renderer.text(ElementKey::TimeoutData));
        let total = parse_initial_timeout(raw_timeout.as_deref());
        let timer = TimerConfig::new(total, parts.warning_threshold)?
            .with_offset(parts.clock.offset_ms());

        let images = ImageSelection::new();
        let backups = Arc::new(BackupStore::with_capacity(parts.storage, parts.max_backups));
        let submitter = Arc::new(Submitter::new(
            parts.transport,
            Arc::clone(&backups),
            Arc::clone(&renderer),
        ));
        let handler = Arc::new(SubmissionHandler::new(
            submitter,
            backups,
            Arc::clone(&renderer),
            images.clone(),
            parts.clock,
        ));

        let countdown = Countdown::new(timer, Arc::clone(&renderer));
        let activity = ActivityDetector::new(countdown.clone());

        let session = Self {
            document: parts.document,
            renderer,
            countdown,
            activity,
            handler,
            images,
            clock: parts.clock,
            warning_threshold: parts.warning_threshold,
            capture: Arc::new(Mutex::new(None)),
        };
        session.subscribe();
        Ok(session)
    }

    /// Session talking to a real receiver with file-backed backups
    pub fn from_args(args: &WatchArgs, document: Arc<Document>) -> anyhow::Result<Self> {
        let clock = match args.server_time.as_deref() {
            Some(raw) => SyncedClock::from_server_time(raw, Utc::now()).unwrap_or_else(|e| {
                warn!("{}; using device time", e);
                SyncedClock::default()
            }),
            None => SyncedClock::default(),
        };
        let transport = HttpTransport::new(&args.endpoint)
            .with_context(|| format!("Failed to create HTTP client for {}", args.endpoint))?;
        let backup_dir = args.backup_dir();
        debug!("Local backups stored in {}", backup_dir.display());

        Ok(Self::new(SessionParts {
            document,
            transport: Arc::new(transport),
            storage: Arc::new(FileStorage::new(backup_dir)),
            max_backups: args.max_backups,
            timeout: args.timeout.clone(),
            warning_threshold: args.warning,
            clock,
            csrf_token: args.csrf_token.clone(),
        })?)
    }

    fn subscribe(&self) {
        let events = self.countdown.events();

        let handler = Arc::clone(&self.handler);
        let slot = Arc::clone(&self.capture);
        events.on(CountdownEventKind::Expired, move |_| {
            let runtime = tokio::runtime::Handle::try_current()
                .context("No async runtime to run the timeout capture on")?;
            let handler = Arc::clone(&handler);
            let task = runtime.spawn(async move { handler.capture_on_timeout().await });
            *lock_slot(&slot) = Some(task);
            Ok(())
        });

        let renderer = Arc::clone(&self.renderer);
        events.on(CountdownEventKind::Warning, move |event| {
            if let CountdownEvent::Warning {
                remaining_seconds, ..
            } = event
            {
                renderer.notify(
                    &format!(
                        "{} left before your feedback is submitted automatically",
                        format_friendly_time(*remaining_seconds)
                    ),
                    NotificationLevel::Warning,
                );
            }
            Ok(())
        });
    }

    /// Start the countdown and activity monitoring
    pub fn start(&self) {
        let stats = self.handler.backups().stats();
        if stats.count > 0 {
            info!("{} unsent feedback backup(s) stored locally", stats.count);
        }
        self.countdown.start();
        self.activity.start();
        info!(
            "Feedback session started: {} until auto-submit",
            format_friendly_time(self.countdown.config().total_seconds)
        );
    }

    /// Validate a custom timeout and restart the countdown with it
    pub fn apply_custom_timeout(&self, raw: &str) -> Result<u64, ConfigError> {
        let seconds = match parse_custom_timeout(raw) {
            Ok(seconds) => seconds,
            Err(e) => {
                self.renderer.set_value(ElementKey::CustomTimeoutInput, "");
                self.renderer
                    .notify(&format!("Invalid timeout: {}", e), NotificationLevel::Error);
                return Err(e);
            }
        };

        let config = TimerConfig::new(seconds, self.warning_threshold)?
            .with_offset(self.clock.offset_ms());
        self.countdown.reconfigure(config);
        if !self.renderer.submit_enabled() {
            self.renderer.enable_submit();
        }
        self.renderer.set_value(ElementKey::CustomTimeoutInput, "");
        self.renderer.notify(
            &format!("Timeout set to {}", format_friendly_time(seconds)),
            NotificationLevel::Success,
        );
        Ok(seconds)
    }

    /// Apply whatever was typed into the custom timeout field
    pub fn apply_custom_timeout_input(&self) -> Result<u64, ConfigError> {
        let raw = self
            .renderer
            .value(ElementKey::CustomTimeoutInput)
            .unwrap_or_default();
        self.apply_custom_timeout(&raw)
    }

    /// Manual submission; on success the countdown and monitoring stop
    pub async fn submit_now(&self) -> bool {
        if !self.renderer.submit_enabled() {
            self.renderer
                .notify("The session has timed out", NotificationLevel::Warning);
            return false;
        }
        let delivered = self.handler.submit_manual().await;
        if delivered {
            self.countdown.stop();
            self.activity.stop();
            self.images.clear();
        }
        delivered
    }

    pub fn notify_activity(&self, event: ActivityEvent) -> bool {
        self.activity.notify(event)
    }

    pub fn attach_image(&self, image: ImageAttachment) -> anyhow::Result<()> {
        self.images.add(image)?;
        self.renderer.notify(
            &format!("{} image(s) attached", self.images.len()),
            NotificationLevel::Info,
        );
        Ok(())
    }

    /// Wait for a timeout capture started by the countdown, if any
    pub async fn wait_for_capture(&self) -> Option<CaptureOutcome> {
        let task = lock_slot(&self.capture).take()?;
        match task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Timeout capture task failed: {}", e);
                None
            }
        }
    }

    /// Stop monitoring and tell the receiver the session is gone
    pub async fn shutdown(&self) {
        self.activity.stop();
        if let Some(outcome) = self.wait_for_capture().await {
            debug!("Pending timeout capture finished: {:?}", outcome);
        }
        self.handler.submitter().notify_session_closed().await;
        info!("Feedback session closed");
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn renderer(&self) -> &Arc<Renderer> {
        &self.renderer
    }

    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    pub fn activity(&self) -> &ActivityDetector {
        &self.activity
    }

    pub fn handler(&self) -> &Arc<SubmissionHandler> {
        &self.handler
    }

    pub fn backups(&self) -> &Arc<BackupStore> {
        self.handler.backups()
    }

    pub fn images(&self) -> &ImageSelection {
        &self.images
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.activity.stop();
    }
}

fn lock_slot(slot: &CaptureSlot) -> MutexGuard<'_, Option<JoinHandle<CaptureOutcome>>> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
