//! Countdown readout, progress bar, submit button and notification rendering

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tracing::debug;

use super::document::{lock_element, Document, ElementHandle, NotificationLevel};
use crate::{
    config::constants::{DANGER_THRESHOLD, NOTIFICATION_AUTO_HIDE_DELAY, WARNING_THRESHOLD},
    state::{FeedbackForm, ImageAttachment, PauseReason},
};

/// Logical names for the page elements the renderer touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKey {
    TimeoutData,
    TimeoutMessage,
    TimeoutCountdown,
    TimeoutProgressBar,
    TextFeedback,
    FeedbackForm,
    SubmitBtn,
    CsrfToken,
    CustomTimeoutInput,
    ApplyCustomTimeoutBtn,
}

impl ElementKey {
    pub fn id(&self) -> &'static str {
        match self {
            ElementKey::TimeoutData => "timeoutData",
            ElementKey::TimeoutMessage => "timeoutMessage",
            ElementKey::TimeoutCountdown => "timeoutCountdown",
            ElementKey::TimeoutProgressBar => "timeoutProgressBar",
            ElementKey::TextFeedback => "textFeedback",
            ElementKey::FeedbackForm => "feedbackForm",
            ElementKey::SubmitBtn => "submitBtn",
            ElementKey::CsrfToken => "csrfToken",
            ElementKey::CustomTimeoutInput => "customTimeoutInput",
            ElementKey::ApplyCustomTimeoutBtn => "applyCustomTimeoutBtn",
        }
    }
}

pub const TIMEOUT_NOTICE_ID: &str = "timeoutNotice";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub danger: u64,
    pub warning: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            danger: DANGER_THRESHOLD,
            warning: WARNING_THRESHOLD,
        }
    }
}

/// Visual tier derived from remaining time and pause state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleTier {
    Normal,
    Warning,
    Danger,
    Paused,
    Expired,
}

impl StyleTier {
    pub fn classify(remaining: u64, paused: bool, thresholds: Thresholds) -> Self {
        if remaining == 0 {
            StyleTier::Expired
        } else if paused {
            StyleTier::Paused
        } else if remaining <= thresholds.danger {
            StyleTier::Danger
        } else if remaining <= thresholds.warning {
            StyleTier::Warning
        } else {
            StyleTier::Normal
        }
    }

    pub fn countdown_class(&self) -> Option<&'static str> {
        match self {
            StyleTier::Normal => None,
            StyleTier::Warning => Some("warning"),
            StyleTier::Danger => Some("danger"),
            StyleTier::Paused => Some("paused"),
            StyleTier::Expired => Some("expired"),
        }
    }

    pub fn progress_class(&self) -> Option<&'static str> {
        match self {
            StyleTier::Paused => Some("paused-style"),
            other => other.countdown_class(),
        }
    }
}

/// Format seconds as `Xm Ys`, `Xm` or `Ys`
pub fn format_friendly_time(total_seconds: u64) -> String {
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    match (minutes, seconds) {
        (0, s) => format!("{}s", s),
        (m, 0) => format!("{}m", m),
        (m, s) => format!("{}m {}s", m, s),
    }
}

/// Share of the initial duration still remaining, never negative
pub fn progress_percent(remaining: u64, initial_total: u64) -> f64 {
    if initial_total == 0 {
        return 0.0;
    }
    (remaining as f64 / initial_total as f64 * 100.0).max(0.0)
}

/// Everything needed to draw one countdown frame
#[derive(Debug, Clone, Copy)]
pub struct CountdownView {
    pub remaining: u64,
    pub initial_total: u64,
    pub paused: bool,
    pub pause_reason: Option<PauseReason>,
}

pub struct Renderer {
    document: Arc<Document>,
    cache: Mutex<HashMap<ElementKey, ElementHandle>>,
    thresholds: Thresholds,
    notification_delay: Duration,
}

impl Renderer {
    pub fn new(document: Arc<Document>) -> Self {
        Self::with_thresholds(document, Thresholds::default())
    }

    pub fn with_thresholds(document: Arc<Document>, thresholds: Thresholds) -> Self {
        Self {
            document,
            cache: Mutex::new(HashMap::new()),
            thresholds,
            notification_delay: NOTIFICATION_AUTO_HIDE_DELAY,
        }
    }

    pub fn with_notification_delay(mut self, delay: Duration) -> Self {
        self.notification_delay = delay;
        self
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<ElementKey, ElementHandle>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Cached element lookup; resolved from the document on first access
    pub fn element(&self, key: ElementKey) -> Option<ElementHandle> {
        let mut cache = self.cache();
        if let Some(handle) = cache.get(&key) {
            return Some(Arc::clone(handle));
        }
        let handle = self.document.get(key.id())?;
        cache.insert(key, Arc::clone(&handle));
        Some(handle)
    }

    /// Re-resolve an element that may have been recreated
    pub fn refresh(&self, key: ElementKey) -> Option<ElementHandle> {
        let mut cache = self.cache();
        match self.document.get(key.id()) {
            Some(handle) => {
                cache.insert(key, Arc::clone(&handle));
                Some(handle)
            }
            None => {
                cache.remove(&key);
                None
            }
        }
    }

    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    fn set_message(&self, text: String) {
        if let Some(message) = self.element(ElementKey::TimeoutMessage) {
            lock_element(&message).text = text;
        }
    }

    /// Draw a countdown frame: message, readout, progress bar
    pub fn update_countdown(&self, view: CountdownView) {
        let friendly = format_friendly_time(view.remaining);
        let tier = StyleTier::classify(view.remaining, view.paused, self.thresholds);

        let message = if view.paused && view.remaining > 0 {
            paused_message(view.remaining, view.pause_reason)
        } else if view.remaining > 0 {
            format!("This window will auto-submit in {}", friendly)
        } else {
            "Time is up, submitting...".to_string()
        };
        self.set_message(message);

        if let Some(bar) = self.element(ElementKey::TimeoutProgressBar) {
            let mut bar = lock_element(&bar);
            bar.width_percent = Some(progress_percent(view.remaining, view.initial_total));
            bar.set_classes("timeout-progress-bar", tier.progress_class());
        }

        // The readout can be replaced underneath us; always style the live one
        if let Some(countdown) = self.refresh(ElementKey::TimeoutCountdown) {
            let mut countdown = lock_element(&countdown);
            countdown.text = if view.paused && view.remaining > 0 {
                "Paused".to_string()
            } else {
                friendly
            };
            countdown.set_classes("timeout-countdown", tier.countdown_class());
        }

        self.document.touch();
    }

    /// Frozen readout while the countdown is paused
    pub fn show_paused(&self, remaining: u64, initial_total: u64, reason: Option<PauseReason>) {
        self.update_countdown(CountdownView {
            remaining,
            initial_total,
            paused: true,
            pause_reason: reason,
        });
    }

    /// Final state after a manual submission
    pub fn show_completed(&self) {
        self.set_message("Completed".to_string());
        if let Some(countdown) = self.refresh(ElementKey::TimeoutCountdown) {
            let mut countdown = lock_element(&countdown);
            countdown.text = "Completed".to_string();
            countdown.set_classes("timeout-countdown", Some("completed"));
        }
        self.document.touch();
    }

    /// Persistent notice shown once when the session times out
    pub fn show_timeout_notice(&self) {
        if self.document.contains(TIMEOUT_NOTICE_ID) {
            return;
        }
        let notice = self.document.insert(TIMEOUT_NOTICE_ID);
        {
            let mut notice = lock_element(&notice);
            notice.text = "Time is up. The feedback window is closed; \
                reopen the feedback channel to continue."
                .to_string();
            notice.set_classes("alert", Some("alert-warning"));
        }
        self.document.touch();
    }

    pub fn disable_submit(&self) {
        if let Some(button) = self.element(ElementKey::SubmitBtn) {
            let mut button = lock_element(&button);
            button.disabled = true;
            button.text = "Timed out".to_string();
            button.replace_class("btn-success", "btn-secondary");
        }
        self.document.touch();
    }

    pub fn enable_submit(&self) {
        if let Some(button) = self.element(ElementKey::SubmitBtn) {
            let mut button = lock_element(&button);
            button.disabled = false;
            button.text = "Submit feedback".to_string();
            button.replace_class("btn-secondary", "btn-success");
        }
        self.document.touch();
    }

    pub fn submit_enabled(&self) -> bool {
        self.element(ElementKey::SubmitBtn)
            .map(|button| !lock_element(&button).disabled)
            .unwrap_or(false)
    }

    /// Show a transient notification, removed after the auto-hide delay
    pub fn notify(&self, message: &str, level: NotificationLevel) -> u64 {
        debug!("Notification [{}]: {}", level.label(), message);
        let id = self.document.append_notification(level, message);

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let document = Arc::clone(&self.document);
            let delay = self.notification_delay;
            runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                document.remove_notification(id);
            });
        }
        id
    }

    /// Read the value of an input element
    pub fn value(&self, key: ElementKey) -> Option<String> {
        self.element(key).map(|el| lock_element(&el).value.clone())
    }

    pub fn set_value(&self, key: ElementKey, value: &str) {
        if let Some(el) = self.element(key) {
            lock_element(&el).value = value.to_string();
        }
        self.document.touch();
    }

    /// Text content of an element, used for data embedded in the page
    pub fn text(&self, key: ElementKey) -> Option<String> {
        self.element(key).map(|el| lock_element(&el).text.clone())
    }

    /// Gather the current text, csrf token and the given image selection
    pub fn form_snapshot(&self, images: Vec<ImageAttachment>) -> FeedbackForm {
        FeedbackForm {
            text: self.value(ElementKey::TextFeedback).unwrap_or_default(),
            images,
            csrf_token: self
                .value(ElementKey::CsrfToken)
                .filter(|token| !token.is_empty()),
            submit_enabled: self.submit_enabled(),
        }
    }
}

fn paused_message(remaining: u64, reason: Option<PauseReason>) -> String {
    let friendly = format_friendly_time(remaining);
    match reason {
        Some(PauseReason::Activity) => format!("Paused (user active) (remaining: {})", friendly),
        _ => format!("Paused (remaining: {})", friendly),
    }
}
