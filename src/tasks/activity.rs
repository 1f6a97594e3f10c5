//! User activity detection
//!
//! Input events pause the countdown; a quiet period resumes it. Events are
//! fed through an unbounded channel into a single monitor task that also
//! owns the inactivity deadline, so there is never more than one pending
//! idle timer.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    config::constants::INACTIVITY_THRESHOLD,
    state::{Phase, PauseReason, ResumeReason},
    tasks::countdown::Countdown,
};

/// Input observed on the page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    PointerMove,
    PointerDown,
    PointerUp,
    Click,
    KeyDown,
    KeyUp,
    Scroll,
    TouchStart,
    TouchMove,
    Focus,
    Input,
    Visibility { hidden: bool },
}

#[derive(Default)]
struct Monitor {
    sender: Option<mpsc::UnboundedSender<ActivityEvent>>,
    task: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct ActivityDetector {
    countdown: Countdown,
    threshold: Duration,
    monitor: Arc<Mutex<Monitor>>,
}

impl ActivityDetector {
    pub fn new(countdown: Countdown) -> Self {
        Self::with_threshold(countdown, INACTIVITY_THRESHOLD)
    }

    pub fn with_threshold(countdown: Countdown, threshold: Duration) -> Self {
        Self {
            countdown,
            threshold,
            monitor: Arc::new(Mutex::new(Monitor::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Monitor> {
        match self.monitor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Spawn the monitor task and arm the idle timer; no-op when running
    pub fn start(&self) {
        let mut monitor = self.lock();
        if monitor.task.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Activity monitoring already running");
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No async runtime; activity monitoring is disabled");
                return;
            }
        };
        let (sender, receiver) = mpsc::unbounded_channel();
        let countdown = self.countdown.clone();
        let threshold = self.threshold;
        monitor.task = Some(runtime.spawn(async move {
            monitor_task(countdown, receiver, threshold).await;
        }));
        monitor.sender = Some(sender);
        info!("Activity monitoring started ({}s threshold)", threshold.as_secs());
    }

    /// Deliver one event; false when monitoring is not running
    pub fn notify(&self, event: ActivityEvent) -> bool {
        let monitor = self.lock();
        match &monitor.sender {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.lock()
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Cancel the idle timer and detach every listener
    pub fn stop(&self) {
        let mut monitor = self.lock();
        monitor.sender = None;
        if let Some(task) = monitor.task.take() {
            task.abort();
            info!("Activity monitoring stopped");
        }
    }
}

async fn monitor_task(
    countdown: Countdown,
    mut events: mpsc::UnboundedReceiver<ActivityEvent>,
    threshold: Duration,
) {
    let mut deadline = Instant::now() + threshold;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                match event {
                    ActivityEvent::Visibility { hidden: true } => {
                        if countdown.state().paused_for_activity() {
                            debug!("Page hidden while paused for activity, resuming");
                            countdown.resume(ResumeReason::PageHidden);
                        }
                    }
                    _ => {
                        if !countdown.is_paused() {
                            debug!("User activity ({:?}), pausing countdown", event);
                            countdown.pause(PauseReason::Activity);
                        }
                        deadline = Instant::now() + threshold;
                    }
                }
            }
            _ = sleep_until(deadline) => {
                if countdown.phase() == Phase::Paused {
                    debug!("No activity for {}s, resuming countdown", threshold.as_secs());
                    countdown.resume(ResumeReason::Inactivity);
                }
                deadline = Instant::now() + threshold;
            }
        }
    }
}
