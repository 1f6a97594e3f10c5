//! Countdown controller: one-second ticks, pause/resume and timeout firing

use std::{
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    config::{constants::COUNTDOWN_UPDATE_INTERVAL, TimerConfig},
    services::EventBus,
    state::{Phase, PauseReason, ResumeReason, TimerState},
    ui::{CountdownView, Renderer},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountdownEventKind {
    Started,
    Tick,
    Warning,
    Paused,
    Resumed,
    Expired,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountdownEvent {
    Started { total_seconds: u64 },
    Tick { remaining_seconds: u64 },
    Warning { remaining_seconds: u64, threshold: u64 },
    Paused { remaining_seconds: u64, reason: PauseReason },
    Resumed { remaining_seconds: u64, reason: ResumeReason },
    Expired { total_seconds: u64 },
    Stopped { remaining_seconds: u64 },
}

impl CountdownEvent {
    pub fn kind(&self) -> CountdownEventKind {
        match self {
            CountdownEvent::Started { .. } => CountdownEventKind::Started,
            CountdownEvent::Tick { .. } => CountdownEventKind::Tick,
            CountdownEvent::Warning { .. } => CountdownEventKind::Warning,
            CountdownEvent::Paused { .. } => CountdownEventKind::Paused,
            CountdownEvent::Resumed { .. } => CountdownEventKind::Resumed,
            CountdownEvent::Expired { .. } => CountdownEventKind::Expired,
            CountdownEvent::Stopped { .. } => CountdownEventKind::Stopped,
        }
    }
}

struct Inner {
    config: TimerConfig,
    /// Total the progress bar is measured against
    initial_total: u64,
    state: TimerState,
    /// Elapsed time is `elapsed_offset + started_at.elapsed()`
    started_at: Option<Instant>,
    elapsed_offset: Duration,
    /// Bumped whenever the tick task is replaced; stale ticks are ignored
    generation: u64,
    tick_task: Option<JoinHandle<()>>,
}

impl Inner {
    fn computed_remaining(&self) -> u64 {
        let elapsed = self
            .started_at
            .map(|start| self.elapsed_offset + start.elapsed())
            .unwrap_or_default()
            .as_secs();
        self.config.total_seconds.saturating_sub(elapsed)
    }

    fn remaining(&self) -> u64 {
        match self.state.phase {
            Phase::Idle => self.config.total_seconds,
            Phase::Running => self.computed_remaining(),
            Phase::Paused => self.state.paused_remaining,
            Phase::Expired => 0,
            Phase::Stopped => self.state.remaining_seconds,
        }
    }

    fn cancel_tick(&mut self) {
        if let Some(task) = self.tick_task.take() {
            task.abort();
        }
        self.generation += 1;
    }

    fn view(&self) -> CountdownView {
        let paused = self.state.phase == Phase::Paused;
        CountdownView {
            remaining: if paused {
                self.state.paused_remaining
            } else {
                self.state.remaining_seconds
            },
            initial_total: self.initial_total,
            paused,
            pause_reason: self.state.pause_reason,
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    events: EventBus<CountdownEventKind, CountdownEvent>,
    renderer: Arc<Renderer>,
    period: Duration,
}

/// Cheaply cloneable handle to one countdown
#[derive(Clone)]
pub struct Countdown {
    shared: Arc<Shared>,
}

impl Countdown {
    pub fn new(config: TimerConfig, renderer: Arc<Renderer>) -> Self {
        Self::with_period(config, renderer, COUNTDOWN_UPDATE_INTERVAL)
    }

    pub fn with_period(config: TimerConfig, renderer: Arc<Renderer>, period: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    config,
                    initial_total: config.total_seconds,
                    state: TimerState::new(config.total_seconds),
                    started_at: None,
                    elapsed_offset: Duration::ZERO,
                    generation: 0,
                    tick_task: None,
                }),
                events: EventBus::new(),
                renderer,
                period,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.shared.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn events(&self) -> &EventBus<CountdownEventKind, CountdownEvent> {
        &self.shared.events
    }

    fn emit(&self, event: CountdownEvent) {
        self.shared.events.emit(event.kind(), &event);
    }

    /// Start a fresh run at the configured total
    pub fn start(&self) {
        self.reset_and_start();
    }

    /// Replace the configuration and restart
    pub fn reconfigure(&self, config: TimerConfig) {
        self.lock().config = config;
        info!("Countdown reconfigured to {}s", config.total_seconds);
        self.reset_and_start();
    }

    pub fn reset_and_start(&self) {
        let (view, total) = {
            let mut inner = self.lock();
            inner.cancel_tick();
            let total = inner.config.total_seconds;
            inner.state = TimerState::running(total);
            inner.initial_total = total;
            inner.started_at = Some(Instant::now());
            inner.elapsed_offset = Duration::ZERO;
            let generation = inner.generation;
            inner.tick_task = self.spawn_ticker(generation);
            (inner.view(), total)
        };
        debug!("Countdown started: {}s", total);
        self.shared.renderer.update_countdown(view);
        self.emit(CountdownEvent::Started { total_seconds: total });
    }

    fn spawn_ticker(&self, generation: u64) -> Option<JoinHandle<()>> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No async runtime; countdown only advances on manual ticks");
                return None;
            }
        };
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let period = self.shared.period;

        Some(runtime.spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                if !(Countdown { shared }).tick_generation(generation) {
                    break;
                }
            }
        }))
    }

    /// Recompute the remaining time; returns false once nothing is ticking
    pub fn tick(&self) -> bool {
        let generation = self.lock().generation;
        self.tick_generation(generation)
    }

    fn tick_generation(&self, generation: u64) -> bool {
        let (view, remaining, warning, expired) = {
            let mut inner = self.lock();
            if inner.generation != generation || !inner.state.is_running() {
                return false;
            }

            let remaining = inner.computed_remaining();
            inner.state.remaining_seconds = remaining;

            let threshold = inner.config.warning_threshold_seconds;
            let warning = if !inner.state.warned && remaining > 0 && remaining <= threshold {
                inner.state.warned = true;
                Some(threshold)
            } else {
                None
            };

            let expired = remaining == 0;
            if expired {
                inner.state.phase = Phase::Expired;
                inner.cancel_tick();
            }
            (inner.view(), remaining, warning, expired)
        };

        self.shared.renderer.update_countdown(view);
        self.emit(CountdownEvent::Tick {
            remaining_seconds: remaining,
        });

        if let Some(threshold) = warning {
            info!("Countdown warning: {}s remaining", remaining);
            self.emit(CountdownEvent::Warning {
                remaining_seconds: remaining,
                threshold,
            });
        }

        if expired {
            let total = self.lock().config.total_seconds;
            info!("Countdown expired after {}s", total);
            self.emit(CountdownEvent::Expired { total_seconds: total });
            self.shared.renderer.show_timeout_notice();
            self.shared.renderer.disable_submit();
            return false;
        }
        true
    }

    /// Freeze the remaining time; no-op unless running
    pub fn pause(&self, reason: PauseReason) -> bool {
        let (view, remaining) = {
            let mut inner = self.lock();
            if !inner.state.is_running() {
                return false;
            }
            let remaining = inner.computed_remaining();
            inner.cancel_tick();
            inner.state.phase = Phase::Paused;
            inner.state.remaining_seconds = remaining;
            inner.state.paused_remaining = remaining;
            inner.state.pause_reason = Some(reason);
            (inner.view(), remaining)
        };
        debug!("Countdown paused ({:?}) at {}s", reason, remaining);
        self.shared
            .renderer
            .show_paused(remaining, view.initial_total, Some(reason));
        self.emit(CountdownEvent::Paused {
            remaining_seconds: remaining,
            reason,
        });
        true
    }

    /// Continue from the frozen value; no-op unless paused
    pub fn resume(&self, reason: ResumeReason) -> bool {
        let (view, remaining) = {
            let mut inner = self.lock();
            if inner.state.phase != Phase::Paused {
                return false;
            }
            let frozen = inner.state.paused_remaining;
            inner.elapsed_offset =
                Duration::from_secs(inner.config.total_seconds.saturating_sub(frozen));
            inner.started_at = Some(Instant::now());
            inner.state.phase = Phase::Running;
            inner.state.remaining_seconds = frozen;
            inner.state.pause_reason = None;

            inner.cancel_tick();
            let generation = inner.generation;
            inner.tick_task = self.spawn_ticker(generation);
            (inner.view(), frozen)
        };
        debug!("Countdown resumed ({:?}) at {}s", reason, remaining);
        self.shared.renderer.update_countdown(view);
        self.emit(CountdownEvent::Resumed {
            remaining_seconds: remaining,
            reason,
        });
        true
    }

    /// Halt for good after a successful manual submission
    pub fn stop(&self) -> bool {
        let remaining = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return false;
            }
            let remaining = inner.remaining();
            inner.cancel_tick();
            inner.state.phase = Phase::Stopped;
            inner.state.remaining_seconds = remaining;
            inner.state.pause_reason = None;
            remaining
        };
        info!("Countdown stopped with {}s remaining", remaining);
        self.shared.renderer.show_completed();
        self.emit(CountdownEvent::Stopped {
            remaining_seconds: remaining,
        });
        true
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.lock().remaining()
    }

    pub fn state(&self) -> TimerState {
        self.lock().state.clone()
    }

    pub fn phase(&self) -> Phase {
        self.lock().state.phase
    }

    pub fn is_paused(&self) -> bool {
        self.lock().state.is_paused()
    }

    pub fn config(&self) -> TimerConfig {
        self.lock().config
    }

    /// Whether a tick task is currently scheduled
    pub fn is_ticking(&self) -> bool {
        self.lock()
            .tick_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}
