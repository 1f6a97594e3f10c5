//! Countdown state structure and management

/// Lifecycle of a countdown run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Paused,
    Expired,
    Stopped,
}

/// Why the countdown was paused; only affects UI text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    Activity,
    Manual,
}

/// Why the countdown was resumed; only affects UI text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeReason {
    Inactivity,
    PageHidden,
    Manual,
}

/// Countdown state, owned by the countdown controller
#[derive(Debug, Clone)]
pub struct TimerState {
    pub phase: Phase,
    pub remaining_seconds: u64,
    /// Snapshot of `remaining_seconds` taken when pausing
    pub paused_remaining: u64,
    pub pause_reason: Option<PauseReason>,
    /// One-shot warning already raised in this run
    pub warned: bool,
}

impl TimerState {
    /// Create an idle state holding the full duration
    pub fn new(total_seconds: u64) -> Self {
        Self {
            phase: Phase::Idle,
            remaining_seconds: total_seconds,
            paused_remaining: 0,
            pause_reason: None,
            warned: false,
        }
    }

    /// Fresh running state for a new run
    pub fn running(total_seconds: u64) -> Self {
        Self {
            phase: Phase::Running,
            ..Self::new(total_seconds)
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Expired and stopped runs count as paused: nothing ticks any more
    pub fn is_paused(&self) -> bool {
        matches!(self.phase, Phase::Paused | Phase::Expired | Phase::Stopped)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::Expired | Phase::Stopped)
    }

    /// Paused specifically because the user was active
    pub fn paused_for_activity(&self) -> bool {
        self.phase == Phase::Paused && self.pause_reason == Some(PauseReason::Activity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases_report_paused() {
        let mut state = TimerState::running(10);
        assert!(state.is_running());
        assert!(!state.is_paused());

        state.phase = Phase::Expired;
        assert!(state.is_paused());
        assert!(state.is_terminal());
        assert!(!state.paused_for_activity());
    }
}
