//! State management module
//!
//! Countdown state, feedback payloads, the synced clock, the session that
//! ties the page to countdown and submission, and the receiver's store.

pub mod clock;
pub mod feedback;
pub mod receiver;
pub mod session;
pub mod timer_state;

// Re-export main types
pub use clock::SyncedClock;
pub use feedback::{
    BackupRecord, FeedbackForm, FeedbackPayload, ImageAttachment, ImageSelection, MANUAL_SOURCE,
    TIMEOUT_SOURCE,
};
pub use receiver::{ReceivedFeedback, ReceivedImage, ReceiverState, ReceiverTotals};
pub use session::{Session, SessionParts};
pub use timer_state::{PauseReason, Phase, ResumeReason, TimerState};
