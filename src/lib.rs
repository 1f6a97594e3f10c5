//! Timeout Capture - a feedback countdown that never loses the user's input
//!
//! When a feedback session runs out of time the current text and images are
//! submitted automatically, retried on failure and backed up locally as a
//! last resort. User activity pauses the countdown; inactivity resumes it.

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod state;
pub mod tasks;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use api::create_router;
pub use config::{Config, TimerConfig};
pub use state::{ReceiverState, Session, SessionParts};
pub use tasks::{ActivityDetector, Countdown};
pub use utils::signals::shutdown_signal;
