//! Background tasks module
//!
//! The countdown ticker, the activity monitor and the terminal front end.

pub mod activity;
pub mod countdown;
pub mod terminal;

// Re-export main types
pub use activity::{ActivityDetector, ActivityEvent};
pub use countdown::{Countdown, CountdownEvent, CountdownEventKind};
pub use terminal::{run_input, run_view, TerminalCommand};
