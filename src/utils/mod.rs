//! Utility functions module
//!
//! Process-level helpers shared by both subcommands.

pub mod signals;

// Re-export main functions
pub use signals::shutdown_signal;
