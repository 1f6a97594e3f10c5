//! Page model and rendering
//!
//! The renderer turns countdown frames and submission outcomes into element
//! updates on a `Document`, which the terminal front end displays.

pub mod document;
pub mod renderer;

pub use document::{lock_element, Document, Element, ElementHandle, Notification, NotificationLevel};
pub use renderer::{
    format_friendly_time, progress_percent, CountdownView, ElementKey, Renderer, StyleTier,
    Thresholds, TIMEOUT_NOTICE_ID,
};
