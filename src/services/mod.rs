//! Delivery, backup and event services
//!
//! These are the collaborators the countdown relies on once a session
//! times out: the transport and retry loop, the local backup store and the
//! event registry used to wire them together.

pub mod backup;
pub mod events;
pub mod submission;
pub mod transport;

// Re-export main types
pub use backup::{BackupEntry, BackupStats, BackupStore, FileStorage, MemoryStorage, Storage};
pub use events::{EventBus, SubscriptionId};
pub use submission::{CaptureOutcome, RetryPolicy, SubmissionHandler, Submitter};
pub use transport::{HttpTransport, SubmissionForm, SubmitResponse, Transport};
