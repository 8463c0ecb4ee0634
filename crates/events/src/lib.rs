//! Notification pipeline for the timelapse agent.
//!
//! - [`NotificationCoordinator`] drains a bounded queue of intents in
//!   FIFO order and delivers them through a [`NotificationTransport`].
//! - [`NotificationHandle`] is the non-blocking producer side.
//! - [`delivery`] holds the transports (Slack Web API, tracing log).
//! - [`render`] turns intents into message text and uploads.

pub mod coordinator;
pub mod delivery;
pub mod queue;
pub mod render;
pub mod retry;
pub mod threads;
pub mod transport;

pub use coordinator::{
    DeliverySnapshot, NotificationCoordinator, NotificationHandle, DEFAULT_QUEUE_CAPACITY,
};
pub use delivery::{LogTransport, SlackConfig, SlackTransport};
pub use queue::EnqueueOutcome;
pub use retry::RetryPolicy;
pub use transport::{FileRef, FileUpload, NotificationTransport, TransportError};
