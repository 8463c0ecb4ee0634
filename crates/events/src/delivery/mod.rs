//! Notification transports.

pub mod log;
pub mod slack;

pub use log::LogTransport;
pub use slack::{SlackConfig, SlackTransport};
