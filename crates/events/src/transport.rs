//! Notification transport contract.
//!
//! A transport posts text messages and uploads files, optionally as
//! replies inside an existing conversation thread.

use std::time::Duration;

use async_trait::async_trait;
use timelapse_core::intent::{MessageRef, ThreadRef};

/// Handle of an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef(pub String);

/// A file to upload together with the message that introduces it.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub comment: String,
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for notification delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Transport returned HTTP {0}")]
    HttpStatus(u16),

    /// The remote side asked us to slow down.
    #[error("Rate limited by transport")]
    RateLimited { retry_after: Option<Duration> },

    /// The remote API answered but refused the call.
    #[error("Transport API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// API error codes that are worth retrying.
const TRANSIENT_API_ERRORS: [&str; 5] = [
    "ratelimited",
    "internal_error",
    "fatal_error",
    "service_unavailable",
    "request_timeout",
];

impl TransportError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Request(_) | TransportError::RateLimited { .. } => true,
            TransportError::HttpStatus(status) => *status >= 500 || *status == 408,
            TransportError::Api(code) => TRANSIENT_API_ERRORS.contains(&code.as_str()),
            TransportError::Io(_) => false,
        }
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Post a text message, as a thread reply when `thread` is set.
    async fn send_message(
        &self,
        text: &str,
        thread: Option<&ThreadRef>,
    ) -> Result<MessageRef, TransportError>;

    /// Upload a file, as a thread reply when `thread` is set.
    async fn upload_file(
        &self,
        upload: &FileUpload,
        thread: Option<&ThreadRef>,
    ) -> Result<FileRef, TransportError>;
}
