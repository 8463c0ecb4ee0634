//! Notification intents: units of notification work queued by the
//! scheduler and the health monitor, consumed exactly once by the
//! notification coordinator.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::health::HealthTransition;
use crate::run::{RunSnapshot, StopReason};
use crate::types::{RunId, Timestamp};

// ---------------------------------------------------------------------------
// Transport references
// ---------------------------------------------------------------------------

/// Opaque handle of a message posted by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef(pub String);

/// Opaque conversation handle. Replies carrying it nest under the message
/// that created it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadRef(pub String);

impl From<MessageRef> for ThreadRef {
    fn from(message: MessageRef) -> Self {
        ThreadRef(message.0)
    }
}

impl fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Kind / priority
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Start,
    Progress,
    Photo,
    Stop,
    HealthAlert,
    Error,
}

/// Queue priority used by the overflow policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Progress and photo updates. First to be evicted.
    Low,
    /// Run start and health alerts.
    Normal,
    /// Errors and stops. Never dropped.
    Critical,
}

impl IntentKind {
    pub fn priority(self) -> Priority {
        match self {
            IntentKind::Progress | IntentKind::Photo => Priority::Low,
            IntentKind::Start | IntentKind::HealthAlert => Priority::Normal,
            IntentKind::Stop | IntentKind::Error => Priority::Critical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IntentKind::Start => "start",
            IntentKind::Progress => "progress",
            IntentKind::Photo => "photo",
            IntentKind::Stop => "stop",
            IntentKind::HealthAlert => "health_alert",
            IntentKind::Error => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Kind-specific data carried by an intent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntentPayload {
    Start {
        interval_secs: u64,
        duration_secs: u64,
        output_dir: PathBuf,
    },
    Progress {
        image_count: u64,
        failed_captures: u64,
        elapsed: Duration,
        remaining: Duration,
    },
    Photo {
        path: PathBuf,
        /// Image number within the run; `None` for out-of-band photos.
        sequence: Option<u64>,
        captured_at: Timestamp,
        /// `path` is a throwaway preview, deleted once the intent has
        /// been handled.
        preview: bool,
    },
    Stop {
        image_count: u64,
        failed_captures: u64,
        elapsed: Duration,
        reason: StopReason,
    },
    HealthAlert(HealthTransition),
    Error {
        message: String,
        /// The run ended because of this error.
        fatal: bool,
        /// Errors that were swallowed by the rate limiter since the last
        /// error notification.
        suppressed: u64,
    },
}

impl IntentPayload {
    pub fn kind(&self) -> IntentKind {
        match self {
            IntentPayload::Start { .. } => IntentKind::Start,
            IntentPayload::Progress { .. } => IntentKind::Progress,
            IntentPayload::Photo { .. } => IntentKind::Photo,
            IntentPayload::Stop { .. } => IntentKind::Stop,
            IntentPayload::HealthAlert(_) => IntentKind::HealthAlert,
            IntentPayload::Error { .. } => IntentKind::Error,
        }
    }

    /// Progress payload built from a run snapshot.
    pub fn progress(snapshot: &RunSnapshot) -> Self {
        IntentPayload::Progress {
            image_count: snapshot.image_count,
            failed_captures: snapshot.failed_captures,
            elapsed: snapshot.elapsed,
            remaining: snapshot.remaining,
        }
    }

    /// Stop payload built from the final run snapshot.
    pub fn stop(snapshot: &RunSnapshot) -> Self {
        IntentPayload::Stop {
            image_count: snapshot.image_count,
            failed_captures: snapshot.failed_captures,
            elapsed: snapshot.elapsed,
            reason: snapshot.stop_reason.unwrap_or(StopReason::Completed),
        }
    }
}

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

/// A notification waiting for delivery.
///
/// Constructed via [`NotificationIntent::new`] and attached to a run with
/// [`for_run`](NotificationIntent::for_run).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationIntent {
    pub kind: IntentKind,
    pub payload: IntentPayload,
    /// The run this intent belongs to. Run-scoped intents are threaded
    /// under the run's start message.
    pub run_id: Option<RunId>,
    /// Conversation to reply into. Filled in by the coordinator from the
    /// run's thread when the emitter does not know it yet.
    pub thread_ref: Option<ThreadRef>,
    pub created_at: Timestamp,
}

impl NotificationIntent {
    pub fn new(payload: IntentPayload) -> Self {
        Self {
            kind: payload.kind(),
            payload,
            run_id: None,
            thread_ref: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_run(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn in_thread(mut self, thread_ref: ThreadRef) -> Self {
        self.thread_ref = Some(thread_ref);
        self
    }

    pub fn priority(&self) -> Priority {
        self.kind.priority()
    }

    /// Preview file owned by this intent, if any.
    pub fn preview_file(&self) -> Option<&Path> {
        match &self.payload {
            IntentPayload::Photo {
                path,
                preview: true,
                ..
            } => Some(path),
            _ => None,
        }
    }

    /// Whether delivering this intent ends its run's conversation.
    pub fn is_terminal(&self) -> bool {
        match &self.payload {
            IntentPayload::Stop { .. } => true,
            IntentPayload::Error { fatal, .. } => *fatal,
            _ => false,
        }
    }
}
