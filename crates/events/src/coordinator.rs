//! Notification coordinator.
//!
//! Producers (the capture scheduler, the health monitor, the controller)
//! hold a cloneable [`NotificationHandle`] and enqueue intents without
//! blocking. A single [`NotificationCoordinator`] task drains the queue in
//! FIFO order, one delivery at a time, retrying transient transport
//! failures with backoff. A failed delivery is logged and dropped; it
//! never holds up the intents behind it for longer than its retry budget.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use timelapse_core::config::NotificationToggles;
use timelapse_core::intent::{IntentKind, MessageRef, NotificationIntent, ThreadRef};
use timelapse_core::types::RunId;
use tokio_util::sync::CancellationToken;

use crate::queue::{EnqueueOutcome, IntentQueue};
use crate::render::{photo_fallback_text, render, Rendered};
use crate::retry::{with_retry, DeliveryFailed, RetryPolicy};
use crate::threads::ThreadRegistry;
use crate::transport::{FileUpload, NotificationTransport};

/// Default number of pending intents before the overflow policy applies.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct DeliveryStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Delivery counters reported by `status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliverySnapshot {
    pub delivered: u64,
    /// Intents given up on after exhausting retries.
    pub failed: u64,
    /// Intents lost to queue overflow or shutdown.
    pub dropped: u64,
    pub pending: usize,
}

struct Shared {
    queue: IntentQueue,
    threads: ThreadRegistry,
    stats: DeliveryStats,
    toggles: NotificationToggles,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Producer side of the coordinator. Cheap to clone.
#[derive(Clone)]
pub struct NotificationHandle {
    shared: Arc<Shared>,
}

impl NotificationHandle {
    /// Queue an intent for delivery. Never blocks.
    ///
    /// A terminal intent of a disabled kind is still queued, silently, so
    /// that its run's thread is released in order.
    pub fn enqueue(&self, intent: NotificationIntent) -> EnqueueOutcome {
        let kind = intent.kind;
        if !self.shared.toggles.allows(kind) {
            tracing::debug!(kind = kind.as_str(), "Notification kind disabled, skipping");
            if intent.is_terminal() && intent.run_id.is_some() {
                self.shared.queue.push(intent);
            } else {
                discard_preview(&intent);
            }
            return EnqueueOutcome::Disabled;
        }

        let (outcome, lost) = self.shared.queue.offer(intent);
        if let Some(lost) = &lost {
            discard_preview(lost);
        }
        match outcome {
            EnqueueOutcome::Queued | EnqueueOutcome::Disabled => {}
            EnqueueOutcome::Evicted(evicted) => {
                self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    kind = kind.as_str(),
                    evicted = evicted.as_str(),
                    "Notification queue full, evicted older intent"
                );
            }
            EnqueueOutcome::Dropped => {
                self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(kind = kind.as_str(), "Notification queue full, dropping intent");
            }
            EnqueueOutcome::Closed => {
                self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(kind = kind.as_str(), "Notification queue closed, dropping intent");
            }
        }
        outcome
    }

    /// Whether intents of `kind` are delivered at all.
    pub fn is_enabled(&self, kind: IntentKind) -> bool {
        self.shared.toggles.allows(kind)
    }

    /// Thread of a run whose start message has been delivered.
    pub fn thread_for(&self, run_id: RunId) -> Option<ThreadRef> {
        self.shared.threads.get(run_id)
    }

    pub fn stats(&self) -> DeliverySnapshot {
        let stats = &self.shared.stats;
        DeliverySnapshot {
            delivered: stats.delivered.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            dropped: stats.dropped.load(Ordering::Relaxed),
            pending: self.shared.queue.len(),
        }
    }

    /// Stop accepting intents. Queued ones are still delivered.
    pub fn close(&self) {
        self.shared.queue.close();
    }
}

/// Delete the preview of an intent that will never be dispatched.
fn discard_preview(intent: &NotificationIntent) {
    if let Some(path) = intent.preview_file() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::debug!(path = %path.display(), error = %e, "Preview not removed");
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct NotificationCoordinator {
    transport: Arc<dyn NotificationTransport>,
    retry: RetryPolicy,
    shared: Arc<Shared>,
}

impl NotificationCoordinator {
    pub fn new(
        transport: Arc<dyn NotificationTransport>,
        retry: RetryPolicy,
        capacity: usize,
        toggles: NotificationToggles,
    ) -> Self {
        Self {
            transport,
            retry,
            shared: Arc::new(Shared {
                queue: IntentQueue::new(capacity),
                threads: ThreadRegistry::new(),
                stats: DeliveryStats::default(),
                toggles,
            }),
        }
    }

    pub fn handle(&self) -> NotificationHandle {
        NotificationHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Drain the queue until cancelled.
    ///
    /// Cancellation closes the queue; everything already queued is still
    /// delivered before this returns.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("Notification coordinator started");
        let mut closing = false;

        loop {
            tokio::select! {
                intent = self.shared.queue.pop() => match intent {
                    Some(intent) => self.dispatch(intent).await,
                    None => break,
                },
                _ = cancel.cancelled(), if !closing => {
                    closing = true;
                    tracing::info!(
                        pending = self.shared.queue.len(),
                        "Notification coordinator draining"
                    );
                    self.shared.queue.close();
                }
            }
        }

        tracing::info!("Notification coordinator stopped");
    }

    /// Deliver a single intent, then update thread linkage and counters.
    async fn dispatch(&self, intent: NotificationIntent) {
        let kind = intent.kind;
        if !self.shared.toggles.allows(kind) {
            self.release_thread(&intent);
            return;
        }
        let thread = intent
            .thread_ref
            .clone()
            .or_else(|| intent.run_id.and_then(|run| self.shared.threads.get(run)));

        if intent.run_id.is_some() && thread.is_none() && kind != IntentKind::Start {
            tracing::debug!(
                kind = kind.as_str(),
                "Run has no thread, posting at top level"
            );
        }

        let result = match render(&intent) {
            Rendered::Text(text) => self.send_text(kind, &text, thread.as_ref()).await.map(Some),
            Rendered::Upload {
                path,
                filename,
                comment,
            } => self
                .send_upload(kind, &path, filename, comment, thread.as_ref())
                .await,
        };

        match result {
            Ok(message_ref) => {
                self.shared.stats.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(kind = kind.as_str(), "Notification delivered");
                if kind == IntentKind::Start {
                    if let (Some(run_id), Some(message_ref)) = (intent.run_id, message_ref) {
                        self.shared.threads.insert(run_id, ThreadRef::from(message_ref));
                    }
                }
            }
            Err(e) => {
                self.shared.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    kind = kind.as_str(),
                    attempts = e.attempts,
                    error = %e.source,
                    "Notification delivery failed after all retries, dropping"
                );
            }
        }

        if let Some(path) = intent.preview_file() {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::debug!(path = %path.display(), error = %e, "Preview not removed");
            }
        }
        self.release_thread(&intent);
    }

    fn release_thread(&self, intent: &NotificationIntent) {
        if intent.is_terminal() {
            if let Some(run_id) = intent.run_id {
                self.shared.threads.remove(run_id);
            }
        }
    }

    async fn send_text(
        &self,
        kind: IntentKind,
        text: &str,
        thread: Option<&ThreadRef>,
    ) -> Result<MessageRef, DeliveryFailed> {
        with_retry(&self.retry, kind.as_str(), || {
            self.transport.send_message(text, thread)
        })
        .await
    }

    /// Upload a photo, falling back to a text message when the file cannot
    /// be read or the transport permanently rejects the upload.
    async fn send_upload(
        &self,
        kind: IntentKind,
        path: &std::path::Path,
        filename: String,
        comment: String,
        thread: Option<&ThreadRef>,
    ) -> Result<Option<MessageRef>, DeliveryFailed> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Photo unreadable, sending text instead");
                let text = photo_fallback_text(&comment, &filename, None);
                return self.send_text(kind, &text, thread).await.map(Some);
            }
        };

        let size = bytes.len() as u64;
        let upload = FileUpload {
            filename,
            bytes,
            comment,
        };
        match with_retry(&self.retry, kind.as_str(), || {
            self.transport.upload_file(&upload, thread)
        })
        .await
        {
            Ok(_) => Ok(None),
            Err(e) if !e.source.is_transient() => {
                tracing::warn!(error = %e.source, "Photo upload rejected, sending text instead");
                let text = photo_fallback_text(&upload.comment, &upload.filename, Some(size));
                self.send_text(kind, &text, thread).await.map(Some)
            }
            Err(e) => Err(e),
        }
    }
}
