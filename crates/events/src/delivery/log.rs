//! Transport that writes notifications to the tracing log.
//!
//! Used when no chat credentials are configured, so the agent still runs
//! and every notification remains visible.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use timelapse_core::intent::{MessageRef, ThreadRef};

use crate::transport::{FileRef, FileUpload, NotificationTransport, TransportError};

#[derive(Debug, Default)]
pub struct LogTransport {
    sequence: AtomicU64,
}

impl LogTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_ref(&self) -> String {
        format!("log-{}", self.sequence.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn send_message(
        &self,
        text: &str,
        thread: Option<&ThreadRef>,
    ) -> Result<MessageRef, TransportError> {
        let message_ref = self.next_ref();
        tracing::info!(
            message_ref = %message_ref,
            thread = thread.map(|t| t.0.as_str()),
            text,
            "Notification"
        );
        Ok(MessageRef(message_ref))
    }

    async fn upload_file(
        &self,
        upload: &FileUpload,
        thread: Option<&ThreadRef>,
    ) -> Result<FileRef, TransportError> {
        let file_ref = self.next_ref();
        tracing::info!(
            file_ref = %file_ref,
            thread = thread.map(|t| t.0.as_str()),
            filename = %upload.filename,
            size_bytes = upload.bytes.len(),
            comment = %upload.comment,
            "Notification upload"
        );
        Ok(FileRef(file_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refs_are_unique() {
        let transport = LogTransport::new();
        let a = transport.send_message("a", None).await.unwrap();
        let b = transport
            .send_message("b", Some(&ThreadRef::from(a.clone())))
            .await
            .unwrap();
        assert_ne!(a, b);
    }
}
