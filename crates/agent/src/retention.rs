//! Retention manager: keeps the output directory within its caps.
//!
//! Runs after captures (through a [`Notify`] trigger) and on its own
//! interval. Files that may still be written by an in-flight capture are
//! never touched, and one failed deletion never stops the rest of a pass.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use timelapse_core::retention::{
    format_bytes, select_evictions, RetentionPolicy, RetentionReport, StoredImage,
};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::scheduler::InFlightCapture;

/// File extension of managed images.
const IMAGE_EXTENSION: &str = "jpg";

pub struct RetentionManager {
    dir: PathBuf,
    policy: RetentionPolicy,
    in_flight: InFlightCapture,
}

impl RetentionManager {
    pub fn new(dir: impl Into<PathBuf>, policy: RetentionPolicy, in_flight: InFlightCapture) -> Self {
        Self {
            dir: dir.into(),
            policy,
            in_flight,
        }
    }

    /// Run one retention pass.
    pub async fn enforce(&self) -> RetentionReport {
        let mut report = RetentionReport::default();
        if self.policy.is_unbounded() {
            return report;
        }

        let images = match self.list_images().await {
            Ok(images) => images,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return report,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to list output directory");
                report.errors.push(e.to_string());
                return report;
            }
        };
        report.files_scanned = images.len();

        let evictions = select_evictions(&images, &self.policy, Utc::now(), self.in_flight.started_at());
        for image in evictions {
            match tokio::fs::remove_file(&image.path).await {
                Ok(()) => {
                    report.files_deleted += 1;
                    report.bytes_reclaimed += image.size_bytes;
                    tracing::debug!(path = %image.path.display(), "Deleted old image");
                }
                Err(e) => {
                    tracing::warn!(path = %image.path.display(), error = %e, "Failed to delete image, skipping");
                    report.errors.push(format!("{}: {e}", image.path.display()));
                }
            }
        }

        if report.files_deleted > 0 || !report.errors.is_empty() {
            tracing::info!(
                files_scanned = report.files_scanned,
                files_deleted = report.files_deleted,
                reclaimed = %format_bytes(report.bytes_reclaimed),
                errors = report.errors.len(),
                "Retention pass complete"
            );
        }
        report
    }

    async fn list_images(&self) -> io::Result<Vec<StoredImage>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut images = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(IMAGE_EXTENSION));
            if !is_image {
                continue;
            }

            // Files can vanish between listing and stat; skip them.
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let modified: DateTime<Utc> = match metadata.modified() {
                Ok(modified) => modified.into(),
                Err(_) => continue,
            };

            images.push(StoredImage {
                path,
                modified,
                size_bytes: metadata.len(),
            });
        }
        Ok(images)
    }

    /// Enforce on every trigger and every `interval` until cancelled.
    pub async fn run(self, interval: Duration, trigger: Arc<Notify>, cancel: CancellationToken) {
        if self.policy.is_unbounded() {
            tracing::info!("Retention disabled, no caps configured");
            return;
        }
        tracing::info!(
            dir = %self.dir.display(),
            max_images = ?self.policy.max_images,
            max_age_secs = ?self.policy.max_age.map(|a| a.as_secs()),
            interval_secs = interval.as_secs(),
            "Retention manager started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = trigger.notified() => {}
                _ = cancel.cancelled() => {
                    tracing::info!("Retention manager stopped");
                    break;
                }
            }
            self.enforce().await;
        }
    }
}
