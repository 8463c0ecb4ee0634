//! Validated configuration consumed by the scheduler and notifier.
//!
//! Loading (environment, files, `~` expansion) happens in the agent; the
//! structs here are what the rest of the system is handed.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use validator::Validate;

use crate::capture::{CaptureSettings, PreviewSettings};
use crate::error::ConfigurationError;
use crate::intent::IntentKind;

/// How often the scheduler turns captures into notifications.
#[derive(Debug, Clone, PartialEq, Eq, Validate, Serialize)]
pub struct NotificationCadence {
    /// Emit a progress notification every N successful captures.
    #[validate(range(min = 1))]
    pub progress_every: u64,
    /// Emit a photo notification every N successful captures.
    #[validate(range(min = 1))]
    pub photo_every: u64,
    /// Minimum spacing between two photo notifications of one run.
    pub photo_min_interval: Duration,
    /// At most one error notification per run within this window.
    pub error_window: Duration,
}

impl Default for NotificationCadence {
    fn default() -> Self {
        Self {
            progress_every: 10,
            photo_every: 5,
            photo_min_interval: Duration::from_secs(120),
            error_window: Duration::from_secs(300),
        }
    }
}

/// Per-kind on/off switches for outbound notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NotificationToggles {
    pub start_stop: bool,
    pub progress: bool,
    pub photos: bool,
    pub errors: bool,
    pub health_alerts: bool,
}

impl Default for NotificationToggles {
    fn default() -> Self {
        Self {
            start_stop: true,
            progress: true,
            photos: true,
            errors: true,
            health_alerts: true,
        }
    }
}

impl NotificationToggles {
    pub fn allows(&self, kind: IntentKind) -> bool {
        match kind {
            IntentKind::Start | IntentKind::Stop => self.start_stop,
            IntentKind::Progress => self.progress,
            IntentKind::Photo => self.photos,
            IntentKind::Error => self.errors,
            IntentKind::HealthAlert => self.health_alerts,
        }
    }
}

/// Everything the capture scheduler needs besides its collaborators.
#[derive(Debug, Clone, PartialEq, Validate, Serialize)]
pub struct SchedulerConfig {
    pub output_dir: PathBuf,
    #[validate(length(max = 64))]
    pub filename_prefix: String,
    #[validate(nested)]
    pub capture: CaptureSettings,
    /// Photo notifications upload this smaller copy instead of the
    /// full-size image. `None` uploads the capture itself.
    #[validate(nested)]
    pub preview: Option<PreviewSettings>,
    /// A device call running longer than this counts as a failed capture.
    pub capture_timeout: Duration,
    #[validate(nested)]
    pub cadence: NotificationCadence,
}

impl SchedulerConfig {
    /// Run the declarative checks plus the ones validator cannot express.
    pub fn validated(self) -> Result<Self, ConfigurationError> {
        self.validate()?;
        if self.capture_timeout.is_zero() {
            return Err(ConfigurationError::Env {
                key: "CAPTURE_TIMEOUT_SECS",
                value: "0".into(),
            });
        }
        if !(1..=100).contains(&self.capture.quality) {
            return Err(ConfigurationError::Env {
                key: "CAPTURE_QUALITY",
                value: self.capture.quality.to_string(),
            });
        }
        self.capture.check_modes()?;
        Ok(self)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("timelapse"),
            filename_prefix: "timelapse_".to_string(),
            capture: CaptureSettings::default(),
            preview: Some(PreviewSettings::default()),
            capture_timeout: Duration::from_secs(30),
            cadence: NotificationCadence::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(SchedulerConfig::default().validated().is_ok());
    }

    #[test]
    fn zero_cadence_is_rejected() {
        let config = SchedulerConfig {
            cadence: NotificationCadence {
                progress_every: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_matches!(config.validated(), Err(ConfigurationError::Invalid(_)));
    }

    #[test]
    fn zero_capture_timeout_is_rejected() {
        let config = SchedulerConfig {
            capture_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_matches!(
            config.validated(),
            Err(ConfigurationError::Env {
                key: "CAPTURE_TIMEOUT_SECS",
                ..
            })
        );
    }

    #[test]
    fn mixed_camera_modes_are_rejected() {
        let mut config = SchedulerConfig::default();
        config.capture.exposure.shutter_us = Some(10_000);
        assert_matches!(config.validated(), Err(ConfigurationError::Camera(_)));
    }

    #[test]
    fn out_of_range_preview_is_rejected() {
        let config = SchedulerConfig {
            preview: Some(PreviewSettings {
                quality: 0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_matches!(config.validated(), Err(ConfigurationError::Invalid(_)));
    }

    #[test]
    fn toggles_map_kinds() {
        let toggles = NotificationToggles {
            progress: false,
            ..Default::default()
        };
        assert!(!toggles.allows(IntentKind::Progress));
        assert!(toggles.allows(IntentKind::Start));
        assert!(toggles.allows(IntentKind::Stop));
    }
}
