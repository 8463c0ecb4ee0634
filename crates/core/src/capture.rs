//! Capture device contract and per-tick capture records.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use validator::Validate;

use crate::error::{CaptureError, ConfigurationError};
use crate::types::Timestamp;

/// Autofocus behaviour of the lens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusMode {
    #[default]
    Auto,
    /// Fixed lens position, see [`FocusSettings::lens_position`].
    Manual,
    Continuous,
}

/// Exposure program of the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureMode {
    #[default]
    Auto,
    /// Fixed shutter and gain, see [`ExposureSettings`].
    Manual,
    Sport,
    Night,
}

/// Auto white balance preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AwbMode {
    #[default]
    Auto,
    Incandescent,
    Tungsten,
    Fluorescent,
    Indoor,
    Daylight,
    Cloudy,
}

/// Error returned when parsing an unknown mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mode {0:?}")]
pub struct UnknownMode(pub String);

macro_rules! mode_names {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name),+
                }
            }
        }

        impl FromStr for $ty {
            type Err = UnknownMode;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok(Self::$variant),)+
                    _ => Err(UnknownMode(s.to_string())),
                }
            }
        }
    };
}

mode_names!(FocusMode {
    Auto => "auto",
    Manual => "manual",
    Continuous => "continuous",
});

mode_names!(ExposureMode {
    Auto => "auto",
    Manual => "manual",
    Sport => "sport",
    Night => "night",
});

mode_names!(AwbMode {
    Auto => "auto",
    Incandescent => "incandescent",
    Tungsten => "tungsten",
    Fluorescent => "fluorescent",
    Indoor => "indoor",
    Daylight => "daylight",
    Cloudy => "cloudy",
});

#[derive(Debug, Clone, Default, PartialEq, Validate, Serialize)]
pub struct FocusSettings {
    pub mode: FocusMode,
    /// Dioptres. Required with manual focus and rejected otherwise.
    #[validate(range(min = 0.0, max = 1000.0))]
    pub lens_position: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Validate, Serialize)]
pub struct ExposureSettings {
    pub mode: ExposureMode,
    /// Microseconds.
    #[validate(range(min = 1, max = 1_000_000))]
    pub shutter_us: Option<u64>,
    #[validate(range(min = 100, max = 3200))]
    pub iso: Option<u32>,
    /// Analogue gain. Takes precedence over `iso`.
    #[validate(range(min = 0.0, max = 16.0))]
    pub gain: Option<f64>,
}

impl ExposureSettings {
    fn has_manual_values(&self) -> bool {
        self.shutter_us.is_some() || self.iso.is_some() || self.gain.is_some()
    }

    /// Analogue gain to request, from `gain` or else ISO/100.
    pub fn analogue_gain(&self) -> Option<f64> {
        self.gain.or(self.iso.map(|iso| f64::from(iso) / 100.0))
    }
}

const MIN_BRIGHTNESS: f64 = -1.0;

/// Image parameters handed to the capture device on every call.
#[derive(Debug, Clone, PartialEq, Validate, Serialize)]
pub struct CaptureSettings {
    #[validate(range(min = 1))]
    pub width: u32,
    #[validate(range(min = 1))]
    pub height: u32,
    /// JPEG quality, 1-100.
    pub quality: u8,
    pub vflip: bool,
    pub hflip: bool,
    #[validate(nested)]
    pub focus: FocusSettings,
    #[validate(nested)]
    pub exposure: ExposureSettings,
    pub awb: AwbMode,
    #[validate(range(min = MIN_BRIGHTNESS, max = 1.0))]
    pub brightness: f64,
    #[validate(range(min = 0.0, max = 32.0))]
    pub contrast: f64,
    #[validate(range(min = 0.0, max = 32.0))]
    pub saturation: f64,
    #[validate(range(min = 0.0, max = 16.0))]
    pub sharpness: f64,
    pub noise_reduction: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            quality: 90,
            vflip: false,
            hflip: false,
            focus: FocusSettings::default(),
            exposure: ExposureSettings::default(),
            awb: AwbMode::default(),
            brightness: 0.0,
            contrast: 1.0,
            saturation: 1.0,
            sharpness: 1.0,
            noise_reduction: false,
        }
    }
}

impl CaptureSettings {
    /// Cross-field rules between the focus and exposure modes and their
    /// manual values.
    pub fn check_modes(&self) -> Result<(), ConfigurationError> {
        match (self.focus.mode, self.focus.lens_position) {
            (FocusMode::Manual, None) => {
                return Err(ConfigurationError::Camera(
                    "manual focus needs a lens position".into(),
                ))
            }
            (FocusMode::Auto | FocusMode::Continuous, Some(_)) => {
                return Err(ConfigurationError::Camera(format!(
                    "lens position is only used with manual focus, not {}",
                    self.focus.mode.as_str()
                )))
            }
            _ => {}
        }

        let manual_values = self.exposure.has_manual_values();
        match self.exposure.mode {
            ExposureMode::Manual if !manual_values => Err(ConfigurationError::Camera(
                "manual exposure needs a shutter speed, ISO or gain".into(),
            )),
            ExposureMode::Auto | ExposureMode::Sport | ExposureMode::Night if manual_values => {
                Err(ConfigurationError::Camera(format!(
                    "shutter speed, ISO and gain need manual exposure, not {}",
                    self.exposure.mode.as_str()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Same controls at the size and quality of `preview`.
    pub fn scaled_to(&self, preview: &PreviewSettings) -> Self {
        Self {
            width: preview.width,
            height: preview.height,
            quality: preview.quality,
            ..self.clone()
        }
    }
}

/// Low-resolution copy captured for photo notifications.
#[derive(Debug, Clone, PartialEq, Eq, Validate, Serialize)]
pub struct PreviewSettings {
    #[validate(range(min = 16))]
    pub width: u32,
    #[validate(range(min = 16))]
    pub height: u32,
    #[validate(range(min = 1, max = 100))]
    pub quality: u8,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            quality: 30,
        }
    }
}

/// Something that can take a still image and write it to `target`.
///
/// Implementations must be safe to call repeatedly. A device that can no
/// longer be reached reports [`CaptureError::DeviceUnavailable`].
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn capture(&self, settings: &CaptureSettings, target: &Path)
        -> Result<PathBuf, CaptureError>;
}

/// What one tick produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum CaptureOutcome {
    Success { path: PathBuf },
    Failure { reason: String },
}

/// Record of a single scheduled capture. Only logged and notified, never
/// stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureAttempt {
    /// 1-based position of the tick within its run.
    pub sequence_number: u64,
    pub timestamp: Timestamp,
    pub outcome: CaptureOutcome,
}

impl CaptureAttempt {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CaptureOutcome::Success { .. })
    }
}

/// File name for the `sequence`-th capture of a run.
///
/// `timelapse_20240101_120000_00042.jpg`
pub fn run_image_name(prefix: &str, at: Timestamp, sequence: u64) -> String {
    format!("{prefix}{}_{sequence:05}.jpg", at.format("%Y%m%d_%H%M%S"))
}

/// File name for an out-of-band photo taken outside any run.
///
/// Carries milliseconds so back-to-back photos get distinct names.
pub fn snapshot_image_name(prefix: &str, at: Timestamp) -> String {
    format!("{prefix}snapshot_{}.jpg", at.format("%Y%m%d_%H%M%S_%3f"))
}

/// Name of the notification preview for `image_name`.
pub fn preview_image_name(image_name: &str) -> String {
    match image_name.strip_suffix(".jpg") {
        Some(stem) => format!("{stem}_preview.jpg"),
        None => format!("{image_name}_preview.jpg"),
    }
}

/// `name` when it is free in `dir`, otherwise the first free `stem_N.ext`.
pub fn available_name(dir: &Path, name: &str) -> String {
    if !dir.join(name).exists() {
        return name.to_string();
    }
    let (stem, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    (1u32..)
        .map(|n| match ext {
            "" => format!("{stem}_{n}"),
            ext => format!("{stem}_{n}.{ext}"),
        })
        .find(|candidate| !dir.join(candidate).exists())
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn run_image_name_pads_sequence() {
        let at = chrono::Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            run_image_name("timelapse_", at, 42),
            "timelapse_20240309_070501_00042.jpg"
        );
    }

    #[test]
    fn snapshot_name_is_distinct_from_run_names() {
        let at = chrono::Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            snapshot_image_name("cam_", at),
            "cam_snapshot_20240309_070501_000.jpg"
        );
    }

    #[test]
    fn snapshots_within_one_second_get_distinct_names() {
        let first = chrono::Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let second = first + chrono::Duration::milliseconds(250);
        assert_eq!(
            snapshot_image_name("cam_", second),
            "cam_snapshot_20240309_070501_250.jpg"
        );
        assert_ne!(snapshot_image_name("cam_", first), snapshot_image_name("cam_", second));
    }

    #[test]
    fn taken_names_get_a_counter() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(available_name(dir.path(), "a.jpg"), "a.jpg");
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        assert_eq!(available_name(dir.path(), "a.jpg"), "a_1.jpg");
        std::fs::write(dir.path().join("a_1.jpg"), b"x").unwrap();
        assert_eq!(available_name(dir.path(), "a.jpg"), "a_2.jpg");
    }

    #[test]
    fn preview_name_follows_the_image() {
        assert_eq!(preview_image_name("t_20240309_070501_00005.jpg"), "t_20240309_070501_00005_preview.jpg");
    }

    #[test]
    fn mode_names_parse_case_insensitively() {
        assert_eq!("Manual".parse::<FocusMode>(), Ok(FocusMode::Manual));
        assert_eq!("night".parse::<ExposureMode>(), Ok(ExposureMode::Night));
        assert_eq!("daylight".parse::<AwbMode>(), Ok(AwbMode::Daylight));
        assert!("sunset".parse::<AwbMode>().is_err());
    }

    #[test]
    fn default_settings_pass_mode_checks() {
        let settings = CaptureSettings::default();
        assert!(settings.validate().is_ok());
        assert!(settings.check_modes().is_ok());
    }

    #[test]
    fn manual_focus_needs_lens_position() {
        let mut settings = CaptureSettings::default();
        settings.focus.mode = FocusMode::Manual;
        assert_matches!(settings.check_modes(), Err(ConfigurationError::Camera(_)));

        settings.focus.lens_position = Some(2.5);
        assert!(settings.check_modes().is_ok());

        settings.focus.mode = FocusMode::Continuous;
        assert_matches!(settings.check_modes(), Err(ConfigurationError::Camera(_)));
    }

    #[test]
    fn manual_exposure_values_need_manual_mode() {
        let mut settings = CaptureSettings::default();
        settings.exposure.iso = Some(400);
        assert_matches!(settings.check_modes(), Err(ConfigurationError::Camera(_)));

        settings.exposure.mode = ExposureMode::Manual;
        assert!(settings.check_modes().is_ok());
        assert_eq!(settings.exposure.analogue_gain(), Some(4.0));

        settings.exposure.gain = Some(2.0);
        assert_eq!(settings.exposure.analogue_gain(), Some(2.0));

        settings.exposure = ExposureSettings {
            mode: ExposureMode::Manual,
            ..Default::default()
        };
        assert_matches!(settings.check_modes(), Err(ConfigurationError::Camera(_)));
    }

    #[test]
    fn control_ranges_are_enforced() {
        let mut settings = CaptureSettings::default();
        settings.exposure = ExposureSettings {
            mode: ExposureMode::Manual,
            iso: Some(6400),
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = CaptureSettings {
            brightness: 1.5,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let mut settings = CaptureSettings::default();
        settings.focus = FocusSettings {
            mode: FocusMode::Manual,
            lens_position: Some(1200.0),
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn preview_keeps_controls_and_shrinks() {
        let settings = CaptureSettings {
            awb: AwbMode::Cloudy,
            ..Default::default()
        };
        let preview = settings.scaled_to(&PreviewSettings::default());
        assert_eq!((preview.width, preview.height, preview.quality), (640, 480, 30));
        assert_eq!(preview.awb, AwbMode::Cloudy);
    }
}
