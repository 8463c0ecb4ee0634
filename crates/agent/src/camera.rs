//! Still camera driven through an external capture command.
//!
//! Runs `rpicam-still` (or a compatible tool) once per capture. The child
//! is killed if the capture future is dropped, which is what happens when
//! the scheduler's capture timeout fires.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use timelapse_core::capture::{AwbMode, CaptureDevice, CaptureSettings, ExposureMode, FocusMode};
use timelapse_core::error::CaptureError;
use tokio::process::Command;

/// Default capture command on Raspberry Pi OS.
pub const DEFAULT_CAMERA_COMMAND: &str = "rpicam-still";

/// Diagnostics printed by libcamera tools when no sensor is attached.
const UNAVAILABLE_MARKERS: [&str; 3] = [
    "no cameras available",
    "failed to acquire camera",
    "camera not found",
];

/// Allowed command characters: alphanumeric, hyphen, underscore, dot, slash.
fn is_safe_command(command: &str) -> bool {
    !command.is_empty()
        && command
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}

#[derive(Debug, Clone)]
pub struct StillCamera {
    command: String,
}

impl StillCamera {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn args(settings: &CaptureSettings, target: &Path) -> Vec<String> {
        let mut args = vec![
            "--nopreview".to_string(),
            "--immediate".to_string(),
            "--width".to_string(),
            settings.width.to_string(),
            "--height".to_string(),
            settings.height.to_string(),
            "--quality".to_string(),
            settings.quality.to_string(),
        ];
        if settings.vflip {
            args.push("--vflip".to_string());
        }
        if settings.hflip {
            args.push("--hflip".to_string());
        }
        Self::control_args(settings, &mut args);
        args.push("--output".to_string());
        args.push(target.display().to_string());
        args
    }

    /// Focus, exposure and tuning controls. Defaults are left to the tool.
    fn control_args(settings: &CaptureSettings, args: &mut Vec<String>) {
        let mut push = |flag: &str, value: String| {
            args.push(flag.to_string());
            args.push(value);
        };

        match settings.focus.mode {
            FocusMode::Auto => {}
            FocusMode::Continuous => push("--autofocus-mode", "continuous".into()),
            FocusMode::Manual => {
                push("--autofocus-mode", "manual".into());
                if let Some(position) = settings.focus.lens_position {
                    push("--lens-position", position.to_string());
                }
            }
        }

        let exposure = &settings.exposure;
        match exposure.mode {
            ExposureMode::Auto => {}
            ExposureMode::Sport => push("--exposure", "sport".into()),
            ExposureMode::Night => push("--exposure", "long".into()),
            ExposureMode::Manual => {
                if let Some(shutter) = exposure.shutter_us {
                    push("--shutter", shutter.to_string());
                }
                if let Some(gain) = exposure.analogue_gain() {
                    push("--gain", gain.to_string());
                }
            }
        }

        if settings.awb != AwbMode::Auto {
            push("--awb", settings.awb.as_str().into());
        }
        let defaults = CaptureSettings::default();
        for (flag, value, default) in [
            ("--brightness", settings.brightness, defaults.brightness),
            ("--contrast", settings.contrast, defaults.contrast),
            ("--saturation", settings.saturation, defaults.saturation),
            ("--sharpness", settings.sharpness, defaults.sharpness),
        ] {
            if value != default {
                push(flag, value.to_string());
            }
        }
        if settings.noise_reduction {
            push("--denoise", "cdn_hq".into());
        }
    }
}

impl Default for StillCamera {
    fn default() -> Self {
        Self::new(DEFAULT_CAMERA_COMMAND)
    }
}

#[async_trait]
impl CaptureDevice for StillCamera {
    async fn capture(
        &self,
        settings: &CaptureSettings,
        target: &Path,
    ) -> Result<PathBuf, CaptureError> {
        if !is_safe_command(&self.command) {
            return Err(CaptureError::DeviceUnavailable(format!(
                "invalid capture command {:?}",
                self.command
            )));
        }

        let output = Command::new(&self.command)
            .args(Self::args(settings, target))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CaptureError::DeviceUnavailable(format!(
                    "capture command '{}' not found",
                    self.command
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            let lowered = detail.to_lowercase();
            if UNAVAILABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
                return Err(CaptureError::DeviceUnavailable(detail.to_string()));
            }
            return Err(CaptureError::Failed(format!(
                "'{}' exited with {}: {}",
                self.command, output.status, detail
            )));
        }

        let metadata = tokio::fs::metadata(target).await?;
        if metadata.len() == 0 {
            return Err(CaptureError::Failed("capture produced an empty file".into()));
        }
        Ok(target.to_path_buf())
    }
}
