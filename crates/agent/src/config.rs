//! Agent configuration loaded from environment variables.
//!
//! Every value has a default suitable for a Raspberry Pi with a camera
//! module. A value that is present but malformed is an error rather than
//! silently replaced by the default.
//!
//! | Env Var                        | Default                                   |
//! |--------------------------------|-------------------------------------------|
//! | `OUTPUT_DIR`                   | `~/timelapse`                             |
//! | `FILENAME_PREFIX`              | `timelapse_`                              |
//! | `CAMERA_COMMAND`               | `rpicam-still`                            |
//! | `CAPTURE_WIDTH` / `_HEIGHT`    | `1920` / `1080`                           |
//! | `CAPTURE_QUALITY`              | `90`                                      |
//! | `CAMERA_VFLIP` / `_HFLIP`      | `false`                                   |
//! | `FOCUS_MODE`                   | `auto` (`manual`, `continuous`)           |
//! | `LENS_POSITION`                | unset (manual focus only, 0-1000)         |
//! | `EXPOSURE_MODE`                | `auto` (`manual`, `sport`, `night`)       |
//! | `SHUTTER_SPEED_US`             | unset (manual exposure, 1-1000000)        |
//! | `ISO`                          | unset (manual exposure, 100-3200)         |
//! | `ANALOGUE_GAIN`                | unset (manual exposure, 0-16)             |
//! | `AWB_MODE`                     | `auto`                                    |
//! | `BRIGHTNESS`                   | `0` (-1 to 1)                             |
//! | `CONTRAST` / `SATURATION`      | `1`                                       |
//! | `SHARPNESS`                    | `1`                                       |
//! | `NOISE_REDUCTION`              | `false`                                   |
//! | `PHOTO_PREVIEW`                | `true`                                    |
//! | `PHOTO_PREVIEW_WIDTH`/`_HEIGHT`| `640` / `480`                             |
//! | `PHOTO_PREVIEW_QUALITY`        | `30`                                      |
//! | `CAPTURE_TIMEOUT_SECS`         | `30`                                      |
//! | `PROGRESS_EVERY`               | `10`                                      |
//! | `PHOTO_EVERY`                  | `5`                                       |
//! | `PHOTO_MIN_INTERVAL_SECS`      | `120`                                     |
//! | `ERROR_WINDOW_SECS`            | `300`                                     |
//! | `HEALTH_INTERVAL_SECS`         | `60`                                      |
//! | `TEMPERATURE_WARNING_CELSIUS`  | `80`                                      |
//! | `TEMPERATURE_RECOVERY_MARGIN`  | `2`                                       |
//! | `LOW_DISK_WARNING_MB`          | `100`                                     |
//! | `THERMAL_ZONE_PATH`            | `/sys/class/thermal/thermal_zone0/temp`   |
//! | `RETENTION_MAX_IMAGES`         | unset (0 also disables)                   |
//! | `RETENTION_MAX_AGE_HOURS`      | unset (0 also disables)                   |
//! | `RETENTION_INTERVAL_SECS`      | `600`                                     |
//! | `RETENTION_AFTER_CAPTURE`      | `true`                                    |
//! | `NOTIFY_QUEUE_CAPACITY`        | `64`                                      |
//! | `NOTIFY_MAX_ATTEMPTS`          | `4`                                       |
//! | `NOTIFY_BASE_DELAY_MS`         | `1000`                                    |
//! | `NOTIFY_MAX_DELAY_SECS`        | `30`                                      |
//! | `NOTIFY_START_STOP`            | `true`                                    |
//! | `NOTIFY_PROGRESS`              | `true`                                    |
//! | `NOTIFY_PHOTOS`                | `true`                                    |
//! | `NOTIFY_ERRORS`                | `true`                                    |
//! | `NOTIFY_HEALTH`                | `true`                                    |
//! | `SLACK_BOT_TOKEN`              | unset (log transport)                     |
//! | `SLACK_CHANNEL`                | unset                                     |
//! | `SLACK_API_URL`                | `https://slack.com/api`                   |
//! | `AUTOSTART_INTERVAL_SECS`      | unset                                     |
//! | `AUTOSTART_DURATION_SECS`      | unset                                     |
//! | `LOG_FORMAT`                   | `text` (`json` for structured output)     |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use timelapse_core::capture::{
    AwbMode, CaptureSettings, ExposureMode, ExposureSettings, FocusMode, FocusSettings,
    PreviewSettings,
};
use timelapse_core::config::{NotificationCadence, NotificationToggles, SchedulerConfig};
use timelapse_core::error::ConfigurationError;
use timelapse_core::health::HealthThresholds;
use timelapse_core::retention::RetentionPolicy;
use timelapse_core::run::RunPlan;
use timelapse_events::delivery::slack::DEFAULT_API_BASE;
use timelapse_events::{RetryPolicy, SlackConfig, DEFAULT_QUEUE_CAPACITY};
use validator::Validate;

use crate::camera::DEFAULT_CAMERA_COMMAND;
use crate::vitals::DEFAULT_THERMAL_ZONE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub interval: Duration,
    pub thresholds: HealthThresholds,
    pub thermal_zone: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub policy: RetentionPolicy,
    pub interval: Duration,
    /// Also run a pass after every counted capture.
    pub after_capture: bool,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
    pub toggles: NotificationToggles,
    /// `None` falls back to logging notifications.
    pub slack: Option<SlackConfig>,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub scheduler: SchedulerConfig,
    pub camera_command: String,
    pub health: HealthConfig,
    pub retention: RetentionConfig,
    pub notify: NotifyConfig,
    /// Run to start as soon as the agent is up.
    pub autostart: Option<RunPlan>,
    pub log_format: LogFormat,
}

impl AgentConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let home = env.get("HOME");
        let output_dir = expand_tilde(
            &env.get("OUTPUT_DIR").unwrap_or_else(|| "~/timelapse".into()),
            home.as_deref(),
        );

        let scheduler = SchedulerConfig {
            output_dir,
            filename_prefix: env.get("FILENAME_PREFIX").unwrap_or_else(|| "timelapse_".into()),
            capture: CaptureSettings {
                width: env.parse("CAPTURE_WIDTH", 1920)?,
                height: env.parse("CAPTURE_HEIGHT", 1080)?,
                quality: env.parse("CAPTURE_QUALITY", 90)?,
                vflip: env.flag("CAMERA_VFLIP", false)?,
                hflip: env.flag("CAMERA_HFLIP", false)?,
                focus: FocusSettings {
                    mode: env.parse("FOCUS_MODE", FocusMode::Auto)?,
                    lens_position: env.optional("LENS_POSITION")?,
                },
                exposure: ExposureSettings {
                    mode: env.parse("EXPOSURE_MODE", ExposureMode::Auto)?,
                    shutter_us: env.optional("SHUTTER_SPEED_US")?,
                    iso: env.optional("ISO")?,
                    gain: env.optional("ANALOGUE_GAIN")?,
                },
                awb: env.parse("AWB_MODE", AwbMode::Auto)?,
                brightness: env.parse("BRIGHTNESS", 0.0)?,
                contrast: env.parse("CONTRAST", 1.0)?,
                saturation: env.parse("SATURATION", 1.0)?,
                sharpness: env.parse("SHARPNESS", 1.0)?,
                noise_reduction: env.flag("NOISE_REDUCTION", false)?,
            },
            preview: if env.flag("PHOTO_PREVIEW", true)? {
                Some(PreviewSettings {
                    width: env.parse("PHOTO_PREVIEW_WIDTH", 640)?,
                    height: env.parse("PHOTO_PREVIEW_HEIGHT", 480)?,
                    quality: env.parse("PHOTO_PREVIEW_QUALITY", 30)?,
                })
            } else {
                None
            },
            capture_timeout: env.secs("CAPTURE_TIMEOUT_SECS", 30)?,
            cadence: NotificationCadence {
                progress_every: env.parse("PROGRESS_EVERY", 10)?,
                photo_every: env.parse("PHOTO_EVERY", 5)?,
                photo_min_interval: env.secs("PHOTO_MIN_INTERVAL_SECS", 120)?,
                error_window: env.secs("ERROR_WINDOW_SECS", 300)?,
            },
        }
        .validated()?;

        let thresholds = HealthThresholds {
            max_temperature_celsius: env.parse("TEMPERATURE_WARNING_CELSIUS", 80.0)?,
            temperature_recovery_margin: env.parse("TEMPERATURE_RECOVERY_MARGIN", 2.0)?,
            min_free_disk_bytes: env.parse::<u64>("LOW_DISK_WARNING_MB", 100)?.saturating_mul(1024 * 1024),
        };
        thresholds.validate()?;
        let health = HealthConfig {
            interval: env.positive_secs("HEALTH_INTERVAL_SECS", 60)?,
            thresholds,
            thermal_zone: env
                .get("THERMAL_ZONE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_THERMAL_ZONE)),
        };

        let policy = RetentionPolicy {
            max_images: env.optional::<usize>("RETENTION_MAX_IMAGES")?.filter(|n| *n > 0),
            max_age: env
                .optional::<u64>("RETENTION_MAX_AGE_HOURS")?
                .filter(|h| *h > 0)
                .map(|h| Duration::from_secs(h * 3600)),
        };
        policy.validate()?;
        let retention = RetentionConfig {
            policy,
            interval: env.positive_secs("RETENTION_INTERVAL_SECS", 600)?,
            after_capture: env.flag("RETENTION_AFTER_CAPTURE", true)?,
        };

        let queue_capacity: usize = env.parse("NOTIFY_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?;
        if queue_capacity == 0 {
            return Err(ConfigurationError::Env {
                key: "NOTIFY_QUEUE_CAPACITY",
                value: "0".into(),
            });
        }
        let max_attempts: u32 = env.parse("NOTIFY_MAX_ATTEMPTS", 4)?;
        if max_attempts == 0 {
            return Err(ConfigurationError::Env {
                key: "NOTIFY_MAX_ATTEMPTS",
                value: "0".into(),
            });
        }
        let retry = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(env.parse("NOTIFY_BASE_DELAY_MS", 1000)?),
            max_delay: env.secs("NOTIFY_MAX_DELAY_SECS", 30)?,
            ..RetryPolicy::default()
        };
        let toggles = NotificationToggles {
            start_stop: env.flag("NOTIFY_START_STOP", true)?,
            progress: env.flag("NOTIFY_PROGRESS", true)?,
            photos: env.flag("NOTIFY_PHOTOS", true)?,
            errors: env.flag("NOTIFY_ERRORS", true)?,
            health_alerts: env.flag("NOTIFY_HEALTH", true)?,
        };
        let slack = match (env.get("SLACK_BOT_TOKEN"), env.get("SLACK_CHANNEL")) {
            (Some(bot_token), Some(channel)) => Some(SlackConfig {
                bot_token,
                channel,
                api_base: env.get("SLACK_API_URL").unwrap_or_else(|| DEFAULT_API_BASE.into()),
            }),
            (Some(_), None) => {
                return Err(ConfigurationError::Env {
                    key: "SLACK_CHANNEL",
                    value: String::new(),
                })
            }
            _ => None,
        };

        let autostart = match (
            env.optional::<u64>("AUTOSTART_INTERVAL_SECS")?,
            env.optional::<u64>("AUTOSTART_DURATION_SECS")?,
        ) {
            (Some(interval), Some(duration)) => Some(RunPlan::new(interval, duration)?),
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigurationError::Env {
                    key: "AUTOSTART_DURATION_SECS",
                    value: String::new(),
                })
            }
            (None, Some(_)) => {
                return Err(ConfigurationError::Env {
                    key: "AUTOSTART_INTERVAL_SECS",
                    value: String::new(),
                })
            }
        };

        let log_format = match env.get("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase) {
            None => LogFormat::Text,
            Some(format) if format == "text" => LogFormat::Text,
            Some(format) if format == "json" => LogFormat::Json,
            Some(other) => {
                return Err(ConfigurationError::Env {
                    key: "LOG_FORMAT",
                    value: other,
                })
            }
        };

        Ok(Self {
            scheduler,
            camera_command: env
                .get("CAMERA_COMMAND")
                .unwrap_or_else(|| DEFAULT_CAMERA_COMMAND.into()),
            health,
            retention,
            notify: NotifyConfig {
                queue_capacity,
                retry,
                toggles,
                slack,
            },
            autostart,
            log_format,
        })
    }
}

/// Typed access to a key lookup. Empty values count as unset.
struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn optional<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigurationError> {
        self.get(key)
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| ConfigurationError::Env { key, value })
            })
            .transpose()
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigurationError> {
        Ok(self.optional(key)?.unwrap_or(default))
    }

    fn secs(&self, key: &'static str, default: u64) -> Result<Duration, ConfigurationError> {
        self.parse(key, default).map(Duration::from_secs)
    }

    fn positive_secs(&self, key: &'static str, default: u64) -> Result<Duration, ConfigurationError> {
        let secs = self.secs(key, default)?;
        if secs.is_zero() {
            return Err(ConfigurationError::Env {
                key,
                value: "0".into(),
            });
        }
        Ok(secs)
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigurationError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigurationError::Env { key, value }),
            },
        }
    }
}

/// Expand a leading `~` using `home`.
fn expand_tilde(path: &str, home: Option<&str>) -> PathBuf {
    match (path.strip_prefix('~'), home) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            PathBuf::from(format!("{home}{rest}"))
        }
        _ => PathBuf::from(path),
    }
}
