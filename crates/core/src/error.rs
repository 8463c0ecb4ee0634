//! Error taxonomy shared by the scheduler, the agent and the notification
//! pipeline.
//!
//! Capture-loop errors never leave the scheduler: they are converted into
//! notification intents. Only [`CommandRejected`] and
//! [`ConfigurationError`] are returned to the command source.

use std::time::Duration;

/// Outcome of a single call to the capture device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The device ran but did not produce an image. Recoverable.
    #[error("Capture failed: {0}")]
    Failed(String),

    /// The device did not answer within the configured capture timeout.
    #[error("Capture timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    /// Writing or inspecting the output file failed.
    #[error("Capture I/O error: {0}")]
    Io(String),

    /// The device is gone (missing binary, no camera attached). Terminal
    /// for the current run.
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),
}

impl CaptureError {
    /// Whether this error must end the run instead of skipping one tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::DeviceUnavailable(_))
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Io(err.to_string())
    }
}

/// A configuration value that prevents a run (or the agent) from starting.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Interval must be at least 1 second (got {0})")]
    InvalidInterval(u64),

    #[error("Duration {duration}s is shorter than interval {interval}s")]
    DurationShorterThanInterval { interval: u64, duration: u64 },

    #[error("Output directory {path} is not usable: {reason}")]
    OutputDir { path: String, reason: String },

    #[error("Invalid camera settings: {0}")]
    Camera(String),

    #[error("Invalid value for {key}: {value:?}")]
    Env { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// A command that is not valid in the scheduler's current state.
///
/// Rejections never mutate run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandRejected {
    #[error("A timelapse is already running")]
    AlreadyRunning,

    #[error("The previous timelapse is still stopping")]
    TransitionInProgress,

    #[error("No timelapse is running")]
    NotRunning,
}

/// Everything `start` can refuse with.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Rejected(#[from] CommandRejected),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_device_unavailable_is_fatal() {
        assert!(CaptureError::DeviceUnavailable("no camera".into()).is_fatal());
        assert!(!CaptureError::Failed("exit 1".into()).is_fatal());
        assert!(!CaptureError::TimedOut(Duration::from_secs(5)).is_fatal());
        assert!(!CaptureError::Io("disk full".into()).is_fatal());
    }

    #[test]
    fn timed_out_display_uses_seconds() {
        let err = CaptureError::TimedOut(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Capture timed out after 30s");
    }

    #[test]
    fn start_error_is_transparent() {
        let err = StartError::from(CommandRejected::AlreadyRunning);
        assert_eq!(err.to_string(), "A timelapse is already running");

        let err = StartError::from(ConfigurationError::InvalidInterval(0));
        assert_eq!(err.to_string(), "Interval must be at least 1 second (got 0)");
    }
}
