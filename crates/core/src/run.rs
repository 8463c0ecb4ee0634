//! Timelapse run state machine.
//!
//! ```text
//! Idle -> Running -> Stopping -> Stopped
//!            \-----------------> Failed
//! ```
//!
//! [`RunState`] is owned by the capture scheduler behind a single lock.
//! Everything else observes it through [`RunSnapshot`], an immutable copy
//! taken while the lock is held.
//!
//! Elapsed time is measured on a monotonic [`Instant`] passed in by the
//! caller so the scheduler can drive it from the async runtime's clock.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{CaptureError, CommandRejected, ConfigurationError};
use crate::types::{new_run_id, RunId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of the scheduler's current (or most recent) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl RunStatus {
    /// Check whether a new run may begin from this status.
    ///
    /// `Stopped` and `Failed` are terminal for their run and behave like
    /// `Idle` for the next one.
    pub fn accepts_start(self) -> Result<(), CommandRejected> {
        match self {
            RunStatus::Idle | RunStatus::Stopped | RunStatus::Failed => Ok(()),
            RunStatus::Running => Err(CommandRejected::AlreadyRunning),
            RunStatus::Stopping => Err(CommandRejected::TransitionInProgress),
        }
    }

    /// Check whether a stop request is meaningful from this status.
    pub fn accepts_stop(self) -> Result<(), CommandRejected> {
        match self {
            RunStatus::Running => Ok(()),
            RunStatus::Stopping => Err(CommandRejected::TransitionInProgress),
            RunStatus::Idle | RunStatus::Stopped | RunStatus::Failed => {
                Err(CommandRejected::NotRunning)
            }
        }
    }

    /// Whether a run is in progress (ticking or finishing its last tick).
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Stopping)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Stopping => "stopping",
            RunStatus::Stopped => "stopped",
            RunStatus::Failed => "failed",
        }
    }
}

/// Why a run left `Running` without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The configured duration elapsed.
    Completed,
    /// A `stop` command was received.
    Requested,
    /// The agent is shutting down.
    Shutdown,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Validated parameters of a run. Immutable once the run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunPlan {
    pub interval_secs: u64,
    pub duration_secs: u64,
}

impl RunPlan {
    /// Validate a `start(interval, duration)` request.
    pub fn new(interval_secs: u64, duration_secs: u64) -> Result<Self, ConfigurationError> {
        if interval_secs == 0 {
            return Err(ConfigurationError::InvalidInterval(interval_secs));
        }
        if duration_secs < interval_secs {
            return Err(ConfigurationError::DurationShorterThanInterval {
                interval: interval_secs,
                duration: duration_secs,
            });
        }
        Ok(Self {
            interval_secs,
            duration_secs,
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    /// Number of captures a failure-free run is expected to take.
    pub fn expected_captures(&self) -> u64 {
        self.duration_secs / self.interval_secs
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The most recent error observed by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub at: Timestamp,
    pub fatal: bool,
}

/// Mutable state of one timelapse execution.
#[derive(Debug, Clone)]
pub struct RunState {
    run_id: Option<RunId>,
    status: RunStatus,
    plan: Option<RunPlan>,
    started_at: Option<Timestamp>,
    started_instant: Option<Instant>,
    finished_instant: Option<Instant>,
    image_count: u64,
    failed_captures: u64,
    last_error: Option<ErrorRecord>,
    stop_reason: Option<StopReason>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    /// A scheduler that has never run anything.
    pub fn new() -> Self {
        Self {
            run_id: None,
            status: RunStatus::Idle,
            plan: None,
            started_at: None,
            started_instant: None,
            finished_instant: None,
            image_count: 0,
            failed_captures: 0,
            last_error: None,
            stop_reason: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    pub fn image_count(&self) -> u64 {
        self.image_count
    }

    pub fn plan(&self) -> Option<RunPlan> {
        self.plan
    }

    /// Transition into `Running` for a new run.
    ///
    /// Counters, errors and timestamps of the previous run are discarded.
    pub fn begin(
        &mut self,
        plan: RunPlan,
        started_at: Timestamp,
        now: Instant,
    ) -> Result<RunId, CommandRejected> {
        self.status.accepts_start()?;

        let run_id = new_run_id();
        *self = Self {
            run_id: Some(run_id),
            status: RunStatus::Running,
            plan: Some(plan),
            started_at: Some(started_at),
            started_instant: Some(now),
            ..Self::new()
        };
        Ok(run_id)
    }

    /// Count a successful capture. Returns the new image count, or `None`
    /// when the run is no longer `Running` and the capture is not counted.
    pub fn record_success(&mut self) -> Option<u64> {
        if self.status != RunStatus::Running {
            return None;
        }
        self.image_count += 1;
        Some(self.image_count)
    }

    /// Count a failed capture and remember it as the last error.
    ///
    /// Returns the number of failed captures so far in this run.
    pub fn record_failure(&mut self, err: &CaptureError, at: Timestamp) -> u64 {
        if self.status == RunStatus::Running {
            self.failed_captures += 1;
        }
        self.last_error = Some(ErrorRecord {
            message: err.to_string(),
            at,
            fatal: err.is_fatal(),
        });
        self.failed_captures
    }

    /// Ask the run to wind down. The tick loop finalizes the transition.
    pub fn request_stop(&mut self, reason: StopReason) -> Result<(), CommandRejected> {
        self.status.accepts_stop()?;
        self.status = RunStatus::Stopping;
        self.stop_reason = Some(reason);
        Ok(())
    }

    /// Whether the configured duration has elapsed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.plan {
            Some(plan) => self.elapsed(now) >= plan.duration(),
            None => false,
        }
    }

    /// Finalize `Running`/`Stopping` into `Stopped`.
    ///
    /// A run that was never asked to stop is recorded as
    /// [`StopReason::Completed`].
    pub fn finish(&mut self, now: Instant) -> RunSnapshot {
        if self.status.is_active() {
            self.status = RunStatus::Stopped;
            self.stop_reason.get_or_insert(StopReason::Completed);
            self.finished_instant = Some(now);
        }
        self.snapshot(now)
    }

    /// Move an active run into `Failed` after a fatal device error.
    pub fn fail(&mut self, err: &CaptureError, at: Timestamp, now: Instant) -> RunSnapshot {
        if self.status.is_active() {
            self.status = RunStatus::Failed;
            self.finished_instant = Some(now);
        }
        self.last_error = Some(ErrorRecord {
            message: err.to_string(),
            at,
            fatal: true,
        });
        self.snapshot(now)
    }

    /// Time spent in the run so far, frozen once the run has ended.
    pub fn elapsed(&self, now: Instant) -> Duration {
        match self.started_instant {
            Some(start) => self
                .finished_instant
                .unwrap_or(now)
                .saturating_duration_since(start),
            None => Duration::ZERO,
        }
    }

    /// Take an immutable copy for readers outside the scheduler.
    pub fn snapshot(&self, now: Instant) -> RunSnapshot {
        let elapsed = self.elapsed(now);
        let remaining = match self.plan {
            Some(plan) if self.status.is_active() => plan.duration().saturating_sub(elapsed),
            _ => Duration::ZERO,
        };

        RunSnapshot {
            run_id: self.run_id,
            status: self.status,
            started_at: self.started_at,
            interval_secs: self.plan.map(|p| p.interval_secs),
            duration_secs: self.plan.map(|p| p.duration_secs),
            image_count: self.image_count,
            failed_captures: self.failed_captures,
            elapsed,
            remaining,
            last_error: self.last_error.clone(),
            stop_reason: self.stop_reason,
        }
    }
}

/// Read-only view of a [`RunState`] at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSnapshot {
    pub run_id: Option<RunId>,
    pub status: RunStatus,
    pub started_at: Option<Timestamp>,
    pub interval_secs: Option<u64>,
    pub duration_secs: Option<u64>,
    pub image_count: u64,
    pub failed_captures: u64,
    pub elapsed: Duration,
    pub remaining: Duration,
    pub last_error: Option<ErrorRecord>,
    pub stop_reason: Option<StopReason>,
}

impl RunSnapshot {
    /// Fraction of the planned duration already elapsed, in percent.
    pub fn progress_percent(&self) -> f64 {
        let total = self.elapsed + self.remaining;
        if total.is_zero() {
            return 0.0;
        }
        (self.elapsed.as_secs_f64() / total.as_secs_f64()) * 100.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
