//! Capture scheduler.
//!
//! Owns the single [`RunState`] and drives the tick loop of the active
//! run. Commands (`start`, `stop`, `photo`) and status reads go through
//! [`CaptureScheduler`]; the loop itself runs as a spawned task that
//! captures on every tick, updates counters and emits notification
//! intents.
//!
//! The state lock is only ever held for a transition or a snapshot, never
//! across a device call. Device access is serialized by a separate async
//! gate shared by scheduled and out-of-band captures.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use timelapse_core::capture::{
    available_name, preview_image_name, run_image_name, snapshot_image_name, CaptureAttempt,
    CaptureDevice, CaptureOutcome, CaptureSettings,
};
use timelapse_core::config::SchedulerConfig;
use timelapse_core::error::{CaptureError, CommandRejected, ConfigurationError, StartError};
use timelapse_core::intent::{IntentKind, IntentPayload, NotificationIntent};
use timelapse_core::rate_limit::{Cooldown, ErrorDecision, ErrorRateLimiter};
use timelapse_core::run::{RunPlan, RunSnapshot, RunState, RunStatus, StopReason};
use timelapse_core::types::{RunId, Timestamp};
use timelapse_events::NotificationHandle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Failure of an out-of-band `photo` request.
#[derive(Debug, thiserror::Error)]
pub enum PhotoError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Subdirectory of the output directory holding notification previews.
pub const PREVIEW_DIR: &str = "previews";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// In-flight capture marker
// ---------------------------------------------------------------------------

/// Start time of the capture currently writing to the output directory.
///
/// Retention reads it to leave files that may still be partially written
/// alone.
#[derive(Debug, Clone, Default)]
pub struct InFlightCapture(Arc<Mutex<Option<Timestamp>>>);

impl InFlightCapture {
    pub(crate) fn begin(&self, at: Timestamp) {
        *lock(&self.0) = Some(at);
    }

    pub(crate) fn end(&self) {
        *lock(&self.0) = None;
    }

    pub fn started_at(&self) -> Option<Timestamp> {
        *lock(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CaptureScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    device: Arc<dyn CaptureDevice>,
    notifier: NotificationHandle,
    state: Mutex<RunState>,
    device_gate: tokio::sync::Mutex<()>,
    in_flight: InFlightCapture,
    retention_trigger: Option<Arc<Notify>>,
    run_cancel: Mutex<Option<CancellationToken>>,
    run_task: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureScheduler {
    /// `retention_trigger`, when set, is notified after every counted
    /// capture. `config` is validated here.
    pub fn new(
        config: SchedulerConfig,
        device: Arc<dyn CaptureDevice>,
        notifier: NotificationHandle,
        retention_trigger: Option<Arc<Notify>>,
    ) -> Result<Self, ConfigurationError> {
        let config = config.validated()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                device,
                notifier,
                state: Mutex::new(RunState::new()),
                device_gate: tokio::sync::Mutex::new(()),
                in_flight: InFlightCapture::default(),
                retention_trigger,
                run_cancel: Mutex::new(None),
                run_task: Mutex::new(None),
            }),
        })
    }

    pub fn in_flight(&self) -> InFlightCapture {
        self.inner.in_flight.clone()
    }

    pub fn output_dir(&self) -> &Path {
        &self.inner.config.output_dir
    }

    /// Snapshot of the current run. Never waits on the tick loop.
    pub fn status(&self) -> RunSnapshot {
        lock(&self.inner.state).snapshot(Instant::now().into_std())
    }

    /// Begin a new run and spawn its tick loop.
    pub async fn start(
        &self,
        interval_secs: u64,
        duration_secs: u64,
    ) -> Result<RunSnapshot, StartError> {
        lock(&self.inner.state).status().accepts_start()?;
        let plan = RunPlan::new(interval_secs, duration_secs)?;
        ensure_output_dir(&self.inner.config.output_dir).await?;

        let started = Instant::now();
        let (run_id, snapshot) = {
            let mut state = lock(&self.inner.state);
            let run_id = state.begin(plan, Utc::now(), started.into_std())?;
            (run_id, state.snapshot(started.into_std()))
        };

        tracing::info!(
            %run_id,
            interval_secs,
            duration_secs,
            expected_captures = plan.expected_captures(),
            output_dir = %self.inner.config.output_dir.display(),
            "Timelapse started"
        );
        self.inner.notifier.enqueue(
            NotificationIntent::new(IntentPayload::Start {
                interval_secs,
                duration_secs,
                output_dir: self.inner.config.output_dir.clone(),
            })
            .for_run(run_id),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.inner),
            run_id,
            plan,
            started,
            cancel.clone(),
        ));
        *lock(&self.inner.run_cancel) = Some(cancel);
        // A previous task, if any, has already left its loop.
        *lock(&self.inner.run_task) = Some(task);

        Ok(snapshot)
    }

    /// Ask the active run to stop. The in-flight capture, if any, is left
    /// to finish; the loop emits the stop notification when it exits.
    pub fn stop(&self) -> Result<RunSnapshot, CommandRejected> {
        self.request_stop(StopReason::Requested)
    }

    fn request_stop(&self, reason: StopReason) -> Result<RunSnapshot, CommandRejected> {
        let snapshot = {
            let mut state = lock(&self.inner.state);
            state.request_stop(reason)?;
            state.snapshot(Instant::now().into_std())
        };
        tracing::info!(
            run_id = ?snapshot.run_id,
            reason = ?reason,
            image_count = snapshot.image_count,
            "Stop requested"
        );
        if let Some(cancel) = lock(&self.inner.run_cancel).as_ref() {
            cancel.cancel();
        }
        Ok(snapshot)
    }

    /// Wait for the current run's loop to exit.
    pub async fn join(&self) {
        let task = lock(&self.inner.run_task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Capture loop task failed");
            }
        }
    }

    /// Stop any active run on behalf of the agent and wait for it.
    pub async fn shutdown(&self) {
        match self.request_stop(StopReason::Shutdown) {
            Ok(_) | Err(CommandRejected::NotRunning) => {}
            Err(e) => tracing::debug!(error = %e, "Run already stopping at shutdown"),
        }
        self.join().await;
    }

    /// Take a single photo outside of any run.
    pub async fn photo(&self) -> Result<PathBuf, PhotoError> {
        ensure_output_dir(&self.inner.config.output_dir).await?;

        let config = &self.inner.config;
        let dir = &config.output_dir;
        let (at, result) = self
            .inner
            .capture(&config.capture, dir, |at| {
                available_name(dir, &snapshot_image_name(&config.filename_prefix, at))
            })
            .await;
        let path = result.map_err(|e| {
            tracing::warn!(error = %e, "Out-of-band photo failed");
            e
        })?;

        tracing::info!(path = %path.display(), "Photo taken");
        let (upload, preview) = self.inner.notification_image(&path).await;
        self.inner
            .notifier
            .enqueue(NotificationIntent::new(IntentPayload::Photo {
                path: upload,
                sequence: None,
                captured_at: at,
                preview,
            }));
        Ok(path)
    }
}

impl Inner {
    /// One device call into `dir`, bounded by the capture timeout.
    /// `file_name` runs with the device held.
    async fn capture(
        &self,
        settings: &CaptureSettings,
        dir: &Path,
        file_name: impl FnOnce(Timestamp) -> String,
    ) -> (Timestamp, Result<PathBuf, CaptureError>) {
        let _gate = self.device_gate.lock().await;

        let at = Utc::now();
        let target = dir.join(file_name(at));
        let timeout = self.config.capture_timeout;

        self.in_flight.begin(at);
        let result = match tokio::time::timeout(timeout, self.device.capture(settings, &target)).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::TimedOut(timeout)),
        };
        self.in_flight.end();

        (at, result)
    }

    /// File a photo notification for `image` should upload, and whether it
    /// is a throwaway preview. Falls back to `image` when no preview is
    /// configured or taking one fails.
    async fn notification_image(&self, image: &Path) -> (PathBuf, bool) {
        let Some(preview) = &self.config.preview else {
            return (image.to_path_buf(), false);
        };
        if !self.notifier.is_enabled(IntentKind::Photo) {
            return (image.to_path_buf(), false);
        }

        let dir = self.config.output_dir.join(PREVIEW_DIR);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::warn!(dir = %dir.display(), error = %e, "Preview directory unusable, sending full image");
            return (image.to_path_buf(), false);
        }
        let name = preview_image_name(
            &image
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        let settings = self.config.capture.scaled_to(preview);
        let (_, result) = self
            .capture(&settings, &dir, |_| available_name(&dir, &name))
            .await;
        match result {
            Ok(path) => (path, true),
            Err(e) => {
                tracing::warn!(error = %e, "Preview capture failed, sending full image");
                (image.to_path_buf(), false)
            }
        }
    }

    async fn on_success(
        &self,
        run_id: RunId,
        sequence: u64,
        at: Timestamp,
        path: PathBuf,
        photos: &mut Cooldown,
    ) {
        let now = Instant::now().into_std();
        let counted = {
            let mut state = lock(&self.state);
            state
                .record_success()
                .map(|count| (count, state.snapshot(now)))
        };
        let Some((count, snapshot)) = counted else {
            tracing::info!(
                %run_id,
                sequence,
                path = %path.display(),
                "Capture finished after stop was requested, not counted"
            );
            return;
        };

        tracing::info!(%run_id, sequence, image_count = count, path = %path.display(), "Image captured");

        // Both cadences are at least 1 once the config is validated.
        let cadence = &self.config.cadence;
        if count % cadence.photo_every == 0 {
            if photos.should_fire(now) {
                let (upload, preview) = self.notification_image(&path).await;
                self.notifier.enqueue(
                    NotificationIntent::new(IntentPayload::Photo {
                        path: upload,
                        sequence: Some(count),
                        captured_at: at,
                        preview,
                    })
                    .for_run(run_id),
                );
            } else {
                tracing::debug!(%run_id, image_count = count, "Photo notification too soon, skipped");
            }
        }
        if count % cadence.progress_every == 0 {
            self.notifier.enqueue(
                NotificationIntent::new(IntentPayload::progress(&snapshot)).for_run(run_id),
            );
        }

        if let Some(trigger) = &self.retention_trigger {
            trigger.notify_one();
        }
    }

    fn on_failure(
        &self,
        run_id: RunId,
        sequence: u64,
        at: Timestamp,
        err: &CaptureError,
        errors: &mut ErrorRateLimiter,
    ) {
        let failed = lock(&self.state).record_failure(err, at);
        tracing::warn!(
            %run_id,
            sequence,
            failed_captures = failed,
            severity = "error",
            error = %err,
            "Capture failed"
        );

        match errors.check(Instant::now().into_std()) {
            ErrorDecision::Notify { suppressed } => {
                self.notifier.enqueue(
                    NotificationIntent::new(IntentPayload::Error {
                        message: err.to_string(),
                        fatal: false,
                        suppressed,
                    })
                    .for_run(run_id),
                );
            }
            ErrorDecision::Suppress => {
                tracing::debug!(%run_id, "Error notification rate-limited");
            }
        }
    }

    fn on_fatal(&self, run_id: RunId, at: Timestamp, err: &CaptureError) {
        let snapshot = lock(&self.state).fail(err, at, Instant::now().into_std());
        tracing::error!(
            %run_id,
            image_count = snapshot.image_count,
            severity = "critical",
            error = %err,
            "Capture device unavailable, run failed"
        );
        self.notifier.enqueue(
            NotificationIntent::new(IntentPayload::Error {
                message: err.to_string(),
                fatal: true,
                suppressed: 0,
            })
            .for_run(run_id),
        );
    }
}

/// Tick loop of one run.
///
/// Wakes on the interval tick, the run deadline or a stop request, then
/// checks the state before capturing. Late ticks are skipped rather than
/// replayed.
async fn run_loop(
    inner: Arc<Inner>,
    run_id: RunId,
    plan: RunPlan,
    started: Instant,
    cancel: CancellationToken,
) {
    let deadline = started + plan.duration();
    let mut ticker = tokio::time::interval_at(started, plan.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let cadence = inner.config.cadence.clone();
    let mut errors = ErrorRateLimiter::new(cadence.error_window);
    let mut photos = Cooldown::new(cadence.photo_min_interval);
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::time::sleep_until(deadline) => {}
            _ = cancel.cancelled() => {}
        }

        {
            let state = lock(&inner.state);
            if state.status() != RunStatus::Running
                || state.is_expired(Instant::now().into_std())
            {
                break;
            }
        }

        sequence += 1;
        let config = &inner.config;
        let (at, result) = inner
            .capture(&config.capture, &config.output_dir, |at| {
                run_image_name(&config.filename_prefix, at, sequence)
            })
            .await;

        let attempt = CaptureAttempt {
            sequence_number: sequence,
            timestamp: at,
            outcome: match &result {
                Ok(path) => CaptureOutcome::Success { path: path.clone() },
                Err(e) => CaptureOutcome::Failure {
                    reason: e.to_string(),
                },
            },
        };
        tracing::debug!(%run_id, ?attempt, "Capture attempt");

        match result {
            Ok(path) => inner.on_success(run_id, sequence, at, path, &mut photos).await,
            Err(err) if err.is_fatal() => {
                inner.on_fatal(run_id, at, &err);
                return;
            }
            Err(err) => inner.on_failure(run_id, sequence, at, &err, &mut errors),
        }
    }

    let finished = {
        let mut state = lock(&inner.state);
        state
            .status()
            .is_active()
            .then(|| state.finish(Instant::now().into_std()))
    };
    if let Some(snapshot) = finished {
        tracing::info!(
            %run_id,
            image_count = snapshot.image_count,
            failed_captures = snapshot.failed_captures,
            elapsed_secs = snapshot.elapsed.as_secs(),
            reason = ?snapshot.stop_reason,
            "Timelapse finished"
        );
        inner
            .notifier
            .enqueue(NotificationIntent::new(IntentPayload::stop(&snapshot)).for_run(run_id));
    }
}

async fn ensure_output_dir(dir: &Path) -> Result<(), ConfigurationError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ConfigurationError::OutputDir {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })
}
