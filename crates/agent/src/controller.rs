//! Controller: the single serialization point for commands.
//!
//! Command sources hold a [`ControllerHandle`] and send typed [`Command`]
//! values over a channel. The [`Controller`] task handles them one at a
//! time, so no two state-changing commands ever run concurrently. Photo
//! captures are handed off to their own task; they share the device gate
//! with the tick loop but never touch run state.

use std::fmt;
use std::path::PathBuf;

use timelapse_core::command::{Command, HELP_TEXT};
use timelapse_core::error::{CaptureError, CommandRejected, ConfigurationError, StartError};
use timelapse_core::health::HealthSample;
use timelapse_core::intent::ThreadRef;
use timelapse_core::retention::format_bytes;
use timelapse_core::run::{RunSnapshot, RunStatus};
use timelapse_events::render::{format_duration, progress_bar, PROGRESS_BAR_WIDTH};
use timelapse_events::{DeliverySnapshot, NotificationHandle};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::scheduler::{CaptureScheduler, PhotoError};

/// Commands waiting for the controller before senders block.
const COMMAND_BUFFER: usize = 16;

// ---------------------------------------------------------------------------
// Replies and errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Rejected(#[from] CommandRejected),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("Unexpected reply to {0}")]
    UnexpectedReply(&'static str),

    #[error("Controller is not running")]
    Unavailable,
}

impl From<StartError> for ControlError {
    fn from(err: StartError) -> Self {
        match err {
            StartError::Rejected(e) => ControlError::Rejected(e),
            StartError::Configuration(e) => ControlError::Configuration(e),
        }
    }
}

impl From<PhotoError> for ControlError {
    fn from(err: PhotoError) -> Self {
        match err {
            PhotoError::Configuration(e) => ControlError::Configuration(e),
            PhotoError::Capture(e) => ControlError::Capture(e),
        }
    }
}

/// Everything `status` reports.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub run: RunSnapshot,
    /// Conversation of the active run, once its start message is out.
    pub thread: Option<ThreadRef>,
    pub health: Option<HealthSample>,
    pub notifications: DeliverySnapshot,
}

#[derive(Debug, Clone)]
pub enum Reply {
    Started(RunSnapshot),
    Stopping(RunSnapshot),
    Status(Box<StatusReport>),
    Photo(PathBuf),
    Help,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Started(run) => {
                let interval = run.interval_secs.unwrap_or_default();
                let duration = run.duration_secs.unwrap_or_default();
                write!(
                    f,
                    "Timelapse started: one photo every {} for {} ({} expected)",
                    format_duration(std::time::Duration::from_secs(interval)),
                    format_duration(std::time::Duration::from_secs(duration)),
                    duration.checked_div(interval).unwrap_or_default(),
                )
            }
            Reply::Stopping(run) => {
                write!(f, "Stopping timelapse after {} images", run.image_count)
            }
            Reply::Status(report) => write!(f, "{report}"),
            Reply::Photo(path) => write!(f, "Photo saved to {}", path.display()),
            Reply::Help => f.write_str(HELP_TEXT),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let run = &self.run;
        writeln!(f, "Status: {}", run.status.as_str())?;

        if run.status != RunStatus::Idle {
            writeln!(f, "Images: {}", run.image_count)?;
            if run.failed_captures > 0 {
                writeln!(f, "Failed captures: {}", run.failed_captures)?;
            }
            if run.status.is_active() {
                let percent = run.progress_percent();
                writeln!(
                    f,
                    "Progress: {} {percent:.1}%",
                    progress_bar(percent, PROGRESS_BAR_WIDTH)
                )?;
                writeln!(f, "Remaining: {}", format_duration(run.remaining))?;
            }
            writeln!(f, "Elapsed: {}", format_duration(run.elapsed))?;
        }
        if let Some(error) = &run.last_error {
            writeln!(
                f,
                "Last error: {} ({})",
                error.message,
                error.at.format("%Y-%m-%d %H:%M:%S UTC")
            )?;
        }
        if let Some(thread) = &self.thread {
            writeln!(f, "Thread: {thread}")?;
        }

        match &self.health {
            Some(sample) => {
                let temperature = sample
                    .temperature_celsius
                    .map_or_else(|| "n/a".to_string(), |t| format!("{t:.1}°C"));
                let disk = sample
                    .free_disk_bytes
                    .map_or_else(|| "n/a".to_string(), format_bytes);
                writeln!(f, "Temperature: {temperature}, free disk: {disk}")?;
                if !sample.is_healthy() {
                    let breached: Vec<_> = sample.breached.iter().map(|m| m.as_str()).collect();
                    writeln!(f, "Health warnings: {}", breached.join(", "))?;
                }
            }
            None => writeln!(f, "Health: no sample yet")?,
        }

        let n = &self.notifications;
        write!(
            f,
            "Notifications: {} delivered, {} failed, {} dropped, {} pending",
            n.delivered, n.failed, n.dropped, n.pending
        )
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

pub struct ControlRequest {
    command: Command,
    reply: oneshot::Sender<Result<Reply, ControlError>>,
}

/// Sending side of the controller. Cheap to clone.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControlRequest>,
}

impl ControllerHandle {
    /// Send a command and wait for its reply.
    pub async fn execute(&self, command: Command) -> Result<Reply, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControlRequest { command, reply })
            .await
            .map_err(|_| ControlError::Unavailable)?;
        rx.await.map_err(|_| ControlError::Unavailable)?
    }

    pub async fn start(
        &self,
        interval_secs: u64,
        duration_secs: u64,
    ) -> Result<RunSnapshot, ControlError> {
        let command = Command::Start {
            interval_secs,
            duration_secs,
        };
        match self.execute(command).await? {
            Reply::Started(run) => Ok(run),
            _ => Err(ControlError::UnexpectedReply("start")),
        }
    }

    pub async fn stop(&self) -> Result<RunSnapshot, ControlError> {
        match self.execute(Command::Stop).await? {
            Reply::Stopping(run) => Ok(run),
            _ => Err(ControlError::UnexpectedReply("stop")),
        }
    }

    pub async fn status(&self) -> Result<StatusReport, ControlError> {
        match self.execute(Command::Status).await? {
            Reply::Status(report) => Ok(*report),
            _ => Err(ControlError::UnexpectedReply("status")),
        }
    }

    pub async fn photo(&self) -> Result<PathBuf, ControlError> {
        match self.execute(Command::Photo).await? {
            Reply::Photo(path) => Ok(path),
            _ => Err(ControlError::UnexpectedReply("photo")),
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Controller {
    scheduler: CaptureScheduler,
    notifier: NotificationHandle,
    health: watch::Receiver<Option<HealthSample>>,
    rx: mpsc::Receiver<ControlRequest>,
}

impl Controller {
    pub fn new(
        scheduler: CaptureScheduler,
        notifier: NotificationHandle,
        health: watch::Receiver<Option<HealthSample>>,
    ) -> (Self, ControllerHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let controller = Self {
            scheduler,
            notifier,
            health,
            rx,
        };
        (controller, ControllerHandle { tx })
    }

    /// Handle commands until cancelled, then stop any active run.
    ///
    /// Losing every command source (stdin at EOF under a service manager)
    /// leaves a running timelapse alone; only `cancel` ends the controller.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Controller started");
        let mut sources_open = true;

        loop {
            tokio::select! {
                request = self.rx.recv(), if sources_open => match request {
                    Some(request) => self.handle(request).await,
                    None => {
                        tracing::info!("All command sources closed, running until shutdown");
                        sources_open = false;
                    }
                },
                _ = cancel.cancelled() => break,
            }
        }

        tracing::info!("Controller shutting down");
        self.scheduler.shutdown().await;
    }

    async fn handle(&self, request: ControlRequest) {
        let ControlRequest { command, reply } = request;
        tracing::debug!(?command, "Command received");

        let result = match command {
            Command::Start {
                interval_secs,
                duration_secs,
            } => self
                .scheduler
                .start(interval_secs, duration_secs)
                .await
                .map(Reply::Started)
                .map_err(ControlError::from),
            Command::Stop => self
                .scheduler
                .stop()
                .map(Reply::Stopping)
                .map_err(ControlError::from),
            Command::Status => Ok(Reply::Status(Box::new(self.status_report()))),
            Command::Help => Ok(Reply::Help),
            Command::Photo => {
                let scheduler = self.scheduler.clone();
                tokio::spawn(async move {
                    let result = scheduler
                        .photo()
                        .await
                        .map(Reply::Photo)
                        .map_err(ControlError::from);
                    let _ = reply.send(result);
                });
                return;
            }
        };

        if let Err(e) = &result {
            tracing::info!(?command, error = %e, "Command rejected");
        }
        // The requester may have given up waiting.
        let _ = reply.send(result);
    }

    fn status_report(&self) -> StatusReport {
        let run = self.scheduler.status();
        let thread = run.run_id.and_then(|id| self.notifier.thread_for(id));
        StatusReport {
            run,
            thread,
            health: self.health.borrow().clone(),
            notifications: self.notifier.stats(),
        }
    }
}
