//! Fakes and wiring shared by the agent integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use timelapse_agent::scheduler::CaptureScheduler;
use timelapse_agent::vitals::{VitalsError, VitalsSource};
use timelapse_core::capture::{CaptureDevice, CaptureSettings};
use timelapse_core::config::{NotificationCadence, NotificationToggles, SchedulerConfig};
use timelapse_core::error::CaptureError;
use timelapse_core::health::HealthReading;
use timelapse_core::intent::{MessageRef, ThreadRef};
use timelapse_events::{
    FileRef, FileUpload, NotificationCoordinator, NotificationHandle, NotificationTransport,
    RetryPolicy, TransportError,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Camera
// ---------------------------------------------------------------------------

/// Scripted capture device. Call numbers are 1-based.
#[derive(Default)]
pub struct FakeCamera {
    calls: AtomicU64,
    starts: Mutex<Vec<tokio::time::Instant>>,
    widths: Mutex<Vec<u32>>,
    fail_on: Vec<u64>,
    unavailable_from: Option<u64>,
    delay: Duration,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(calls: &[u64]) -> Self {
        Self {
            fail_on: calls.to_vec(),
            ..Self::default()
        }
    }

    pub fn unavailable_from(call: u64) -> Self {
        Self {
            unavailable_from: Some(call),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// When each call began, in call order.
    pub fn starts(&self) -> Vec<tokio::time::Instant> {
        self.starts.lock().unwrap().clone()
    }

    /// Requested image width of each call.
    pub fn widths(&self) -> Vec<u32> {
        self.widths.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaptureDevice for FakeCamera {
    async fn capture(
        &self,
        settings: &CaptureSettings,
        target: &Path,
    ) -> Result<PathBuf, CaptureError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.starts.lock().unwrap().push(tokio::time::Instant::now());
        self.widths.lock().unwrap().push(settings.width);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.unavailable_from.is_some_and(|from| call >= from) {
            return Err(CaptureError::DeviceUnavailable("no cameras available".into()));
        }
        if self.fail_on.contains(&call) {
            return Err(CaptureError::Failed(format!("exit status 1 on call {call}")));
        }
        std::fs::write(target, b"jpeg")?;
        Ok(target.to_path_buf())
    }
}

// ---------------------------------------------------------------------------
// Vitals
// ---------------------------------------------------------------------------

/// Replays a fixed list of readings, then reports the sensors as gone.
#[derive(Default)]
pub struct ScriptedVitals {
    readings: Mutex<VecDeque<Option<HealthReading>>>,
}

impl ScriptedVitals {
    /// `None` entries simulate a failed read.
    pub fn new(readings: impl IntoIterator<Item = Option<HealthReading>>) -> Self {
        Self {
            readings: Mutex::new(readings.into_iter().collect()),
        }
    }
}

#[async_trait]
impl VitalsSource for ScriptedVitals {
    async fn read(&self) -> Result<HealthReading, VitalsError> {
        self.readings
            .lock()
            .unwrap()
            .pop_front()
            .flatten()
            .ok_or(VitalsError::Unavailable)
    }
}

pub fn temperature(celsius: f64) -> Option<HealthReading> {
    Some(HealthReading {
        temperature_celsius: Some(celsius),
        free_disk_bytes: Some(10 * 1024 * 1024 * 1024),
        timestamp: chrono::Utc::now(),
    })
}

pub fn free_disk(bytes: u64) -> Option<HealthReading> {
    Some(HealthReading {
        temperature_celsius: Some(45.0),
        free_disk_bytes: Some(bytes),
        timestamp: chrono::Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Sent {
    pub text: String,
    pub thread: Option<ThreadRef>,
    pub upload: bool,
    pub reference: String,
}

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    counter: AtomicU64,
    attempts: AtomicU64,
    down: bool,
}

impl RecordingTransport {
    /// A transport whose every call fails with a retryable error.
    pub fn down() -> Self {
        Self {
            down: true,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, text: &str, thread: Option<&ThreadRef>, upload: bool) -> String {
        let reference = format!("1700000000.{:04}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        self.sent.lock().unwrap().push(Sent {
            text: text.to_string(),
            thread: thread.cloned(),
            upload,
            reference: reference.clone(),
        });
        reference
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send_message(
        &self,
        text: &str,
        thread: Option<&ThreadRef>,
    ) -> Result<MessageRef, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.down {
            return Err(TransportError::HttpStatus(503));
        }
        Ok(MessageRef(self.record(text, thread, false)))
    }

    async fn upload_file(
        &self,
        upload: &FileUpload,
        thread: Option<&ThreadRef>,
    ) -> Result<FileRef, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.down {
            return Err(TransportError::HttpStatus(503));
        }
        Ok(FileRef(self.record(&upload.comment, thread, true)))
    }
}

pub fn count_containing(sent: &[Sent], needle: &str) -> usize {
    sent.iter().filter(|s| s.text.contains(needle)).count()
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub fn test_config(output_dir: PathBuf) -> SchedulerConfig {
    SchedulerConfig {
        output_dir,
        filename_prefix: "timelapse_".into(),
        capture: CaptureSettings::default(),
        preview: None,
        capture_timeout: Duration::from_secs(5),
        cadence: NotificationCadence {
            progress_every: 10,
            photo_every: 5,
            photo_min_interval: Duration::from_secs(120),
            error_window: Duration::from_secs(300),
        },
    }
}

/// A scheduler wired to a recording transport through a real coordinator.
pub struct Harness {
    pub scheduler: CaptureScheduler,
    pub camera: Arc<FakeCamera>,
    pub notifier: NotificationHandle,
    pub transport: Arc<RecordingTransport>,
    pub retention_trigger: Arc<Notify>,
    pub dir: tempfile::TempDir,
    coordinator: Option<NotificationCoordinator>,
}

impl Harness {
    pub fn new(camera: FakeCamera) -> Self {
        Self::with_config(camera, |_| {})
    }

    pub fn with_config(camera: FakeCamera, tweak: impl FnOnce(&mut SchedulerConfig)) -> Self {
        Self::with_transport(camera, RecordingTransport::default(), tweak)
    }

    pub fn with_transport(
        camera: FakeCamera,
        transport: RecordingTransport,
        tweak: impl FnOnce(&mut SchedulerConfig),
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path().join("out"));
        tweak(&mut config);

        let transport = Arc::new(transport);
        let coordinator = NotificationCoordinator::new(
            transport.clone(),
            RetryPolicy::default(),
            64,
            NotificationToggles::default(),
        );
        let notifier = coordinator.handle();
        let camera = Arc::new(camera);
        let retention_trigger = Arc::new(Notify::new());
        let scheduler = CaptureScheduler::new(
            config,
            camera.clone(),
            notifier.clone(),
            Some(retention_trigger.clone()),
        )
        .unwrap();

        Self {
            scheduler,
            camera,
            notifier,
            transport,
            retention_trigger,
            dir,
            coordinator: Some(coordinator),
        }
    }

    /// Take the coordinator to run it in the background.
    pub fn take_coordinator(&mut self) -> NotificationCoordinator {
        self.coordinator.take().expect("coordinator already taken")
    }

    /// Deliver everything enqueued so far and return what the transport saw.
    pub async fn deliver(&mut self) -> Vec<Sent> {
        let coordinator = self.take_coordinator();
        self.notifier.close();
        coordinator.run(CancellationToken::new()).await;
        self.transport.sent()
    }
}
