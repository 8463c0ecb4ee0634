mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{count_containing, temperature, FakeCamera, Harness, ScriptedVitals};
use timelapse_agent::command_source::serve;
use timelapse_agent::controller::{ControlError, Controller, ControllerHandle};
use timelapse_agent::health::HealthMonitor;
use timelapse_core::error::{CommandRejected, ConfigurationError};
use timelapse_core::health::HealthThresholds;
use timelapse_core::intent::ThreadRef;
use timelapse_core::run::{RunStatus, StopReason};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Running {
    handle: ControllerHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

fn spawn_controller(h: &Harness) -> Running {
    let (_tx, health) = tokio::sync::watch::channel(None);
    let (controller, handle) =
        Controller::new(h.scheduler.clone(), h.notifier.clone(), health);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(controller.run(cancel.clone()));
    Running {
        handle,
        cancel,
        task,
    }
}

#[tokio::test(start_paused = true)]
async fn commands_are_applied_in_order() {
    let h = Harness::new(FakeCamera::new());
    let c = spawn_controller(&h);

    let run = c.handle.start(5, 20).await.unwrap();
    assert_eq!(run.status, RunStatus::Running);

    assert_matches!(
        c.handle.start(5, 20).await,
        Err(ControlError::Rejected(CommandRejected::AlreadyRunning))
    );

    let report = c.handle.status().await.unwrap();
    assert_eq!(report.run.status, RunStatus::Running);
    assert_eq!(report.run.run_id, run.run_id);

    let stopping = c.handle.stop().await.unwrap();
    assert_eq!(stopping.status, RunStatus::Stopping);
    assert_matches!(
        c.handle.stop().await,
        Err(ControlError::Rejected(CommandRejected::TransitionInProgress))
    );

    h.scheduler.join().await;
    assert_matches!(
        c.handle.stop().await,
        Err(ControlError::Rejected(CommandRejected::NotRunning))
    );

    c.cancel.cancel();
    c.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn invalid_start_is_reported_as_configuration() {
    let h = Harness::new(FakeCamera::new());
    let c = spawn_controller(&h);

    assert_matches!(
        c.handle.start(0, 60).await,
        Err(ControlError::Configuration(ConfigurationError::InvalidInterval(0)))
    );

    c.cancel.cancel();
    c.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn status_carries_the_run_thread_once_started() {
    let mut h = Harness::new(FakeCamera::new());
    let coordinator = h.take_coordinator();
    let notify_cancel = CancellationToken::new();
    let delivery = tokio::spawn(coordinator.run(notify_cancel.clone()));
    let c = spawn_controller(&h);

    c.handle.start(5, 60).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let report = c.handle.status().await.unwrap();
    let start_ref = h.transport.sent()[0].reference.clone();
    assert_eq!(report.thread, Some(ThreadRef(start_ref)));
    assert_eq!(report.notifications.delivered, 1);
    assert!(report.to_string().contains("Status: running"));

    c.cancel.cancel();
    c.task.await.unwrap();
    notify_cancel.cancel();
    delivery.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn photo_runs_beside_an_active_run() {
    let h = Harness::new(FakeCamera::new());
    let c = spawn_controller(&h);

    c.handle.start(5, 60).await.unwrap();
    let path = c.handle.photo().await.unwrap();
    assert!(path.exists());

    let report = c.handle.status().await.unwrap();
    assert_eq!(report.run.status, RunStatus::Running);
    assert_eq!(report.run.image_count, 1);

    c.cancel.cancel();
    c.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_controller_stops_the_run() {
    let mut h = Harness::new(FakeCamera::new());
    let c = spawn_controller(&h);

    c.handle.start(5, 60).await.unwrap();
    tokio::time::sleep(Duration::from_secs(7)).await;
    c.cancel.cancel();
    c.task.await.unwrap();

    let status = h.scheduler.status();
    assert_eq!(status.status, RunStatus::Stopped);
    assert_eq!(status.stop_reason, Some(StopReason::Shutdown));
    assert_matches!(c.handle.status().await, Err(ControlError::Unavailable));

    let sent = h.deliver().await;
    assert_eq!(count_containing(&sent, "agent shutting down"), 1);
}

#[tokio::test(start_paused = true)]
async fn status_includes_the_latest_health_sample() {
    let h = Harness::new(FakeCamera::new());
    let mut monitor = HealthMonitor::new(
        Arc::new(ScriptedVitals::new([temperature(85.0)])),
        HealthThresholds::default(),
        Duration::from_secs(30),
        h.notifier.clone(),
    );
    let (controller, handle) =
        Controller::new(h.scheduler.clone(), h.notifier.clone(), monitor.subscribe());
    let cancel = CancellationToken::new();
    let task = tokio::spawn(controller.run(cancel.clone()));

    let before = handle.status().await.unwrap();
    assert!(before.health.is_none());
    assert!(before.to_string().contains("Health: no sample yet"));

    monitor.sample().await.unwrap();
    let after = handle.status().await.unwrap();
    let text = after.to_string();
    assert!(text.contains("85.0°C"), "{text}");
    assert!(text.contains("Health warnings: temperature"), "{text}");

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn line_source_replies_to_each_command() {
    let h = Harness::new(FakeCamera::new());
    let c = spawn_controller(&h);

    let input = b"help\n\nbogus\nstatus\nstop\nstart 0 10\n";
    let mut output = Vec::new();
    serve(&input[..], &mut output, c.handle.clone(), CancellationToken::new())
        .await
        .unwrap();

    let output = String::from_utf8(output).unwrap();
    assert!(output.contains("Timelapse commands"));
    assert!(output.contains("Unknown command"));
    assert!(output.contains("Status: idle"));
    assert!(output.contains("Error: No timelapse is running"));
    assert!(output.contains("Error: Interval must be at least 1 second"));

    c.cancel.cancel();
    c.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn closed_input_leaves_a_running_timelapse_alone() {
    let h = Harness::new(FakeCamera::new());
    let c = spawn_controller(&h);

    c.handle.start(5, 3600).await.unwrap();
    // The only handle goes to a source that is already at EOF.
    serve(
        tokio::io::BufReader::new(tokio::io::empty()),
        tokio::io::sink(),
        c.handle,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_secs(32)).await;

    let status = h.scheduler.status();
    assert_eq!(status.status, RunStatus::Running);
    assert_eq!(status.image_count, 7);
    assert!(!c.task.is_finished());

    c.cancel.cancel();
    c.task.await.unwrap();
    assert_eq!(h.scheduler.status().stop_reason, Some(StopReason::Shutdown));
}

#[tokio::test(start_paused = true)]
async fn line_source_starts_a_run() {
    let h = Harness::new(FakeCamera::new());
    let c = spawn_controller(&h);

    let mut output = Vec::new();
    serve(&b"@bot start 10s 1m\n"[..], &mut output, c.handle.clone(), CancellationToken::new())
        .await
        .unwrap();

    let output = String::from_utf8(output).unwrap();
    assert!(output.starts_with("Timelapse started"), "{output}");
    assert!(output.contains("(6 expected)"), "{output}");
    assert_eq!(h.scheduler.status().status, RunStatus::Running);

    c.cancel.cancel();
    c.task.await.unwrap();
}
