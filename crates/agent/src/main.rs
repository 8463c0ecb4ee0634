//! `timelapse-agent` -- periodic still capture with chat notifications.
//!
//! Takes a photo every `interval` for `duration`, posts start, progress,
//! photo and stop messages into one chat thread, watches SoC temperature
//! and free disk space, and prunes old images. Commands are read one per
//! line from stdin:
//!
//! ```text
//! start 60s 30m
//! status
//! photo
//! stop
//! help
//! ```
//!
//! Configuration comes from environment variables (and `.env`); see
//! [`timelapse_agent::config`] for the full table.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use timelapse_agent::camera::StillCamera;
use timelapse_agent::command_source;
use timelapse_agent::config::{AgentConfig, LogFormat};
use timelapse_agent::controller::Controller;
use timelapse_agent::health::HealthMonitor;
use timelapse_agent::retention::RetentionManager;
use timelapse_agent::scheduler::CaptureScheduler;
use timelapse_agent::vitals::SysfsVitals;
use timelapse_events::{
    LogTransport, NotificationCoordinator, NotificationTransport, SlackTransport,
};

/// Grace period for background loops after cancellation.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on delivering queued notifications at shutdown.
const NOTIFY_DRAIN_TIMEOUT: Duration = Duration::from_secs(20);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = AgentConfig::from_env();
    let log_format = config
        .as_ref()
        .map(|c| c.log_format)
        .unwrap_or(LogFormat::Text);
    init_tracing(log_format);

    let config = config.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        output_dir = %config.scheduler.output_dir.display(),
        camera = %config.camera_command,
        slack = config.notify.slack.is_some(),
        "Starting timelapse-agent"
    );

    if let Err(e) = tokio::fs::create_dir_all(&config.scheduler.output_dir).await {
        tracing::warn!(
            path = %config.scheduler.output_dir.display(),
            error = %e,
            "Output directory not available yet"
        );
    }

    // --- Notifications ---
    let transport: Arc<dyn NotificationTransport> = match &config.notify.slack {
        Some(slack) => match SlackTransport::new(slack.clone()) {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                tracing::error!(error = %e, "Failed to build Slack client");
                std::process::exit(1);
            }
        },
        None => {
            tracing::info!("SLACK_BOT_TOKEN not set, notifications will be logged");
            Arc::new(LogTransport::new())
        }
    };
    let coordinator = NotificationCoordinator::new(
        transport,
        config.notify.retry.clone(),
        config.notify.queue_capacity,
        config.notify.toggles,
    );
    let notifier = coordinator.handle();
    // Cancelled last, so stop messages emitted during shutdown still go out.
    let notify_cancel = CancellationToken::new();
    let coordinator_handle = tokio::spawn(coordinator.run(notify_cancel.clone()));

    // --- Capture ---
    let cancel = CancellationToken::new();
    let retention_trigger = Arc::new(Notify::new());
    let scheduler = CaptureScheduler::new(
        config.scheduler.clone(),
        Arc::new(StillCamera::new(config.camera_command.clone())),
        notifier.clone(),
        config
            .retention
            .after_capture
            .then(|| Arc::clone(&retention_trigger)),
    )
    .unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid capture configuration");
        std::process::exit(1);
    });

    // --- Health ---
    let vitals = Arc::new(SysfsVitals::new(
        config.health.thermal_zone.clone(),
        config.scheduler.output_dir.clone(),
    ));
    let health = HealthMonitor::new(
        vitals,
        config.health.thresholds.clone(),
        config.health.interval,
        notifier.clone(),
    );
    let health_rx = health.subscribe();
    let health_handle = tokio::spawn(health.run(cancel.clone()));

    // --- Retention ---
    let retention = RetentionManager::new(
        config.scheduler.output_dir.clone(),
        config.retention.policy.clone(),
        scheduler.in_flight(),
    );
    let retention_handle = tokio::spawn(retention.run(
        config.retention.interval,
        retention_trigger,
        cancel.clone(),
    ));

    // --- Controller ---
    let (controller, handle) = Controller::new(scheduler, notifier.clone(), health_rx);
    let controller_handle = tokio::spawn(controller.run(cancel.clone()));

    if let Some(plan) = config.autostart {
        match handle.start(plan.interval_secs, plan.duration_secs).await {
            Ok(run) => tracing::info!(run_id = ?run.run_id, "Auto-started timelapse"),
            Err(e) => tracing::error!(error = %e, "Auto-start failed"),
        }
    }

    tokio::spawn(command_source::serve_stdio(handle.clone(), cancel.clone()));

    shutdown_signal().await;

    // --- Shutdown ---
    cancel.cancel();
    drop(handle);

    // Waits for an in-flight capture, which is bounded by its own timeout.
    let controller_timeout = config.scheduler.capture_timeout + TASK_SHUTDOWN_TIMEOUT;
    if tokio::time::timeout(controller_timeout, controller_handle).await.is_err() {
        tracing::warn!("Controller did not stop in time");
    }
    let _ = tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, health_handle).await;
    let _ = tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, retention_handle).await;
    tracing::info!("Capture, health and retention stopped");

    notify_cancel.cancel();
    match tokio::time::timeout(NOTIFY_DRAIN_TIMEOUT, coordinator_handle).await {
        Ok(_) => tracing::info!("Notification queue drained"),
        Err(_) => tracing::warn!(
            pending = notifier.stats().pending,
            "Notification queue not drained before timeout"
        ),
    }

    tracing::info!("Graceful shutdown complete");
    // A pending stdin read parks a blocking thread that runtime shutdown
    // would otherwise wait on.
    std::process::exit(0);
}

fn init_tracing(format: LogFormat) {
    let json = format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "timelapse_agent=info,timelapse_events=info,timelapse_core=info".into()
            }),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
