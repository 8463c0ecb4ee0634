//! Health monitor: periodic vitals sampling with edge-triggered alerts.
//!
//! Runs on its own timer, independent of the capture tick. Each sample is
//! classified by an [`EdgeTracker`]; only threshold crossings become
//! notification intents, so a breach that persists across many samples is
//! reported once when it starts and once when it clears.

use std::sync::Arc;
use std::time::Duration;

use timelapse_core::health::{Edge, EdgeTracker, HealthSample, HealthThresholds, HealthTransition};
use timelapse_core::intent::{IntentPayload, NotificationIntent};
use timelapse_events::NotificationHandle;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::vitals::VitalsSource;

pub struct HealthMonitor {
    source: Arc<dyn VitalsSource>,
    thresholds: HealthThresholds,
    interval: Duration,
    notifier: NotificationHandle,
    tracker: EdgeTracker,
    latest: watch::Sender<Option<HealthSample>>,
}

impl HealthMonitor {
    pub fn new(
        source: Arc<dyn VitalsSource>,
        thresholds: HealthThresholds,
        interval: Duration,
        notifier: NotificationHandle,
    ) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            source,
            thresholds,
            interval,
            notifier,
            tracker: EdgeTracker::new(),
            latest,
        }
    }

    /// Most recent sample, for status reports.
    pub fn subscribe(&self) -> watch::Receiver<Option<HealthSample>> {
        self.latest.subscribe()
    }

    /// Take one sample and notify on any threshold crossing.
    ///
    /// A failed read is logged and skipped; breach state is left as it was.
    pub async fn sample(&mut self) -> Option<HealthSample> {
        let reading = match self.source.read().await {
            Ok(reading) => reading,
            Err(e) => {
                tracing::warn!(error = %e, "Health sample missed");
                return None;
            }
        };

        let (sample, transitions) = self.tracker.observe(&reading, &self.thresholds);
        tracing::debug!(
            temperature_celsius = ?sample.temperature_celsius,
            free_disk_bytes = ?sample.free_disk_bytes,
            breached = sample.breached.len(),
            "Health sample"
        );

        for transition in transitions {
            log_transition(&transition);
            self.notifier
                .enqueue(NotificationIntent::new(IntentPayload::HealthAlert(transition)));
        }

        self.latest.send_replace(Some(sample.clone()));
        Some(sample)
    }

    /// Sample on the configured interval until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Health monitor started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sample().await;
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Health monitor stopped");
                    break;
                }
            }
        }
    }
}

fn log_transition(transition: &HealthTransition) {
    let metric = transition.metric.as_str();
    let severity = transition.severity();
    match transition.edge {
        Edge::Breached => tracing::warn!(
            metric,
            severity,
            value = transition.value,
            threshold = transition.threshold,
            "Health threshold breached"
        ),
        Edge::Recovered => tracing::info!(
            metric,
            severity,
            value = transition.value,
            threshold = transition.threshold,
            "Health threshold recovered"
        ),
    }
}
