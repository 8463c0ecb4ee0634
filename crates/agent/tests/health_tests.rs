mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{count_containing, free_disk, temperature, FakeCamera, Harness, ScriptedVitals};
use timelapse_agent::health::HealthMonitor;
use timelapse_core::health::{HealthMetric, HealthThresholds};
use tokio_util::sync::CancellationToken;

fn monitor(h: &Harness, readings: Vec<Option<timelapse_core::health::HealthReading>>) -> HealthMonitor {
    HealthMonitor::new(
        Arc::new(ScriptedVitals::new(readings)),
        HealthThresholds {
            max_temperature_celsius: 80.0,
            temperature_recovery_margin: 2.0,
            min_free_disk_bytes: 100 * 1024 * 1024,
        },
        Duration::from_secs(30),
        h.notifier.clone(),
    )
}

#[tokio::test]
async fn sustained_breach_alerts_once_and_recovers_once() {
    let mut h = Harness::new(FakeCamera::new());
    let temps = [70.0, 85.0, 86.0, 90.0, 79.0, 77.0, 76.0];
    let mut m = monitor(&h, temps.into_iter().map(temperature).collect());

    for _ in temps {
        m.sample().await.unwrap();
    }

    let sent = h.deliver().await;
    assert_eq!(sent.len(), 2);
    assert!(sent[0].text.contains("High temperature"));
    assert!(sent[0].text.contains("85.0°C"));
    assert!(sent[1].text.contains("Temperature back to normal"));
    assert!(sent[1].text.contains("77.0°C"));
    assert!(sent.iter().all(|s| s.thread.is_none()));
}

#[tokio::test]
async fn missed_sample_keeps_breach_state() {
    let mut h = Harness::new(FakeCamera::new());
    let mut m = monitor(&h, vec![temperature(85.0), None, temperature(86.0)]);

    assert!(m.sample().await.unwrap().breached.contains(&HealthMetric::Temperature));
    assert!(m.sample().await.is_none());
    assert!(m.sample().await.unwrap().breached.contains(&HealthMetric::Temperature));

    let sent = h.deliver().await;
    assert_eq!(count_containing(&sent, "High temperature"), 1);
}

#[tokio::test]
async fn low_disk_is_reported_on_each_edge() {
    let mut h = Harness::new(FakeCamera::new());
    let mb = 1024 * 1024;
    let mut m = monitor(
        &h,
        vec![free_disk(50 * mb), free_disk(40 * mb), free_disk(500 * mb), free_disk(50 * mb)],
    );

    for _ in 0..4 {
        m.sample().await.unwrap();
    }

    let sent = h.deliver().await;
    assert_eq!(count_containing(&sent, "Low disk space"), 2);
    assert_eq!(count_containing(&sent, "Disk space recovered"), 1);
}

#[tokio::test]
async fn subscribers_see_the_latest_sample() {
    let h = Harness::new(FakeCamera::new());
    let mut m = monitor(&h, vec![temperature(55.0)]);
    let rx = m.subscribe();
    assert!(rx.borrow().is_none());

    m.sample().await.unwrap();
    let latest = rx.borrow().clone().unwrap();
    assert_eq!(latest.temperature_celsius, Some(55.0));
    assert!(latest.is_healthy());
}

#[tokio::test(start_paused = true)]
async fn run_samples_until_cancelled() {
    let mut h = Harness::new(FakeCamera::new());
    let m = monitor(&h, vec![temperature(70.0), temperature(85.0), temperature(85.0)]);
    let rx = m.subscribe();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(m.run(cancel.clone()));

    // Ticks at 0s, 30s and 60s.
    tokio::time::sleep(Duration::from_secs(65)).await;
    cancel.cancel();
    task.await.unwrap();

    assert_eq!(rx.borrow().as_ref().unwrap().temperature_celsius, Some(85.0));
    let sent = h.deliver().await;
    assert_eq!(count_containing(&sent, "High temperature"), 1);
}
