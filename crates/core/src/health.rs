//! System vitals classification and breach edge detection.
//!
//! Pure logic. The agent reads the sensors and feeds [`HealthReading`]s
//! into an [`EdgeTracker`], which turns them into [`HealthSample`]s and
//! reports a [`HealthTransition`] only when a threshold is newly breached
//! or newly recovered.

use std::collections::BTreeSet;

use serde::Serialize;
use validator::Validate;

use crate::types::Timestamp;

/// A monitored vital.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthMetric {
    Temperature,
    Disk,
}

impl HealthMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthMetric::Temperature => "temperature",
            HealthMetric::Disk => "disk",
        }
    }
}

/// Alert thresholds for the health monitor.
#[derive(Debug, Clone, PartialEq, Validate, Serialize)]
pub struct HealthThresholds {
    /// CPU temperature above which the system is considered too hot.
    #[validate(range(min = 0.0, max = 150.0))]
    pub max_temperature_celsius: f64,
    /// A temperature breach clears only once the reading drops this far
    /// below `max_temperature_celsius`.
    #[validate(range(min = 0.0, max = 50.0))]
    pub temperature_recovery_margin: f64,
    /// Free space on the output filesystem below which disk is low.
    pub min_free_disk_bytes: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_temperature_celsius: 80.0,
            temperature_recovery_margin: 2.0,
            min_free_disk_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Raw sensor values. A `None` field means that sensor could not be read.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReading {
    pub temperature_celsius: Option<f64>,
    pub free_disk_bytes: Option<u64>,
    pub timestamp: Timestamp,
}

/// One classified health sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSample {
    pub temperature_celsius: Option<f64>,
    pub free_disk_bytes: Option<u64>,
    pub timestamp: Timestamp,
    /// Thresholds in breach after this sample (hysteresis applied).
    pub breached: BTreeSet<HealthMetric>,
}

impl HealthSample {
    pub fn is_healthy(&self) -> bool {
        self.breached.is_empty()
    }
}

/// Direction of a threshold crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    /// normal -> breached
    Breached,
    /// breached -> normal
    Recovered,
}

/// A threshold crossing worth notifying about.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthTransition {
    pub metric: HealthMetric,
    pub edge: Edge,
    /// Observed value: degrees Celsius or free bytes.
    pub value: f64,
    /// The threshold that was crossed, in the same unit as `value`.
    pub threshold: f64,
    pub timestamp: Timestamp,
}

impl HealthTransition {
    /// Log severity for this transition.
    pub fn severity(&self) -> &'static str {
        match self.edge {
            Edge::Breached => "warning",
            Edge::Recovered => "info",
        }
    }
}

/// Remembers which thresholds are currently breached so that alerts fire
/// once per crossing instead of on every sample.
#[derive(Debug, Default)]
pub struct EdgeTracker {
    active: BTreeSet<HealthMetric>,
}

impl EdgeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Thresholds currently in breach.
    pub fn active(&self) -> &BTreeSet<HealthMetric> {
        &self.active
    }

    /// Classify a reading and return the sample plus any edges it crossed.
    ///
    /// A sensor that could not be read keeps its previous state.
    pub fn observe(
        &mut self,
        reading: &HealthReading,
        thresholds: &HealthThresholds,
    ) -> (HealthSample, Vec<HealthTransition>) {
        let mut transitions = Vec::new();

        if let Some(temp) = reading.temperature_celsius {
            let was_breached = self.active.contains(&HealthMetric::Temperature);
            let limit = thresholds.max_temperature_celsius;
            let clear_below = limit - thresholds.temperature_recovery_margin;

            let breached = if was_breached {
                temp > clear_below
            } else {
                temp > limit
            };
            let threshold = if was_breached { clear_below } else { limit };

            self.apply(
                HealthMetric::Temperature,
                was_breached,
                breached,
                temp,
                threshold,
                reading.timestamp,
                &mut transitions,
            );
        }

        if let Some(free) = reading.free_disk_bytes {
            let was_breached = self.active.contains(&HealthMetric::Disk);
            let breached = free < thresholds.min_free_disk_bytes;

            self.apply(
                HealthMetric::Disk,
                was_breached,
                breached,
                free as f64,
                thresholds.min_free_disk_bytes as f64,
                reading.timestamp,
                &mut transitions,
            );
        }

        let sample = HealthSample {
            temperature_celsius: reading.temperature_celsius,
            free_disk_bytes: reading.free_disk_bytes,
            timestamp: reading.timestamp,
            breached: self.active.clone(),
        };

        (sample, transitions)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply(
        &mut self,
        metric: HealthMetric,
        was_breached: bool,
        breached: bool,
        value: f64,
        threshold: f64,
        timestamp: Timestamp,
        transitions: &mut Vec<HealthTransition>,
    ) {
        let edge = match (was_breached, breached) {
            (false, true) => {
                self.active.insert(metric);
                Edge::Breached
            }
            (true, false) => {
                self.active.remove(&metric);
                Edge::Recovered
            }
            _ => return,
        };

        transitions.push(HealthTransition {
            metric,
            edge,
            value,
            threshold,
            timestamp,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
