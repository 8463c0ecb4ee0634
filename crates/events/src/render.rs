//! Turning intents into transport payloads.
//!
//! Rendering is pure: the coordinator decides what to do with the result
//! (send text, or read the file and upload it).

use std::path::PathBuf;
use std::time::Duration;

use timelapse_core::health::{Edge, HealthMetric, HealthTransition};
use timelapse_core::intent::{IntentPayload, NotificationIntent};
use timelapse_core::retention::format_bytes;
use timelapse_core::run::StopReason;

/// Width of the progress bar, in cells.
pub const PROGRESS_BAR_WIDTH: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Text(String),
    Upload {
        path: PathBuf,
        filename: String,
        comment: String,
    },
}

pub fn render(intent: &NotificationIntent) -> Rendered {
    match &intent.payload {
        IntentPayload::Start {
            interval_secs,
            duration_secs,
            output_dir,
        } => Rendered::Text(format!(
            "🎬 *Timelapse started*\n\
             • Interval: {}\n\
             • Duration: {}\n\
             • Expected images: {}\n\
             • Output: `{}`",
            format_duration(Duration::from_secs(*interval_secs)),
            format_duration(Duration::from_secs(*duration_secs)),
            duration_secs / (*interval_secs).max(1),
            output_dir.display(),
        )),

        IntentPayload::Progress {
            image_count,
            failed_captures,
            elapsed,
            remaining,
        } => {
            let total = *elapsed + *remaining;
            let percent = if total.is_zero() {
                0.0
            } else {
                elapsed.as_secs_f64() / total.as_secs_f64() * 100.0
            };
            let mut text = format!(
                "📊 *Timelapse progress*\n\
                 `{}` {percent:.1}%\n\
                 • Images: {image_count}\n\
                 • Elapsed: {}\n\
                 • Remaining: {}",
                progress_bar(percent, PROGRESS_BAR_WIDTH),
                format_duration(*elapsed),
                format_duration(*remaining),
            );
            if *failed_captures > 0 {
                text.push_str(&format!("\n• Failed captures: {failed_captures}"));
            }
            Rendered::Text(text)
        }

        IntentPayload::Photo {
            path,
            sequence,
            captured_at,
            ..
        } => {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let header = match sequence {
                Some(n) => format!("📸 *Timelapse image #{n}*"),
                None => "📸 *Photo*".to_string(),
            };
            Rendered::Upload {
                path: path.clone(),
                filename,
                comment: format!(
                    "{header}\n• Taken: {}",
                    captured_at.format("%Y-%m-%d %H:%M:%S UTC")
                ),
            }
        }

        IntentPayload::Stop {
            image_count,
            failed_captures,
            elapsed,
            reason,
        } => {
            let title = match reason {
                StopReason::Completed => "✅ *Timelapse completed*",
                StopReason::Requested => "⏹️ *Timelapse stopped*",
                StopReason::Shutdown => "⏹️ *Timelapse stopped (agent shutting down)*",
            };
            let mut text = format!(
                "{title}\n\
                 • Images: {image_count}\n\
                 • Duration: {}",
                format_duration(*elapsed),
            );
            if *image_count > 0 {
                let average = elapsed.as_secs_f64() / *image_count as f64;
                text.push_str(&format!("\n• Average interval: {average:.1}s"));
            }
            if *failed_captures > 0 {
                text.push_str(&format!("\n• Failed captures: {failed_captures}"));
            }
            Rendered::Text(text)
        }

        IntentPayload::HealthAlert(transition) => Rendered::Text(health_text(transition)),

        IntentPayload::Error {
            message,
            fatal,
            suppressed,
        } => {
            let mut text = if *fatal {
                format!("🛑 *Timelapse failed*\n{message}")
            } else {
                format!("⚠️ *Capture error*\n{message}")
            };
            if *suppressed > 0 {
                text.push_str(&format!(
                    "\n• {suppressed} more error(s) since the last report"
                ));
            }
            Rendered::Text(text)
        }
    }
}

fn health_text(transition: &HealthTransition) -> String {
    match (transition.metric, transition.edge) {
        (HealthMetric::Temperature, Edge::Breached) => format!(
            "🌡️ *High temperature*\n• CPU: {:.1}°C\n• Threshold: {:.1}°C",
            transition.value, transition.threshold
        ),
        (HealthMetric::Temperature, Edge::Recovered) => format!(
            "🌡️ *Temperature back to normal*\n• CPU: {:.1}°C",
            transition.value
        ),
        (HealthMetric::Disk, Edge::Breached) => format!(
            "💾 *Low disk space*\n• Free: {}\n• Threshold: {}",
            format_bytes(transition.value as u64),
            format_bytes(transition.threshold as u64)
        ),
        (HealthMetric::Disk, Edge::Recovered) => format!(
            "💾 *Disk space recovered*\n• Free: {}",
            format_bytes(transition.value as u64)
        ),
    }
}

/// Text sent in place of a photo that could not be uploaded.
pub fn photo_fallback_text(comment: &str, filename: &str, size_bytes: Option<u64>) -> String {
    match size_bytes {
        Some(size) => format!("{comment}\n• File: `{filename}` ({})", format_bytes(size)),
        None => format!("{comment}\n• File: `{filename}`"),
    }
}

/// Fixed-width bar such as `██████░░░░░░░░░░░░░░`.
pub fn progress_bar(percent: f64, width: usize) -> String {
    let clamped = percent.clamp(0.0, 100.0);
    let filled = ((clamped / 100.0) * width as f64) as usize;
    let mut bar = "█".repeat(filled);
    bar.push_str(&"░".repeat(width - filled));
    bar
}

/// `1h 02m 03s`, `4m 05s`, `9s`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}
