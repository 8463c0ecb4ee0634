//! Typed controller commands and the text syntax used to issue them.
//!
//! ```text
//! photo
//! status
//! start 60s 30m      interval, then duration with an optional s/m/h unit
//! stop
//! help
//! ```
//!
//! A leading mention (`@bot`, `<@U123>`) is ignored so chat messages can be
//! fed straight in.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// A request delivered by the command source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    Start {
        interval_secs: u64,
        duration_secs: u64,
    },
    Stop,
    Status,
    Photo,
    Help,
}

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:<@[^>]+>|@\S+)\s*").expect("valid mention regex"));

static START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^start\s+(\d+)s?\s+(\d+)([smh])?$").expect("valid start regex")
});

/// Parse a line of text into a [`Command`].
///
/// Returns `None` for anything that is not a recognised command, including
/// numbers too large to represent.
pub fn parse_command(text: &str) -> Option<Command> {
    let lowered = text.to_lowercase();
    let body = MENTION.replace(&lowered, "");
    let body = body.trim();

    match body {
        "photo" => return Some(Command::Photo),
        "status" => return Some(Command::Status),
        "stop" => return Some(Command::Stop),
        "help" => return Some(Command::Help),
        _ => {}
    }

    let caps = START.captures(body)?;
    let interval_secs: u64 = caps[1].parse().ok()?;
    let duration: u64 = caps[2].parse().ok()?;
    let multiplier = match caps.get(3).map(|m| m.as_str()) {
        Some("m") => 60,
        Some("h") => 3600,
        _ => 1,
    };

    Some(Command::Start {
        interval_secs,
        duration_secs: duration.checked_mul(multiplier)?,
    })
}

/// Usage text returned by the `help` command.
pub const HELP_TEXT: &str = "\
Timelapse commands
  photo              take a single photo
  status             show run and system status
  start 60s 30m      start a timelapse (interval, duration in s/m/h)
  stop               stop the current timelapse
  help               show this message

Examples
  start 30s 1h       a photo every 30 seconds for one hour
  start 5s 10m       a photo every 5 seconds for ten minutes";
