//! Timelapse domain logic.
//!
//! Everything in this crate is pure: no filesystem, network or clock
//! access beyond what callers pass in. It holds the run state machine,
//! capture contracts, health classification, retention policy evaluation,
//! notification intents and rate limiters, command parsing and the
//! configuration types shared by the agent and the notifier.

pub mod capture;
pub mod command;
pub mod config;
pub mod error;
pub mod health;
pub mod intent;
pub mod rate_limit;
pub mod retention;
pub mod run;
pub mod types;
