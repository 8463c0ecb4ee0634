//! Timelapse capture agent.
//!
//! Wires the capture scheduler, health monitor, retention manager and
//! notification coordinator behind a single command [`controller`].

pub mod camera;
pub mod command_source;
pub mod config;
pub mod controller;
pub mod health;
pub mod retention;
pub mod scheduler;
pub mod vitals;
