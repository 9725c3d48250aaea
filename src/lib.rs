//! HomeWatch - a home-automation bridge daemon
//!
//! This library bridges an MQTT message bus, a periodically polled metering
//! endpoint, a local SQLite sink and an email alert channel inside one
//! supervised process.

pub mod alert;
pub mod bus;
pub mod cli;
pub mod config;
pub mod core;
pub mod db;
pub mod listener;
pub mod mailer;
pub mod metering;
pub mod poller;
pub mod supervisor;

pub mod app;

// Re-export the lifecycle entry points for convenience
pub use app::{App, AppBuilder};
