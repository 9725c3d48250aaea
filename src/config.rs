//! Configuration management for HomeWatch
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to layer defaults under a TOML file, environment variables and
//! command-line overrides. Secrets (SMTP credentials, mail addresses) are
//! expected from the environment, e.g. `HOMEWATCH_SMTP__PASSWORD`.

use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cli::Cli;

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Logging filter directive, e.g. `"info"` or
    /// `"info,homewatch::listener=debug"`.
    pub log_level: String,
    /// The message bus broker.
    pub mqtt: MqttConfig,
    /// The metering HTTP endpoint.
    pub meter: MeterConfig,
    /// The local persistence sink.
    pub database: DatabaseConfig,
    /// The outbound mail relay.
    pub smtp: SmtpConfig,
    /// Alert mail addressing.
    pub mail: MailConfig,
    /// Poll periods, in seconds.
    pub periodicity: PeriodicityConfig,
    /// The apparent power alert rule.
    pub power_alert: PowerAlertConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    pub hostname: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MeterConfig {
    pub hostname: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SmtpConfig {
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MailConfig {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PeriodicityConfig {
    /// Energy meter poll period, in seconds.
    pub energy: u64,
    /// Barometer poll period, in seconds.
    pub pressure: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PowerAlertConfig {
    /// Apparent power threshold, in VA.
    pub threshold: i64,
    /// Daily check time, `HH:MM` local.
    pub check_time: String,
}

impl Config {
    /// Loads the application configuration by layering sources: defaults,
    /// the TOML file named by the CLI, environment variables, CLI
    /// overrides.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            // Allow overriding with environment variables,
            // e.g. HOMEWATCH_SMTP__USERNAME=alice
            .merge(Env::prefixed("HOMEWATCH_").split("__"))
            .merge(cli.clone())
            .extract()?;
        Ok(config)
    }
}

// Provide a default implementation for tests and easy setup.
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            mqtt: MqttConfig {
                hostname: "localhost".to_string(),
                port: 1883,
            },
            meter: MeterConfig {
                hostname: "localhost".to_string(),
                port: 8001,
            },
            database: DatabaseConfig {
                path: PathBuf::from("homewatch.db"),
            },
            smtp: SmtpConfig {
                hostname: "localhost".to_string(),
                port: 587,
                username: String::new(),
                password: String::new(),
            },
            mail: MailConfig {
                from: String::new(),
                to: String::new(),
            },
            periodicity: PeriodicityConfig {
                energy: 300,
                pressure: 600,
            },
            power_alert: PowerAlertConfig {
                threshold: 3000,
                check_time: "07:30".to_string(),
            },
        }
    }
}
