//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the daemon using the
//! `clap` crate. The parsed arguments act as the top configuration layer,
//! merged over the `homewatch.toml` file and environment variables.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// A home-automation daemon bridging the message bus, the metering
/// endpoint, local persistence and email alerts.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "homewatch.toml")]
    pub config: PathBuf,

    /// Logging filter directive (e.g. "info,homewatch::listener=debug").
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Apparent power alert threshold, in volt-amperes.
    #[arg(long, value_name = "VA")]
    pub power_threshold: Option<i64>,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.as_str()));
        }

        if let Some(threshold) = self.power_threshold {
            let mut power_alert = Dict::new();
            power_alert.insert("threshold".into(), Value::from(threshold));
            dict.insert("power_alert".into(), Value::from(power_alert));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
