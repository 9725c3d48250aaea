//! One-shot energy snapshot, intended to run from cron: fetches the
//! current meter reading and records the total energy counter.

use anyhow::Result;
use clap::Parser;
use homewatch::cli::Cli;
use homewatch::config::Config;
use homewatch::db::{Sink, SqliteSink};
use homewatch::metering::MeterClient;
use rusqlite::types::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Record a one-shot energy meter snapshot")]
struct SnapshotCli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "homewatch.toml")]
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let snapshot_cli = SnapshotCli::parse();
    let config = Config::load(&Cli {
        config: snapshot_cli.config,
        log_level: None,
        power_threshold: None,
    })?;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let meter = MeterClient::new(format!(
        "http://{}:{}",
        config.meter.hostname, config.meter.port
    ));
    let sink = SqliteSink::open(&config.database.path)?;

    let reading = meter.energy().await?;
    sink.execute(
        "INSERT INTO energy_snapshot (east) VALUES (?1)",
        vec![Value::Integer(reading.east)],
    )
    .await;

    info!(east = reading.east, "energy snapshot recorded");
    Ok(())
}
