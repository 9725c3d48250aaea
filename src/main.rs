//! HomeWatch - home-automation bridge daemon
//!
//! Bridges the MQTT message bus, the metering HTTP endpoint, a local
//! SQLite database and an email alert channel inside one supervised
//! process.

use anyhow::Result;
use clap::Parser;
use homewatch::cli::Cli;
use homewatch::config::Config;
use homewatch::App;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli).unwrap_or_else(|err| {
        eprintln!("Failed to load configuration: {err}");
        // Exit if configuration fails, as it's a critical step.
        std::process::exit(1);
    });

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|err| {
        eprintln!("Invalid log_level {:?}: {err}", config.log_level);
        std::process::exit(1);
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        mqtt = %format!("{}:{}", config.mqtt.hostname, config.mqtt.port),
        meter = %format!("{}:{}", config.meter.hostname, config.meter.port),
        database = %config.database.path.display(),
        energy_period = config.periodicity.energy,
        pressure_period = config.periodicity.pressure,
        power_threshold = config.power_alert.threshold,
        check_time = %config.power_alert.check_time,
        "homewatch starting up"
    );

    let app = App::builder(config).build()?;
    app.start();

    shutdown_signal().await;
    info!("shutdown signal received, stopping units");

    app.stop().await;
    info!("all units shut down, exiting");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
