//! The main application wiring, decoupled from the entry point.

use anyhow::{Context, Result};
use chrono::NaiveTime;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::alert::{CheckWindow, PowerAlert, PowerMonitor};
use crate::bus::{BusConnector, MqttBus, RingPublisher};
use crate::config::Config;
use crate::db::{Sink, SqliteSink};
use crate::listener::BusListener;
use crate::mailer::{MailSender, SmtpMailer};
use crate::metering::{EnergyCycle, MeterClient, PressureCycle};
use crate::poller::Poller;
use crate::supervisor::{StopMode, Supervisor};

/// The assembled daemon: collaborators plus the supervisor that owns the
/// units of concurrency.
///
/// A host process calls [`start`](Self::start) once after loading
/// configuration and [`stop`](Self::stop) once on its shutdown signal; a
/// fresh `App` is required to start again after that.
pub struct App {
    supervisor: Supervisor,
    config: Config,
    check_time: NaiveTime,
    connector: Arc<dyn BusConnector>,
    ring: Arc<dyn RingPublisher>,
    sink: Arc<dyn Sink>,
    mailer: Arc<dyn MailSender>,
    meter: Arc<MeterClient>,
}

impl App {
    /// Unit names as registered with the supervisor.
    pub const LISTENER: &'static str = "bus-listener";
    pub const ENERGY_POLLER: &'static str = "energy-poller";
    pub const PRESSURE_POLLER: &'static str = "pressure-poller";

    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// Starts the bus listener and both pollers as supervised units.
    ///
    /// Idempotent: a unit whose previous instance is still running is left
    /// alone.
    pub fn start(&self) {
        let listener = BusListener::new(
            self.connector.clone(),
            self.sink.clone(),
            self.mailer.clone(),
        );
        self.supervisor.spawn(
            Self::LISTENER,
            StopMode::Cancel,
            listener.run(self.supervisor.shutdown_rx()),
        );

        let monitor = PowerMonitor::new(
            CheckWindow::new(self.check_time),
            PowerAlert::new(self.config.power_alert.threshold),
            self.ring.clone(),
            self.mailer.clone(),
        );
        let energy = Poller::new(
            Self::ENERGY_POLLER,
            Duration::from_secs(self.config.periodicity.energy),
            EnergyCycle::new(self.meter.clone(), self.sink.clone(), monitor),
        );
        self.supervisor.spawn(
            Self::ENERGY_POLLER,
            StopMode::Drain,
            energy.run(self.supervisor.shutdown_rx()),
        );

        let pressure = Poller::new(
            Self::PRESSURE_POLLER,
            Duration::from_secs(self.config.periodicity.pressure),
            PressureCycle::new(self.meter.clone(), self.sink.clone()),
        );
        self.supervisor.spawn(
            Self::PRESSURE_POLLER,
            StopMode::Drain,
            pressure.run(self.supervisor.shutdown_rx()),
        );

        info!("homewatch started");
    }

    /// Signals shutdown and waits for every unit to reach a terminal
    /// state. Idempotent, and safe to call even if `start` never ran.
    pub async fn stop(&self) {
        self.supervisor.stop().await;
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }
}

/// Builder for the main application.
///
/// This pattern separates constructing the application's collaborators from
/// running them, and provides a convenient way to override collaborators
/// for testing purposes.
pub struct AppBuilder {
    config: Config,
    connector_override: Option<Arc<dyn BusConnector>>,
    ring_override: Option<Arc<dyn RingPublisher>>,
    sink_override: Option<Arc<dyn Sink>>,
    mailer_override: Option<Arc<dyn MailSender>>,
    meter_url_override: Option<String>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            connector_override: None,
            ring_override: None,
            sink_override: None,
            mailer_override: None,
            meter_url_override: None,
        }
    }

    /// Overrides the listener's bus connector for testing.
    pub fn connector_override(mut self, connector: Arc<dyn BusConnector>) -> Self {
        self.connector_override = Some(connector);
        self
    }

    /// Overrides the alert path's one-shot publisher for testing.
    pub fn ring_override(mut self, ring: Arc<dyn RingPublisher>) -> Self {
        self.ring_override = Some(ring);
        self
    }

    /// Overrides the persistence sink for testing.
    pub fn sink_override(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink_override = Some(sink);
        self
    }

    /// Overrides the mail sender for testing.
    pub fn mailer_override(mut self, mailer: Arc<dyn MailSender>) -> Self {
        self.mailer_override = Some(mailer);
        self
    }

    /// Overrides the metering base URL for testing.
    pub fn meter_url_override(mut self, base_url: String) -> Self {
        self.meter_url_override = Some(base_url);
        self
    }

    /// Builds all collaborators, returning a startable `App`.
    pub fn build(self) -> Result<App> {
        let config = self.config;

        let check_time = NaiveTime::parse_from_str(&config.power_alert.check_time, "%H:%M")
            .context("invalid power_alert.check_time, expected HH:MM")?;

        let bus = Arc::new(MqttBus::new(config.mqtt.clone()));
        let connector = self
            .connector_override
            .unwrap_or_else(|| bus.clone() as Arc<dyn BusConnector>);
        let ring = self
            .ring_override
            .unwrap_or_else(|| bus as Arc<dyn RingPublisher>);

        let sink = match self.sink_override {
            Some(sink) => sink,
            None => Arc::new(SqliteSink::open(&config.database.path)?),
        };

        let mailer = match self.mailer_override {
            Some(mailer) => mailer,
            None => Arc::new(SmtpMailer::new(&config.smtp, &config.mail)?),
        };

        let base_url = self.meter_url_override.unwrap_or_else(|| {
            format!("http://{}:{}", config.meter.hostname, config.meter.port)
        });
        let meter = Arc::new(MeterClient::new(base_url));

        Ok(App {
            supervisor: Supervisor::new(),
            config,
            check_time,
            connector,
            ring,
            sink,
            mailer,
            meter,
        })
    }
}
