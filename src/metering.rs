//! HTTP client for the metering endpoint and the two poll cycles built on
//! top of it.

use async_trait::async_trait;
use rusqlite::types::Value;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use crate::alert::PowerMonitor;
use crate::core::{EnergyReading, PressureReading};
use crate::db::Sink;
use crate::poller::PollCycle;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("bad status ({0})")]
    Status(reqwest::StatusCode),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Metering responses wrap the payload in a `data` envelope.
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Client for the metering HTTP endpoint.
pub struct MeterClient {
    base_url: String,
    http: reqwest::Client,
}

impl MeterClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Current energy meter reading.
    pub async fn energy(&self) -> Result<EnergyReading, FetchError> {
        self.get("/energy").await
    }

    /// Current barometer reading.
    pub async fn pressure(&self) -> Result<PressureReading, FetchError> {
        self.get("/pressure").await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }
        let envelope: Envelope<T> = response.json().await?;
        Ok(envelope.data)
    }
}

/// Poll cycle for the energy meter: persists every reading and feeds the
/// instantaneous apparent power into the alert monitor.
pub struct EnergyCycle {
    meter: Arc<MeterClient>,
    sink: Arc<dyn Sink>,
    monitor: PowerMonitor,
}

impl EnergyCycle {
    pub fn new(meter: Arc<MeterClient>, sink: Arc<dyn Sink>, monitor: PowerMonitor) -> Self {
        Self {
            meter,
            sink,
            monitor,
        }
    }
}

#[async_trait]
impl PollCycle for EnergyCycle {
    type Sample = EnergyReading;

    async fn fetch(&mut self) -> Result<EnergyReading, FetchError> {
        self.meter.energy().await
    }

    async fn inspect(&mut self, sample: &EnergyReading) {
        self.monitor.observe(sample.sinst).await;
    }

    async fn persist(&mut self, sample: &EnergyReading) {
        self.sink
            .execute(
                "INSERT INTO energy (east, sinst) VALUES (?1, ?2)",
                vec![Value::Integer(sample.east), Value::Integer(sample.sinst)],
            )
            .await;
    }
}

/// Poll cycle for the barometer.
pub struct PressureCycle {
    meter: Arc<MeterClient>,
    sink: Arc<dyn Sink>,
}

impl PressureCycle {
    pub fn new(meter: Arc<MeterClient>, sink: Arc<dyn Sink>) -> Self {
        Self { meter, sink }
    }
}

#[async_trait]
impl PollCycle for PressureCycle {
    type Sample = PressureReading;

    async fn fetch(&mut self) -> Result<PressureReading, FetchError> {
        self.meter.pressure().await
    }

    async fn persist(&mut self, sample: &PressureReading) {
        self.sink
            .execute(
                "INSERT INTO pressure (pressure) VALUES (?1)",
                vec![Value::Real(sample.hectopascal())],
            )
            .await;
    }
}
