//! Bus listener: consumes the inbound message stream and routes each
//! message by topic.

use rusqlite::types::Value;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::bus::{topic_matches, BusConnection, BusConnector, BusMessage};
use crate::core::{topics, SensorReading, LOW_BATTERY_PERCENT};
use crate::db::Sink;
use crate::mailer::MailSender;

/// Strikes requested from the chime when the doorbell button is pressed.
const DOORBELL_STRIKES: u32 = 5;

/// Topic filters subscribed at startup.
const SUBSCRIPTIONS: &[&str] = &["home/#", "zigbee2mqtt/sensor/#"];

/// How a matched topic is handled. The route table is fixed at
/// initialization; first match wins, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    SensorTelemetry,
    Doorbell,
}

const ROUTES: &[(&str, Route)] = &[
    (topics::SENSOR_FILTER, Route::SensorTelemetry),
    (topics::DOORBELL_PRESSED, Route::Doorbell),
];

fn route_for(topic: &str) -> Option<Route> {
    ROUTES
        .iter()
        .find(|(filter, _)| topic_matches(filter, topic))
        .map(|(_, route)| *route)
}

pub struct BusListener {
    connector: Arc<dyn BusConnector>,
    sink: Arc<dyn Sink>,
    mailer: Arc<dyn MailSender>,
}

impl BusListener {
    pub fn new(
        connector: Arc<dyn BusConnector>,
        sink: Arc<dyn Sink>,
        mailer: Arc<dyn MailSender>,
    ) -> Self {
        Self {
            connector,
            sink,
            mailer,
        }
    }

    /// Connects, subscribes and consumes messages until the shutdown signal
    /// fires or the connection fails. The connection is closed exactly once
    /// on every exit path.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut bus = self.connector.connect().await?;
        let result = self.pump(&mut *bus, &mut shutdown_rx).await;
        bus.close().await;
        result
    }

    async fn pump(
        &self,
        bus: &mut dyn BusConnection,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        for filter in SUBSCRIPTIONS {
            bus.subscribe(filter).await?;
        }
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    debug!("bus listener received shutdown signal");
                    return Ok(());
                }
                next = bus.next_message() => next,
            };
            match next {
                Some(Ok(message)) => {
                    // One bad message must not take the listener down.
                    if let Err(e) = self.handle(bus, &message).await {
                        error!(topic = %message.topic, error = %e, "message handling failed");
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => anyhow::bail!("bus message stream ended"),
            }
        }
    }

    async fn handle(
        &self,
        bus: &mut dyn BusConnection,
        message: &BusMessage,
    ) -> anyhow::Result<()> {
        debug!(topic = %message.topic, "bus message");
        match route_for(&message.topic) {
            Some(Route::SensorTelemetry) => self.handle_sensor(message).await,
            Some(Route::Doorbell) => self.handle_doorbell(bus).await,
            None => Ok(()),
        }
    }

    async fn handle_sensor(&self, message: &BusMessage) -> anyhow::Result<()> {
        let reading: SensorReading = match serde_json::from_slice(&message.payload) {
            Ok(reading) => reading,
            Err(e) => {
                error!(topic = %message.topic, error = %e, "incomplete sensor payload, dropping");
                return Ok(());
            }
        };
        let device = message
            .topic
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        self.sink
            .execute(
                "INSERT INTO temperature_humidity (device, humidity, temperature) VALUES (?1, ?2, ?3)",
                vec![
                    Value::Text(device),
                    Value::Real(reading.humidity),
                    Value::Real(reading.temperature),
                ],
            )
            .await;

        if reading.battery < LOW_BATTERY_PERCENT {
            warn!(topic = %message.topic, battery = reading.battery, "battery low");
        }
        Ok(())
    }

    /// Every pressed event rings the chime, sends the doorbell email and
    /// records the state change. The side effects are independent, not
    /// transactional: a failed publish or mail send never suppresses the
    /// others.
    async fn handle_doorbell(&self, bus: &mut dyn BusConnection) -> anyhow::Result<()> {
        let ring = json!({ "number": DOORBELL_STRIKES }).to_string();
        if let Err(e) = bus.publish(topics::DOORBELL_RING, ring.into_bytes()).await {
            error!(error = %e, "ring publish failed");
        }

        if let Err(e) = self
            .mailer
            .send("Ding dong!", "Someone is ringing at the door")
            .await
        {
            error!(error = %e, "doorbell mail failed");
        }

        self.sink
            .execute(
                "INSERT INTO on_off (device, state) VALUES (?1, ?2)",
                vec![Value::Text("doorbell".to_string()), Value::Integer(1)],
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_topics_route_to_telemetry() {
        assert_eq!(
            route_for("zigbee2mqtt/sensor/sonoff/snzb02p/bedroom"),
            Some(Route::SensorTelemetry)
        );
    }

    #[test]
    fn doorbell_topic_routes_to_doorbell() {
        assert_eq!(route_for("home/doorbell/pressed"), Some(Route::Doorbell));
    }

    #[test]
    fn unrelated_topics_are_ignored() {
        assert_eq!(route_for("home/light/on"), None);
        assert_eq!(route_for("home/doorbell/ring"), None);
        assert_eq!(route_for("zigbee2mqtt/sensor/other/device"), None);
    }
}
