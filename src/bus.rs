//! Message bus access for the daemon.
//!
//! The listener and the alert path talk to the MQTT broker through the
//! traits below so tests can substitute scripted fakes for the real
//! connection.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::MqttConfig;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("bus connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
}

/// A single inbound bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// An open connection to the bus.
#[async_trait]
pub trait BusConnection: Send {
    /// Subscribes to a topic filter (`+`/`#` wildcards allowed).
    async fn subscribe(&mut self, filter: &str) -> Result<(), BusError>;

    /// Waits for the next inbound message.
    ///
    /// `None` means the stream ended; `Some(Err(_))` is a transport
    /// failure. The returned future may be dropped while pending without
    /// losing the connection, which is what makes the listener's shutdown
    /// select safe.
    async fn next_message(&mut self) -> Option<Result<BusMessage, BusError>>;

    /// Publishes a message on this connection.
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Closes the connection. The owner calls this exactly once.
    async fn close(&mut self);
}

/// Opens long-lived bus connections.
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, BusError>;
}

/// One-shot publisher for alert paths: opens a connection, publishes a
/// single message and disconnects, independent of any long-lived listener
/// connection.
#[async_trait]
pub trait RingPublisher: Send + Sync {
    async fn publish_once(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

/// Does `topic` match an MQTT topic `filter`?
///
/// `+` matches exactly one level, `#` matches the remainder of the topic
/// (including zero levels).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// rumqttc-backed access to the broker configured in `[mqtt]`.
pub struct MqttBus {
    config: MqttConfig,
}

impl MqttBus {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }

    fn options(&self, client_id: &str) -> MqttOptions {
        let mut options =
            MqttOptions::new(client_id, self.config.hostname.clone(), self.config.port);
        options.set_keep_alive(Duration::from_secs(30));
        options
    }
}

#[async_trait]
impl BusConnector for MqttBus {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, BusError> {
        let (client, event_loop) = AsyncClient::new(self.options("homewatch-listener"), 16);
        Ok(Box::new(MqttConnection { client, event_loop }))
    }
}

#[async_trait]
impl RingPublisher for MqttBus {
    async fn publish_once(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let (client, mut event_loop) = AsyncClient::new(self.options("homewatch-ring"), 4);
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        client.disconnect().await?;

        // Drive the connection until the disconnect goes out so the queued
        // publish is actually flushed to the broker.
        loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

struct MqttConnection {
    client: AsyncClient,
    event_loop: EventLoop,
}

#[async_trait]
impl BusConnection for MqttConnection {
    async fn subscribe(&mut self, filter: &str) -> Result<(), BusError> {
        self.client.subscribe(filter, QoS::AtLeastOnce).await?;
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<BusMessage, BusError>> {
        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Some(Ok(BusMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    }));
                }
                Ok(Event::Incoming(Packet::Disconnect)) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "bus disconnect failed");
        }
    }
}
