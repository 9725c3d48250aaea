//! Shared fakes for the integration tests: a scripted bus and recording
//! implementations of the daemon's collaborator traits.

#![allow(dead_code)] // Not every test binary uses every fake

use async_trait::async_trait;
use homewatch::bus::{BusConnection, BusConnector, BusError, BusMessage, RingPublisher};
use homewatch::db::Sink;
use homewatch::mailer::MailSender;
use rusqlite::types::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A bus whose connections replay a scripted message sequence, then park
/// until cancelled. Records everything the daemon does to it.
#[derive(Default)]
pub struct FakeBus {
    messages: Mutex<VecDeque<BusMessage>>,
    pub published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    pub subscriptions: Arc<Mutex<Vec<String>>>,
    pub connects: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
}

impl FakeBus {
    pub fn with_messages(messages: Vec<BusMessage>) -> Self {
        Self {
            messages: Mutex::new(messages.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl BusConnector for FakeBus {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, BusError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            messages: std::mem::take(&mut *self.messages.lock().unwrap()),
            published: self.published.clone(),
            subscriptions: self.subscriptions.clone(),
            closes: self.closes.clone(),
        }))
    }
}

pub struct FakeConnection {
    messages: VecDeque<BusMessage>,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl BusConnection for FakeConnection {
    async fn subscribe(&mut self, filter: &str) -> Result<(), BusError> {
        self.subscriptions.lock().unwrap().push(filter.to_string());
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<BusMessage, BusError>> {
        match self.messages.pop_front() {
            Some(message) => Some(Ok(message)),
            // Keep the listener parked at its suspension point until it is
            // cancelled.
            None => futures::future::pending().await,
        }
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records executed statements instead of touching a database.
#[derive(Default)]
pub struct RecordingSink {
    pub statements: Mutex<Vec<(&'static str, Vec<Value>)>>,
}

impl RecordingSink {
    /// Statements whose text starts with `prefix`.
    pub fn matching(&self, prefix: &str) -> Vec<(&'static str, Vec<Value>)> {
        self.statements
            .lock()
            .unwrap()
            .iter()
            .filter(|(statement, _)| statement.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn execute(&self, statement: &'static str, params: Vec<Value>) {
        self.statements.lock().unwrap().push((statement, params));
    }
}

/// Records sent mail; can be switched into a failing mode.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl MailSender for RecordingMailer {
    async fn send(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("relay unavailable");
        }
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// Records one-shot ring publishes.
#[derive(Default)]
pub struct RecordingRing {
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl RingPublisher for RecordingRing {
    async fn publish_once(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}
