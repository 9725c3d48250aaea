//! SQLite persistence sink.
//!
//! Writes are best-effort, write-through: failures are logged and never
//! propagated into the callers' control flow. Statements run on the
//! blocking pool; `rusqlite::Connection` is not async.

use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::error;

/// Fire-and-forget statement execution.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn execute(&self, statement: &'static str, params: Vec<Value>);
}

pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    /// Opens (or creates) the database file and ensures the schema exists.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        create_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        create_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS energy (
             east INTEGER,
             sinst INTEGER,
             timestamp TIMESTAMP(1) DEFAULT (STRFTIME('%s', 'NOW'))
         );
         CREATE TABLE IF NOT EXISTS energy_snapshot (
             east INTEGER,
             timestamp TIMESTAMP(1) DEFAULT (STRFTIME('%s', 'NOW'))
         );
         CREATE TABLE IF NOT EXISTS on_off (
             device VARCHAR(30),
             state BOOLEAN,
             timestamp TIMESTAMP(1) DEFAULT (STRFTIME('%s', 'NOW'))
         );
         CREATE TABLE IF NOT EXISTS pressure (
             pressure REAL,
             timestamp TIMESTAMP(1) DEFAULT (STRFTIME('%s', 'NOW'))
         );
         CREATE TABLE IF NOT EXISTS temperature_humidity (
             device VARCHAR(30),
             humidity REAL,
             temperature REAL,
             timestamp TIMESTAMP(1) DEFAULT (STRFTIME('%s', 'NOW'))
         );",
    )
}

#[async_trait]
impl Sink for SqliteSink {
    async fn execute(&self, statement: &'static str, params: Vec<Value>) {
        let conn = self.conn.clone();
        let result = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(statement, params_from_iter(params)).map(|_| ())
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(statement, error = %e, "statement failed"),
            Err(e) => error!(statement, error = %e, "persistence task failed"),
        }
    }
}
