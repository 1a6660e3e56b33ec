//! CTT Arena is the data layer of a crypto up/down price-prediction game.
//!
//! Players stake virtual points (CTT) on whether a simulated price moves up or
//! down within a short round, earn a score, and compete on a leaderboard. State
//! lives in a local per-user entity store and is synced, best effort, with a
//! small REST backend.
//!
//! ## Core Components
//! - [`engine`]: The entity store (in-memory tables mirrored to JSON files).
//! - [`model`]: Users, rounds, bets and predictions.
//! - [`game`]: Price simulation, round settlement, leaderboard and mock airdrop.
//! - [`sdk`]: Remote client, score reconciliation and the synced store.
//! - [`server`]: HTTP backend implementation.

pub mod config;
pub mod engine;
pub mod game;
pub mod model;
pub mod sdk;
pub mod server;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub use config::GameConfig;
pub use engine::Table;

/// Errors returned by CTT Arena.
#[derive(Error, Debug)]
pub enum Error {
    /// No record with this id exists in the table.
    #[error("record {id} not found in {table}")]
    RecordNotFound { table: String, id: String },
    /// No user is registered under this email.
    #[error("user not found: {0}")]
    UserNotFound(String),
    /// The requested round does not exist.
    #[error("round not found: {0}")]
    RoundNotFound(String),
    /// The round no longer accepts bets or predictions.
    #[error("round {0} is closed")]
    RoundClosed(String),
    /// The round has already been settled.
    #[error("round {0} already settled")]
    AlreadySettled(String),
    /// A second bet or prediction on the same round.
    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),
    #[error("insufficient points: have {available}, need {required}")]
    InsufficientPoints { available: i64, required: i64 },
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    /// Missing or wrong admin token.
    #[error("unauthorized")]
    Unauthorized,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The backend answered with an error status.
    #[error("remote error ({status}): {message}")]
    Remote { status: u16, message: String },
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
    /// An I/O error occurred during persistence or network communication.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during JSON serialization or deserialization.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The backend could not be reached.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Whether the error means "the thing you asked for does not exist".
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::RecordNotFound { .. } | Error::UserNotFound(_) | Error::RoundNotFound(_) => true,
            Error::Remote { status, .. } => *status == 404,
            _ => false,
        }
    }
}

/// A specialized Result type for CTT Arena operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Read access to entity tables.
#[async_trait]
pub trait EntityReader: Send + Sync {
    /// Retrieves a single record by id.
    async fn get(&self, table: &str, id: &str) -> Result<Value>;
    /// Returns every record of a table in insertion order. Unknown tables are empty.
    async fn list(&self, table: &str) -> Result<Vec<Value>>;
    /// Returns the records whose fields equal every field of `query`.
    async fn filter(&self, table: &str, query: &Map<String, Value>) -> Result<Vec<Value>>;
}

/// Write access to entity tables.
#[async_trait]
pub trait EntityWriter: Send + Sync {
    /// Appends a record, assigning an `id` if it has none, and returns the stored record.
    async fn create(&self, table: &str, record: Value) -> Result<Value>;
    /// Shallow-merges `patch` into the record and returns the result.
    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Value>;
    /// Removes a record.
    async fn delete(&self, table: &str, id: &str) -> Result<()>;
    /// Replaces the whole table.
    async fn replace_all(&self, table: &str, records: Vec<Value>) -> Result<()>;
    /// Waits until every accepted write is durable.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Allows discovering the tables held by a store.
#[async_trait]
pub trait TableEnumeration: Send + Sync {
    async fn tables(&self) -> Result<Vec<String>>;
}

/// The primary interface for interacting with an entity store.
pub trait EntityStore: EntityReader + EntityWriter + TableEnumeration {}

impl dyn EntityStore {
    /// Returns a typed [`Table`] scope for entity type `T`.
    pub fn table<T: model::Entity>(&self) -> Table<'_, T> {
        Table::new(self)
    }
}
