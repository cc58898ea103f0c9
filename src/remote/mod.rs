// Remote data service - the only path from the stores to the backend
pub mod query;
pub mod sqlite;

pub use query::{from_row, int_field, to_row, Direction, Filter, Order, Query, Row};
pub use sqlite::SqliteDataService;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::models::UserId;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column {column} on {table}")]
    UnknownColumn { table: String, column: String },

    #[error("Refusing to {0} without a filter")]
    MissingFilter(&'static str),

    #[error("Unknown procedure: {0}")]
    UnknownProcedure(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Notification that a row was written.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub table: String,
    pub kind: ChangeKind,
    pub row: Row,
}

/// Change feed for a single row, keyed by its `id` column.
pub struct RowSubscription {
    table: String,
    id: Value,
    receiver: broadcast::Receiver<RowChange>,
}

impl RowSubscription {
    pub fn new(
        table: impl Into<String>,
        id: impl Into<Value>,
        receiver: broadcast::Receiver<RowChange>,
    ) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
            receiver,
        }
    }

    /// Wait for the next change to the watched row. `None` once the feed closes.
    pub async fn next(&mut self) -> Option<RowChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => {
                    if change.table == self.table && change.row.get("id") == Some(&self.id) {
                        return Some(change);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Subscription on {} {} lagged, skipped {} changes",
                        self.table,
                        self.id,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Table-style CRUD, session identity, object storage and procedures of the
/// hosted backend.
#[async_trait]
pub trait RemoteDataService: Send + Sync {
    /// Rows of `table` matching the query
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, RemoteError>;

    /// Insert rows, returning them as stored (with generated ids and defaults)
    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, RemoteError>;

    /// Apply `changes` to every row matching `filters`, returning the updated rows
    async fn update(
        &self,
        table: &str,
        changes: Row,
        filters: Vec<Filter>,
    ) -> Result<Vec<Row>, RemoteError>;

    /// Delete rows matching `filters`, returning how many were removed
    async fn delete(&self, table: &str, filters: Vec<Filter>) -> Result<u64, RemoteError>;

    async fn count(&self, table: &str, filters: Vec<Filter>) -> Result<u64, RemoteError>;

    /// Identity of the signed-in user, if any
    async fn current_user(&self) -> Result<Option<UserId>, RemoteError>;

    fn subscribe_row(&self, table: &str, id: Value) -> Result<RowSubscription, RemoteError>;

    /// Store an object in a bucket, returning its path within the bucket
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String, RemoteError>;

    fn public_url(&self, bucket: &str, path: &str) -> Result<String, RemoteError>;

    /// Invoke a server-side procedure
    async fn rpc(&self, name: &str, args: Value) -> Result<Value, RemoteError>;
}

/// Type alias for Arc-wrapped service shared by the stores
pub type DynRemote = Arc<dyn RemoteDataService>;
