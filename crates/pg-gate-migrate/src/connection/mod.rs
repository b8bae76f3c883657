//! Scoped database sessions.
//!
//! A [`Connector`] is bound to one [`ConnectionConfig`] and hands out
//! [`Session`]s. A session is released when it is dropped, so every exit
//! path of the caller (including `?` and panics) gives the connection back.
//!
//! Values cross the session boundary as text. Both ends of a migration are
//! PostgreSQL, so every column round-trips through its text representation
//! and is cast back to the destination column type on insert.

mod dialect;
#[cfg(test)]
pub(crate) mod memory;
mod postgres;
mod tls;

pub use dialect::{PostgresDialect, SelectQueryOptions};
pub use postgres::{PgConnector, CONNECT_TIMEOUT};
pub use tls::{SslMode, TlsBuilder};

use crate::error::Result;
use crate::schema::{
    ColumnDescriptor, ConstraintDescriptor, DatabaseSize, IndexDescriptor, ServerSetting,
    TableDescriptor,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A single column value, carried as its PostgreSQL text rendering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Text(String),
}

impl SqlValue {
    /// Text payload, `None` for SQL NULL.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Null => None,
            SqlValue::Text(s) => Some(s),
        }
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(s) => SqlValue::Text(s),
            None => SqlValue::Null,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

/// One row, values in column order.
pub type Row = Vec<SqlValue>;

/// An open database session.
#[async_trait]
pub trait Session: Send + Sync {
    /// Round trip used by health checks.
    async fn ping(&self) -> Result<()>;

    /// Non-system schemas, sorted by name.
    async fn list_schemas(&self) -> Result<Vec<String>>;

    /// Base tables of a schema, largest first.
    async fn list_tables(&self, schema: &str) -> Result<Vec<TableDescriptor>>;

    /// Columns in ordinal order.
    async fn columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>>;

    async fn indexes(&self, schema: &str, table: &str) -> Result<Vec<IndexDescriptor>>;

    async fn constraints(&self, schema: &str, table: &str) -> Result<Vec<ConstraintDescriptor>>;

    /// Exact `COUNT(*)`.
    async fn row_count(&self, schema: &str, table: &str) -> Result<i64>;

    /// Rows ordered by the first of `columns`, paginated with LIMIT/OFFSET.
    async fn fetch_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDescriptor],
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Row>>;

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool>;

    /// Create a table mirroring `columns`. Indexes and constraints are not created.
    async fn create_table(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDescriptor],
    ) -> Result<()>;

    async fn insert_row(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDescriptor],
        row: &[SqlValue],
    ) -> Result<()>;

    async fn database_size(&self) -> Result<DatabaseSize>;

    async fn version(&self) -> Result<String>;

    /// Memory, WAL, replication and locale settings.
    async fn settings(&self) -> Result<Vec<ServerSetting>>;
}

/// Factory for sessions against one database.
#[async_trait]
pub trait Connector: Send + Sync {
    /// `host:port/database` of the target database.
    fn endpoint(&self) -> String;

    /// Open a session. Fails with `MigrateError::Connection` on handshake failure.
    async fn acquire(&self) -> Result<Box<dyn Session>>;
}

/// Shared connector handle.
pub type SharedConnector = Arc<dyn Connector>;
