//! Catalog introspection.
//!
//! Every call opens its own session and reads live catalog data; nothing
//! is cached between calls.

mod types;

pub use types::*;

use crate::connection::{Row, SharedConnector};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome of a connectivity probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionProbe {
    pub connected: bool,
    pub message: String,
    pub latency_ms: u64,
}

/// Stateless reader over one database.
#[derive(Clone)]
pub struct Introspector {
    connector: SharedConnector,
}

impl Introspector {
    pub fn new(connector: SharedConnector) -> Self {
        Self { connector }
    }

    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    /// Open a session and round-trip once. Never fails; the probe carries the error.
    pub async fn test_connection(&self) -> ConnectionProbe {
        let start = std::time::Instant::now();
        let result = async {
            let session = self.connector.acquire().await?;
            session.ping().await
        }
        .await;
        let latency_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(()) => ConnectionProbe {
                connected: true,
                message: "Connection successful".to_string(),
                latency_ms,
            },
            Err(e) => ConnectionProbe {
                connected: false,
                message: e.to_string(),
                latency_ms,
            },
        }
    }

    pub async fn list_schemas(&self) -> Result<Vec<String>> {
        let session = self.connector.acquire().await?;
        session.list_schemas().await
    }

    /// Tables of `schema`, largest first.
    pub async fn list_tables(&self, schema: &str) -> Result<Vec<TableDescriptor>> {
        let session = self.connector.acquire().await?;
        session.list_tables(schema).await
    }

    pub async fn table_structure(&self, schema: &str, table: &str) -> Result<TableStructure> {
        let session = self.connector.acquire().await?;
        let structure = TableStructure {
            columns: session.columns(schema, table).await?,
            indexes: session.indexes(schema, table).await?,
            constraints: session.constraints(schema, table).await?,
        };
        debug!(
            "{}.{}: {} columns, {} indexes, {} constraints",
            schema,
            table,
            structure.columns.len(),
            structure.indexes.len(),
            structure.constraints.len()
        );
        Ok(structure)
    }

    pub async fn row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let session = self.connector.acquire().await?;
        session.row_count(schema, table).await
    }

    /// Up to `limit` rows in first-column order.
    pub async fn sample_rows(&self, schema: &str, table: &str, limit: usize) -> Result<Vec<Row>> {
        let session = self.connector.acquire().await?;
        let columns = session.columns(schema, table).await?;
        session
            .fetch_rows(schema, table, &columns, Some(limit), 0)
            .await
    }

    pub async fn database_size(&self) -> Result<DatabaseSize> {
        let session = self.connector.acquire().await?;
        session.database_size().await
    }

    pub async fn version(&self) -> Result<String> {
        let session = self.connector.acquire().await?;
        session.version().await
    }

    pub async fn settings(&self) -> Result<Vec<ServerSetting>> {
        let session = self.connector.acquire().await?;
        session.settings().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::memory::{id_name_columns, numbered_rows, MemoryDatabase};

    fn db() -> MemoryDatabase {
        let db = MemoryDatabase::new("src");
        db.add_table("public", "small", id_name_columns(), numbered_rows(3));
        db.add_table("public", "large", id_name_columns(), numbered_rows(500));
        db.add_table("sales", "orders", id_name_columns(), numbered_rows(10));
        db
    }

    #[tokio::test]
    async fn test_list_tables_largest_first() {
        let intro = Introspector::new(db().connector());
        let tables = intro.list_tables("public").await.unwrap();
        let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["large", "small"]);
        assert_eq!(tables[0].column_count, 2);
        assert_eq!(tables[0].full_name(), "public.large");
    }

    #[tokio::test]
    async fn test_list_schemas() {
        let intro = Introspector::new(db().connector());
        assert_eq!(intro.list_schemas().await.unwrap(), vec!["public", "sales"]);
    }

    #[tokio::test]
    async fn test_each_call_opens_a_session() {
        let db = db();
        let intro = Introspector::new(db.connector());
        intro.row_count("public", "small").await.unwrap();
        intro.list_tables("public").await.unwrap();
        assert_eq!(db.calls("acquire", ""), 2);
    }

    #[tokio::test]
    async fn test_sample_rows_bounded() {
        let intro = Introspector::new(db().connector());
        let rows = intro.sample_rows("public", "large", 5).await.unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0][0].as_text(), Some("1"));
    }

    #[tokio::test]
    async fn test_table_structure() {
        let intro = Introspector::new(db().connector());
        let structure = intro.table_structure("sales", "orders").await.unwrap();
        assert_eq!(structure.order_column(), Some("id"));
        assert_eq!(structure.columns.len(), 2);
    }

    #[tokio::test]
    async fn test_query_failure_propagates() {
        let db = db();
        db.fail_next("row_count", "small", 1);
        let intro = Introspector::new(db.connector());
        assert!(intro.row_count("public", "small").await.is_err());
        // Not retried here.
        assert_eq!(db.calls("row_count", "small"), 1);
    }

    #[tokio::test]
    async fn test_connection_probe_reports_failure() {
        let db = db();
        db.fail_next("acquire", "", 1);
        let intro = Introspector::new(db.connector());
        let probe = intro.test_connection().await;
        assert!(!probe.connected);
        assert!(probe.message.contains("memory/src"));
        assert!(intro.test_connection().await.connected);
    }
}
