//! Batched single-table transfer.
//!
//! Rows are read from the source in first-column order with LIMIT/OFFSET
//! paging and written to the destination one INSERT per row. Batches and
//! rows are processed strictly in sequence.
//!
//! OFFSET paging rescans skipped rows on every batch and is not stable if
//! the source table is written to during the transfer.
//!
//! There is no rollback: rows inserted before a failure stay in the
//! destination and are reported through `rows_migrated`.

use crate::connection::SharedConnector;
use crate::error::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one table transfer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub success: bool,
    /// Rows the transfer intended to copy (source count, capped by `max_rows`).
    pub total_rows: u64,
    /// Rows actually inserted. Never exceeds `total_rows`.
    pub rows_migrated: u64,
    /// Batches fetched from the source.
    pub batches: usize,
    pub duration_seconds: f64,
    pub error: Option<String>,
}

/// Copies tables from a source to a destination database.
#[derive(Clone)]
pub struct TransferEngine {
    source: SharedConnector,
    destination: SharedConnector,
}

impl TransferEngine {
    pub fn new(source: SharedConnector, destination: SharedConnector) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Copy `schema.table`, creating the destination table if it is absent.
    ///
    /// Never returns `Err`: failures are reported through
    /// `MigrationResult::error` together with the partial row count.
    pub async fn migrate_table(
        &self,
        schema: &str,
        table: &str,
        batch_size: usize,
        max_rows: Option<u64>,
    ) -> MigrationResult {
        let start = Instant::now();
        let mut result = MigrationResult::default();

        match self
            .transfer(schema, table, batch_size.max(1), max_rows, &mut result)
            .await
        {
            Ok(()) => {
                result.success = true;
                info!(
                    "{}.{}: transferred {} rows in {} batches",
                    schema, table, result.rows_migrated, result.batches
                );
            }
            Err(e) => {
                warn!(
                    "{}.{}: transfer failed after {}/{} rows: {}",
                    schema, table, result.rows_migrated, result.total_rows, e
                );
                result.success = false;
                result.error = Some(e.to_string());
            }
        }

        result.duration_seconds = start.elapsed().as_secs_f64();
        result
    }

    async fn transfer(
        &self,
        schema: &str,
        table: &str,
        batch_size: usize,
        max_rows: Option<u64>,
        result: &mut MigrationResult,
    ) -> Result<()> {
        let source = self.source.acquire().await?;
        let destination = self.destination.acquire().await?;

        let count = source.row_count(schema, table).await?.max(0) as u64;
        let total = max_rows.map_or(count, |cap| count.min(cap));
        result.total_rows = total;

        let columns = source.columns(schema, table).await?;
        if columns.is_empty() {
            return Err(MigrateError::transfer(
                format!("{}.{}", schema, table),
                "source table has no columns",
            ));
        }

        // Created even for an empty source so the table can be validated.
        if !destination.table_exists(schema, table).await? {
            info!("{}.{}: creating destination table", schema, table);
            destination.create_table(schema, table, &columns).await?;
        }

        if total == 0 {
            debug!("{}.{}: source is empty, nothing to copy", schema, table);
            return Ok(());
        }

        let mut offset: u64 = 0;
        while offset < total {
            let limit = (batch_size as u64).min(total - offset) as usize;
            let rows = source
                .fetch_rows(schema, table, &columns, Some(limit), offset as usize)
                .await?;
            result.batches += 1;

            if rows.is_empty() {
                // Source shrank underneath us.
                warn!(
                    "{}.{}: source returned no rows at offset {} of {}",
                    schema, table, offset, total
                );
                break;
            }

            for row in &rows {
                destination.insert_row(schema, table, &columns, row).await?;
                result.rows_migrated += 1;
            }

            debug!(
                "{}.{}: batch {} wrote {} rows ({}/{})",
                schema,
                table,
                result.batches,
                rows.len(),
                result.rows_migrated,
                total
            );
            offset += rows.len() as u64;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::memory::{id_name_columns, numbered_rows, MemoryDatabase};

    fn setup(rows: usize) -> (MemoryDatabase, MemoryDatabase, TransferEngine) {
        let src = MemoryDatabase::new("src");
        let dst = MemoryDatabase::new("dst");
        src.add_table("public", "items", id_name_columns(), numbered_rows(rows));
        let engine = TransferEngine::new(src.connector(), dst.connector());
        (src, dst, engine)
    }

    #[tokio::test]
    async fn test_empty_table_creates_destination_without_copying() {
        let (src, dst, engine) = setup(0);
        let result = engine.migrate_table("public", "items", 1000, None).await;
        assert!(result.success);
        assert_eq!(result.total_rows, 0);
        assert_eq!(result.rows_migrated, 0);
        assert_eq!(result.batches, 0);
        assert_eq!(src.calls("fetch_rows", "items"), 0);

        let created = dst.table("public", "items").unwrap();
        assert_eq!(created.columns, id_name_columns());
        assert!(created.rows.is_empty());
    }

    #[tokio::test]
    async fn test_batches_of_1000_for_2500_rows() {
        let (src, dst, engine) = setup(2500);
        let result = engine.migrate_table("public", "items", 1000, None).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.total_rows, 2500);
        assert_eq!(result.rows_migrated, 2500);
        assert_eq!(result.batches, 3);
        assert_eq!(src.calls("fetch_rows", "items"), 3);

        let copied = dst.table("public", "items").unwrap();
        assert_eq!(copied.rows.len(), 2500);
        assert_eq!(copied.columns, id_name_columns());
        assert_eq!(copied.rows[0][0].as_text(), Some("1"));
        assert_eq!(copied.rows[2499][0].as_text(), Some("2500"));
    }

    #[tokio::test]
    async fn test_max_rows_caps_transfer() {
        let (_src, dst, engine) = setup(250);
        let result = engine.migrate_table("public", "items", 100, Some(100)).await;
        assert!(result.success);
        assert_eq!(result.total_rows, 100);
        assert_eq!(result.rows_migrated, 100);
        assert_eq!(result.batches, 1);
        assert_eq!(dst.table("public", "items").unwrap().rows.len(), 100);
    }

    #[tokio::test]
    async fn test_existing_destination_table_is_reused() {
        let (_src, dst, engine) = setup(10);
        dst.add_table("public", "items", id_name_columns(), Vec::new());
        let result = engine.migrate_table("public", "items", 4, None).await;
        assert!(result.success);
        assert_eq!(result.batches, 3);
        assert_eq!(dst.calls("create_table", "items"), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_inserted_rows() {
        let (_src, dst, engine) = setup(30);
        dst.fail_inserts_after(15);
        let result = engine.migrate_table("public", "items", 10, None).await;
        assert!(!result.success);
        assert_eq!(result.total_rows, 30);
        assert_eq!(result.rows_migrated, 15);
        assert!(result.error.unwrap().contains("duplicate key"));
        assert_eq!(dst.table("public", "items").unwrap().rows.len(), 15);
    }

    #[tokio::test]
    async fn test_source_error_is_reported_not_raised() {
        let (src, _dst, engine) = setup(5);
        src.fail_next("row_count", "items", 1);
        let result = engine.migrate_table("public", "items", 10, None).await;
        assert!(!result.success);
        assert_eq!(result.rows_migrated, 0);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_connection_failure_reported() {
        let (_src, dst, engine) = setup(5);
        dst.fail_next("acquire", "", 1);
        let result = engine.migrate_table("public", "items", 10, None).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("memory/dst"));
    }
}
