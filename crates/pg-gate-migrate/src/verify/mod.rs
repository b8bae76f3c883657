//! Post-transfer integrity validation.
//!
//! Three checks run for every table, each on its own sessions so that a
//! failure in one is recorded on that check and the others still run:
//!
//! 1. Row count: `COUNT(*)` on both sides.
//! 2. Checksum: MD5 over the sorted row strings of the first N rows
//!    (first-column order), see [`checksum`].
//! 3. Sample: the first few rows compared for exact equality.

pub mod checksum;

use crate::connection::{Row, SharedConnector};
use crate::error::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use checksum::{checksum_rows, row_string};

/// One check: the value observed on each side and whether they agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult<T> {
    pub source: Option<T>,
    pub destination: Option<T>,
    #[serde(rename = "match")]
    pub matched: bool,
    pub error: Option<String>,
}

impl<T: PartialEq> CheckResult<T> {
    fn compare(source: T, destination: T) -> Self {
        let matched = source == destination;
        Self {
            source: Some(source),
            destination: Some(destination),
            matched,
            error: None,
        }
    }

    fn failed(error: MigrateError) -> Self {
        Self {
            source: None,
            destination: None,
            matched: false,
            error: Some(error.to_string()),
        }
    }

    fn from_result(result: Result<(T, T)>) -> Self {
        match result {
            Ok((s, d)) => Self::compare(s, d),
            Err(e) => Self::failed(e),
        }
    }
}

/// Outcome of all three checks for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub schema: String,
    pub table: String,
    pub row_count: CheckResult<i64>,
    pub checksum: CheckResult<String>,
    /// Compared values are the number of sample rows read from each side.
    pub sample: CheckResult<usize>,
    pub validation_passed: bool,
}

impl ValidationResult {
    /// Names of checks that did not match.
    pub fn failed_checks(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        if !self.row_count.matched {
            failed.push("row_count");
        }
        if !self.checksum.matched {
            failed.push("checksum");
        }
        if !self.sample.matched {
            failed.push("sample");
        }
        failed
    }
}

/// Compares a migrated table pair.
#[derive(Clone)]
pub struct IntegrityValidator {
    source: SharedConnector,
    destination: SharedConnector,
    /// `None` checksums the whole table.
    checksum_sample: Option<usize>,
    sample_rows: usize,
}

impl IntegrityValidator {
    pub fn new(
        source: SharedConnector,
        destination: SharedConnector,
        checksum_sample: Option<usize>,
        sample_rows: usize,
    ) -> Self {
        Self {
            source,
            destination,
            checksum_sample,
            sample_rows,
        }
    }

    /// Run all three checks. Check failures never short-circuit.
    pub async fn validate_migration(&self, schema: &str, table: &str) -> ValidationResult {
        let row_count = CheckResult::from_result(self.row_counts(schema, table).await);
        let checksum =
            CheckResult::from_result(self.checksums(schema, table, self.checksum_sample).await);

        let sample = match self.samples(schema, table).await {
            Ok((s, d)) => CheckResult {
                source: Some(s.len()),
                destination: Some(d.len()),
                matched: s == d,
                error: None,
            },
            Err(e) => CheckResult::failed(e),
        };

        let validation_passed = row_count.matched && checksum.matched && sample.matched;
        let result = ValidationResult {
            schema: schema.to_string(),
            table: table.to_string(),
            row_count,
            checksum,
            sample,
            validation_passed,
        };

        if validation_passed {
            info!("{}.{}: validation passed", schema, table);
        } else {
            warn!(
                "{}.{}: validation failed ({})",
                schema,
                table,
                result.failed_checks().join(", ")
            );
        }
        result
    }

    /// Checksum of the source side only, used for pre-migration backups.
    pub async fn source_checksum(
        &self,
        schema: &str,
        table: &str,
        sample: Option<usize>,
    ) -> Result<String> {
        one_side_checksum(&self.source, schema, table, sample).await
    }

    /// Checksum of the destination side only, using its own column list.
    pub async fn destination_checksum(
        &self,
        schema: &str,
        table: &str,
        sample: Option<usize>,
    ) -> Result<String> {
        one_side_checksum(&self.destination, schema, table, sample).await
    }

    async fn row_counts(&self, schema: &str, table: &str) -> Result<(i64, i64)> {
        let source = self.source.acquire().await?;
        let destination = self.destination.acquire().await?;
        Ok((
            source.row_count(schema, table).await?,
            destination.row_count(schema, table).await?,
        ))
    }

    async fn checksums(
        &self,
        schema: &str,
        table: &str,
        sample: Option<usize>,
    ) -> Result<(String, String)> {
        let (src, dst) = self.read_both(schema, table, sample).await?;
        Ok((checksum_rows(&src), checksum_rows(&dst)))
    }

    async fn samples(&self, schema: &str, table: &str) -> Result<(Vec<Row>, Vec<Row>)> {
        self.read_both(schema, table, Some(self.sample_rows)).await
    }

    /// Read the same leading rows from both sides using the source column list.
    async fn read_both(
        &self,
        schema: &str,
        table: &str,
        limit: Option<usize>,
    ) -> Result<(Vec<Row>, Vec<Row>)> {
        let source = self.source.acquire().await?;
        let destination = self.destination.acquire().await?;
        let columns = source.columns(schema, table).await?;
        if columns.is_empty() {
            return Err(MigrateError::Validation(format!(
                "{}.{} has no columns on the source",
                schema, table
            )));
        }
        let src = source.fetch_rows(schema, table, &columns, limit, 0).await?;
        let dst = destination
            .fetch_rows(schema, table, &columns, limit, 0)
            .await?;
        Ok((src, dst))
    }
}

async fn one_side_checksum(
    connector: &SharedConnector,
    schema: &str,
    table: &str,
    sample: Option<usize>,
) -> Result<String> {
    let session = connector.acquire().await?;
    let columns = session.columns(schema, table).await?;
    let rows = session.fetch_rows(schema, table, &columns, sample, 0).await?;
    Ok(checksum_rows(&rows))
}
