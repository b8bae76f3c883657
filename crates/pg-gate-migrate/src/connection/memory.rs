//! In-memory database for tests.
//!
//! Mirrors the PostgreSQL session semantics closely enough for the transfer,
//! validation and workflow paths: first-column ordering, LIMIT/OFFSET paging
//! and size-ordered table listing. Failures can be injected per operation.

use super::{Connector, Row, Session, SqlValue};
use crate::error::{MigrateError, Result};
use crate::schema::{
    ColumnDescriptor, ConstraintDescriptor, DatabaseSize, IndexDescriptor, ServerSetting,
    TableDescriptor,
};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
pub(crate) struct MemTable {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Row>,
    pub size_bytes: Option<i64>,
}

#[derive(Debug, Default)]
struct MemState {
    tables: BTreeMap<(String, String), MemTable>,
    /// Remaining injected failures keyed by (operation, table).
    failures: HashMap<(String, String), usize>,
    /// Calls keyed by (operation, table).
    calls: HashMap<(String, String), usize>,
    inserts: usize,
    fail_inserts_after: Option<usize>,
}

/// Connector over a shared in-memory database.
#[derive(Clone)]
pub(crate) struct MemoryDatabase {
    name: String,
    state: Arc<Mutex<MemState>>,
}

pub(crate) fn column(name: &str, data_type: &str, nullable: bool) -> ColumnDescriptor {
    ColumnDescriptor {
        name: name.to_string(),
        data_type: data_type.to_string(),
        formatted_type: data_type.to_string(),
        is_nullable: nullable,
        default: None,
        max_length: None,
    }
}

/// `id integer, name text` rows `1..=n`.
pub(crate) fn numbered_rows(n: usize) -> Vec<Row> {
    (1..=n)
        .map(|i| vec![SqlValue::Text(i.to_string()), SqlValue::Text(format!("row-{}", i))])
        .collect()
}

pub(crate) fn id_name_columns() -> Vec<ColumnDescriptor> {
    vec![column("id", "integer", false), column("name", "text", true)]
}

fn compare_values(a: &SqlValue, b: &SqlValue) -> Ordering {
    match (a, b) {
        (SqlValue::Null, SqlValue::Null) => Ordering::Equal,
        (SqlValue::Null, _) => Ordering::Greater,
        (_, SqlValue::Null) => Ordering::Less,
        (SqlValue::Text(x), SqlValue::Text(y)) => match (x.parse::<i64>(), y.parse::<i64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        },
    }
}

impl MemoryDatabase {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MemState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap()
    }

    pub fn add_table(&self, schema: &str, table: &str, columns: Vec<ColumnDescriptor>, rows: Vec<Row>) {
        self.lock().tables.insert(
            (schema.to_string(), table.to_string()),
            MemTable {
                columns,
                rows,
                size_bytes: None,
            },
        );
    }

    pub fn set_size(&self, schema: &str, table: &str, size_bytes: i64) {
        if let Some(t) = self.lock().tables.get_mut(&(schema.to_string(), table.to_string())) {
            t.size_bytes = Some(size_bytes);
        }
    }

    pub fn table(&self, schema: &str, table: &str) -> Option<MemTable> {
        self.lock()
            .tables
            .get(&(schema.to_string(), table.to_string()))
            .cloned()
    }

    pub fn set_cell(&self, schema: &str, table: &str, row: usize, col: usize, value: SqlValue) {
        if let Some(t) = self.lock().tables.get_mut(&(schema.to_string(), table.to_string())) {
            t.rows[row][col] = value;
        }
    }

    /// Make the next `times` calls of `op` on `table` fail.
    pub fn fail_next(&self, op: &str, table: &str, times: usize) {
        self.lock()
            .failures
            .insert((op.to_string(), table.to_string()), times);
    }

    /// Fail every insert after `n` successful ones.
    pub fn fail_inserts_after(&self, n: usize) {
        self.lock().fail_inserts_after = Some(n);
    }

    pub fn calls(&self, op: &str, table: &str) -> usize {
        self.lock()
            .calls
            .get(&(op.to_string(), table.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    fn enter(&self, op: &str, table: &str) -> Result<MutexGuard<'_, MemState>> {
        let mut state = self.lock();
        let key = (op.to_string(), table.to_string());
        *state.calls.entry(key.clone()).or_insert(0) += 1;
        if let Some(remaining) = state.failures.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(MigrateError::Validation(format!(
                    "injected {} failure on {}",
                    op, table
                )));
            }
        }
        Ok(state)
    }
}

fn missing(schema: &str, table: &str) -> MigrateError {
    MigrateError::Validation(format!("relation \"{}.{}\" does not exist", schema, table))
}

fn key(schema: &str, table: &str) -> (String, String) {
    (schema.to_string(), table.to_string())
}

#[async_trait]
impl Connector for MemoryDatabase {
    fn endpoint(&self) -> String {
        format!("memory/{}", self.name)
    }

    async fn acquire(&self) -> Result<Box<dyn Session>> {
        let endpoint = self.endpoint();
        let _guard = self
            .enter("acquire", "")
            .map_err(|e| MigrateError::connection(endpoint, e))?;
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl Session for MemoryDatabase {
    async fn ping(&self) -> Result<()> {
        let _guard = self.enter("ping", "")?;
        Ok(())
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        let state = self.enter("list_schemas", "")?;
        let mut schemas: Vec<String> = state.tables.keys().map(|(s, _)| s.clone()).collect();
        schemas.dedup();
        Ok(schemas)
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableDescriptor>> {
        let state = self.enter("list_tables", schema)?;
        let mut tables: Vec<TableDescriptor> = state
            .tables
            .iter()
            .filter(|((s, _), _)| s == schema)
            .map(|((s, name), t)| {
                let size = t.size_bytes.unwrap_or(8192 + 64 * t.rows.len() as i64);
                TableDescriptor {
                    schema: s.clone(),
                    name: name.clone(),
                    size_bytes: size,
                    size_pretty: format!("{} bytes", size),
                    column_count: t.columns.len() as i64,
                }
            })
            .collect();
        tables.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes).then(a.name.cmp(&b.name)));
        Ok(tables)
    }

    async fn columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let state = self.enter("columns", table)?;
        // PostgreSQL returns an empty column list for unknown tables.
        Ok(state
            .tables
            .get(&key(schema, table))
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn indexes(&self, _schema: &str, table: &str) -> Result<Vec<IndexDescriptor>> {
        let _guard = self.enter("indexes", table)?;
        Ok(Vec::new())
    }

    async fn constraints(&self, _schema: &str, table: &str) -> Result<Vec<ConstraintDescriptor>> {
        let _guard = self.enter("constraints", table)?;
        Ok(Vec::new())
    }

    async fn row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let state = self.enter("row_count", table)?;
        state
            .tables
            .get(&key(schema, table))
            .map(|t| t.rows.len() as i64)
            .ok_or_else(|| missing(schema, table))
    }

    async fn fetch_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDescriptor],
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Row>> {
        let state = self.enter("fetch_rows", table)?;
        let t = state
            .tables
            .get(&key(schema, table))
            .ok_or_else(|| missing(schema, table))?;
        let mut rows = t.rows.clone();
        rows.sort_by(|a, b| match (a.first(), b.first()) {
            (Some(x), Some(y)) => compare_values(x, y),
            _ => Ordering::Equal,
        });
        let width = columns.len();
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(|mut r| {
                r.truncate(width);
                r
            })
            .collect())
    }

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let state = self.enter("table_exists", table)?;
        Ok(state.tables.contains_key(&key(schema, table)))
    }

    async fn create_table(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDescriptor],
    ) -> Result<()> {
        let mut state = self.enter("create_table", table)?;
        state.tables.insert(
            key(schema, table),
            MemTable {
                columns: columns.to_vec(),
                rows: Vec::new(),
                size_bytes: None,
            },
        );
        Ok(())
    }

    async fn insert_row(
        &self,
        schema: &str,
        table: &str,
        _columns: &[ColumnDescriptor],
        row: &[SqlValue],
    ) -> Result<()> {
        let mut state = self.enter("insert_row", table)?;
        if let Some(limit) = state.fail_inserts_after {
            if state.inserts >= limit {
                return Err(MigrateError::Validation(format!(
                    "duplicate key value violates unique constraint on {}",
                    table
                )));
            }
        }
        state.inserts += 1;
        let t = state
            .tables
            .get_mut(&key(schema, table))
            .ok_or_else(|| missing(schema, table))?;
        t.rows.push(row.to_vec());
        Ok(())
    }

    async fn database_size(&self) -> Result<DatabaseSize> {
        let _guard = self.enter("database_size", "")?;
        Ok(DatabaseSize {
            bytes: 8_388_608,
            pretty: "8192 kB".to_string(),
        })
    }

    async fn version(&self) -> Result<String> {
        let _guard = self.enter("version", "")?;
        Ok("PostgreSQL 16.2 (memory)".to_string())
    }

    async fn settings(&self) -> Result<Vec<ServerSetting>> {
        let _guard = self.enter("settings", "")?;
        Ok(vec![ServerSetting {
            name: "shared_buffers".to_string(),
            setting: "16384".to_string(),
            unit: Some("8kB".to_string()),
            category: "Resource Usage / Memory".to_string(),
        }])
    }
}
