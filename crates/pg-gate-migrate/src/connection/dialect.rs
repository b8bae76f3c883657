//! PostgreSQL SQL generation.
//!
//! Provides identifier quoting and the handful of statements the transfer
//! and validation paths issue against user tables.

use crate::schema::ColumnDescriptor;

/// Options for building a paginated SELECT.
#[derive(Debug, Clone, Default)]
pub struct SelectQueryOptions<'a> {
    pub schema: &'a str,
    pub table: &'a str,
    pub columns: &'a [ColumnDescriptor],
    pub limit: Option<usize>,
    pub offset: usize,
}

/// PostgreSQL dialect.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self
    }

    /// Quote an identifier, doubling embedded quotes.
    pub fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// `"schema"."table"`
    pub fn qualify(&self, schema: &str, table: &str) -> String {
        format!("{}.{}", self.quote_ident(schema), self.quote_ident(table))
    }

    pub fn build_count_query(&self, schema: &str, table: &str) -> String {
        format!("SELECT COUNT(*) FROM {}", self.qualify(schema, table))
    }

    /// Select every column cast to text, ordered by the first column.
    pub fn build_select_query(&self, opts: &SelectQueryOptions<'_>) -> String {
        let cols = if opts.columns.is_empty() {
            "*".to_string()
        } else {
            opts.columns
                .iter()
                .map(|c| format!("{}::text", self.quote_ident(&c.name)))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", cols, self.qualify(opts.schema, opts.table));

        if let Some(first) = opts.columns.first() {
            sql.push_str(&format!(" ORDER BY {}", self.quote_ident(&first.name)));
        }
        if let Some(limit) = opts.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if opts.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", opts.offset));
        }

        sql
    }

    /// CREATE TABLE mirroring name, type, length, nullability and default.
    pub fn build_create_table(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDescriptor],
    ) -> String {
        let defs = columns
            .iter()
            .map(|c| self.column_definition(c))
            .collect::<Vec<_>>()
            .join(",\n    ");

        format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.qualify(schema, table),
            defs
        )
    }

    fn column_definition(&self, col: &ColumnDescriptor) -> String {
        let mut def = format!("{} {}", self.quote_ident(&col.name), self.column_type(col));
        if !col.is_nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &col.default {
            def.push_str(&format!(" DEFAULT {}", default));
        }
        def
    }

    /// Destination type for a column. The formatted type already carries
    /// modifiers; the bare data type needs the length appended.
    pub fn column_type(&self, col: &ColumnDescriptor) -> String {
        if !col.formatted_type.is_empty() {
            return col.formatted_type.clone();
        }
        match col.max_length {
            Some(len) if len > 0 => format!("{}({})", col.data_type, len),
            _ => col.data_type.clone(),
        }
    }

    /// Single-row INSERT with text parameters cast to each column type.
    pub fn build_insert(&self, schema: &str, table: &str, columns: &[ColumnDescriptor]) -> String {
        let names = columns
            .iter()
            .map(|c| self.quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let params = columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("${}::text::{}", i + 1, self.column_type(c)))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualify(schema, table),
            names,
            params
        )
    }
}
