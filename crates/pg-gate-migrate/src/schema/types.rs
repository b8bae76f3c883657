//! Catalog metadata returned by introspection.

use serde::{Deserialize, Serialize};

/// A user table with live size metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    /// Total relation size including indexes and TOAST.
    pub size_bytes: i64,
    /// Human readable size as reported by `pg_size_pretty`.
    pub size_pretty: String,
    pub column_count: i64,
}

impl TableDescriptor {
    /// Get fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// `information_schema` data type, e.g. `character varying`.
    pub data_type: String,
    /// Full type with modifiers, e.g. `character varying(50)`.
    pub formatted_type: String,
    pub is_nullable: bool,
    pub default: Option<String>,
    pub max_length: Option<i32>,
}

/// Index metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub name: String,
    pub definition: String,
}

/// Constraint metadata. One entry per constrained column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConstraintDescriptor {
    pub name: String,
    pub constraint_type: String,
    pub column: Option<String>,
}

/// Full structure of one table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableStructure {
    /// Columns in ordinal order.
    pub columns: Vec<ColumnDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
    pub constraints: Vec<ConstraintDescriptor>,
}

impl TableStructure {
    /// Column used for deterministic batch and sample ordering.
    pub fn order_column(&self) -> Option<&str> {
        self.columns.first().map(|c| c.name.as_str())
    }
}

/// Database size as bytes and pretty text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseSize {
    pub bytes: i64,
    pub pretty: String,
}

/// One server setting from `pg_settings`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSetting {
    pub name: String,
    pub setting: String,
    pub unit: Option<String>,
    pub category: String,
}
