//! PostgreSQL sessions over deadpool-postgres.

use super::dialect::{PostgresDialect, SelectQueryOptions};
use super::tls::{SslMode, TlsBuilder};
use super::{Connector, Row, Session, SqlValue};
use crate::config::ConnectionConfig;
use crate::error::{MigrateError, Result};
use crate::schema::{
    ColumnDescriptor, ConstraintDescriptor, DatabaseSize, IndexDescriptor, ServerSetting,
    TableDescriptor,
};
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, warn};

/// Handshake bound for new connections.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sessions held at once per side: the transfer engine keeps one open
/// while the validator or introspector may open another.
const MAX_SESSIONS: usize = 2;

const SETTING_CATEGORIES: &[&str] = &[
    "Resource Usage / Memory",
    "Write-Ahead Log / Settings",
    "Replication / Sending Servers",
    "Client Connection Defaults / Locale and Formatting",
];

/// Connector for one PostgreSQL database.
pub struct PgConnector {
    pool: Pool,
    endpoint: String,
}

impl PgConnector {
    /// Build a connector. No connection is opened until [`Connector::acquire`].
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let ssl_mode = SslMode::parse(&config.ssl_mode)?;

        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.connect_timeout(CONNECT_TIMEOUT);
        pg_config.ssl_mode(ssl_mode.driver_mode());
        pg_config.application_name("pg-gate-migrate");

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = match TlsBuilder::new(ssl_mode).build()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => {
                warn!(
                    "TLS is disabled for {}. Credentials will be transmitted in plaintext.",
                    config.endpoint()
                );
                Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
            }
        };

        let pool = Pool::builder(mgr)
            .max_size(MAX_SESSIONS)
            .runtime(Runtime::Tokio1)
            .create_timeout(Some(CONNECT_TIMEOUT))
            .build()
            .map_err(|e| MigrateError::connection(config.endpoint(), e))?;

        Ok(Self {
            pool,
            endpoint: config.endpoint(),
        })
    }
}

#[async_trait]
impl Connector for PgConnector {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn acquire(&self) -> Result<Box<dyn Session>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::connection(&self.endpoint, e))?;
        debug!("Acquired session on {}", self.endpoint);
        Ok(Box::new(PgSession {
            client,
            dialect: PostgresDialect::new(),
        }))
    }
}

/// A pooled client; returned to the pool on drop.
struct PgSession {
    client: Object,
    dialect: PostgresDialect,
}

#[async_trait]
impl Session for PgSession {
    async fn ping(&self) -> Result<()> {
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn list_schemas(&self) -> Result<Vec<String>> {
        let query = r#"
            SELECT schema_name::text
            FROM information_schema.schemata
            WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
              AND schema_name NOT LIKE 'pg_temp_%'
              AND schema_name NOT LIKE 'pg_toast_temp_%'
            ORDER BY schema_name
        "#;
        let rows = self.client.query(query, &[]).await?;
        rows.iter()
            .map(|r| r.try_get::<_, String>(0).map_err(MigrateError::from))
            .collect()
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableDescriptor>> {
        let query = r#"
            SELECT
                t.table_name::text,
                pg_total_relation_size(
                    (quote_ident(t.table_schema) || '.' || quote_ident(t.table_name))::regclass
                )::int8 AS size_bytes,
                pg_size_pretty(pg_total_relation_size(
                    (quote_ident(t.table_schema) || '.' || quote_ident(t.table_name))::regclass
                ))::text,
                (SELECT COUNT(*) FROM information_schema.columns c
                 WHERE c.table_schema = t.table_schema AND c.table_name = t.table_name)::int8
            FROM information_schema.tables t
            WHERE t.table_schema = $1 AND t.table_type = 'BASE TABLE'
            ORDER BY size_bytes DESC, t.table_name
        "#;
        let rows = self.client.query(query, &[&schema]).await?;
        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            tables.push(TableDescriptor {
                schema: schema.to_string(),
                name: row.try_get(0)?,
                size_bytes: row.try_get(1)?,
                size_pretty: row.try_get(2)?,
                column_count: row.try_get(3)?,
            });
        }
        debug!("Listed {} tables in schema {}", tables.len(), schema);
        Ok(tables)
    }

    async fn columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let query = r#"
            SELECT
                c.column_name::text,
                c.data_type::text,
                format_type(a.atttypid, a.atttypmod),
                c.is_nullable::text = 'YES',
                c.column_default::text,
                c.character_maximum_length::int4
            FROM information_schema.columns c
            JOIN pg_catalog.pg_namespace n ON n.nspname = c.table_schema
            JOIN pg_catalog.pg_class cl ON cl.relnamespace = n.oid AND cl.relname = c.table_name
            JOIN pg_catalog.pg_attribute a ON a.attrelid = cl.oid AND a.attname = c.column_name
            WHERE c.table_schema = $1 AND c.table_name = $2
            ORDER BY c.ordinal_position
        "#;
        let rows = self.client.query(query, &[&schema, &table]).await?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            columns.push(ColumnDescriptor {
                name: row.try_get(0)?,
                data_type: row.try_get(1)?,
                formatted_type: row.try_get(2)?,
                is_nullable: row.try_get(3)?,
                default: row.try_get(4)?,
                max_length: row.try_get(5)?,
            });
        }
        Ok(columns)
    }

    async fn indexes(&self, schema: &str, table: &str) -> Result<Vec<IndexDescriptor>> {
        let query = r#"
            SELECT indexname::text, indexdef
            FROM pg_indexes
            WHERE schemaname = $1 AND tablename = $2
            ORDER BY indexname
        "#;
        let rows = self.client.query(query, &[&schema, &table]).await?;
        let mut indexes = Vec::with_capacity(rows.len());
        for row in rows {
            indexes.push(IndexDescriptor {
                name: row.try_get(0)?,
                definition: row.try_get(1)?,
            });
        }
        Ok(indexes)
    }

    async fn constraints(&self, schema: &str, table: &str) -> Result<Vec<ConstraintDescriptor>> {
        let query = r#"
            SELECT tc.constraint_name::text, tc.constraint_type::text, kcu.column_name::text
            FROM information_schema.table_constraints tc
            LEFT JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
             AND tc.table_name = kcu.table_name
            WHERE tc.table_schema = $1 AND tc.table_name = $2
            ORDER BY tc.constraint_name, kcu.ordinal_position
        "#;
        let rows = self.client.query(query, &[&schema, &table]).await?;
        let mut constraints = Vec::with_capacity(rows.len());
        for row in rows {
            constraints.push(ConstraintDescriptor {
                name: row.try_get(0)?,
                constraint_type: row.try_get(1)?,
                column: row.try_get(2)?,
            });
        }
        Ok(constraints)
    }

    async fn row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let query = self.dialect.build_count_query(schema, table);
        let row = self.client.query_one(&query, &[]).await?;
        Ok(row.try_get::<_, i64>(0)?)
    }

    async fn fetch_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDescriptor],
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Row>> {
        let query = self.dialect.build_select_query(&SelectQueryOptions {
            schema,
            table,
            columns,
            limit,
            offset,
        });
        let rows = self.client.query(&query, &[]).await?;
        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                values.push(SqlValue::from(row.try_get::<_, Option<String>>(idx)?));
            }
            result.push(values);
        }
        Ok(result)
    }

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let query = r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )
        "#;
        let row = self.client.query_one(query, &[&schema, &table]).await?;
        Ok(row.try_get::<_, bool>(0)?)
    }

    async fn create_table(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDescriptor],
    ) -> Result<()> {
        let ddl = self.dialect.build_create_table(schema, table, columns);
        debug!("Executing DDL: {}", ddl);
        self.client.batch_execute(&ddl).await?;
        Ok(())
    }

    async fn insert_row(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDescriptor],
        row: &[SqlValue],
    ) -> Result<()> {
        let sql = self.dialect.build_insert(schema, table, columns);
        let stmt = self.client.prepare_cached(&sql).await?;
        let texts: Vec<Option<&str>> = row.iter().map(SqlValue::as_text).collect();
        let params: Vec<&(dyn ToSql + Sync)> =
            texts.iter().map(|t| t as &(dyn ToSql + Sync)).collect();
        self.client.execute(&stmt, &params).await?;
        Ok(())
    }

    async fn database_size(&self) -> Result<DatabaseSize> {
        let query = r#"
            SELECT pg_database_size(current_database())::int8,
                   pg_size_pretty(pg_database_size(current_database()))::text
        "#;
        let row = self.client.query_one(query, &[]).await?;
        Ok(DatabaseSize {
            bytes: row.try_get(0)?,
            pretty: row.try_get(1)?,
        })
    }

    async fn version(&self) -> Result<String> {
        let row = self.client.query_one("SELECT version()", &[]).await?;
        Ok(row.try_get(0)?)
    }

    async fn settings(&self) -> Result<Vec<ServerSetting>> {
        let query = r#"
            SELECT name::text, setting::text, unit::text, category::text
            FROM pg_settings
            WHERE category = ANY($1)
            ORDER BY category, name
        "#;
        let categories: Vec<&str> = SETTING_CATEGORIES.to_vec();
        let rows = self.client.query(query, &[&categories]).await?;
        let mut settings = Vec::with_capacity(rows.len());
        for row in rows {
            settings.push(ServerSetting {
                name: row.try_get(0)?,
                setting: row.try_get(1)?,
                unit: row.try_get(2)?,
                category: row.try_get(3)?,
            });
        }
        Ok(settings)
    }
}
