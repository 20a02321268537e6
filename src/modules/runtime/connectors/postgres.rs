//! PostgreSQL connector implementation

use async_trait::async_trait;
use polyquery_core::{error::Result, PolyqueryError, RdbmsConfig};
use polyquery_types::{EngineType, Row as JsonRow, RowSet};
use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgRow, PgSslMode, Postgres};
use sqlx::query::Query;
use sqlx::{Column, ConnectOptions, Connection, Executor, Row};
use std::str::FromStr;

use super::dialect::{BoundStatement, CatalogDialect, CatalogQuery, Dialect, TableRef};
use super::sql::SqlConnector;
use super::traits::{SqlDriver, SqlSession};

pub type PostgresConnector = SqlConnector<PostgresDriver>;

pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn begin_sql(&self) -> Option<&'static str> {
        Some("BEGIN")
    }

    fn commit_sql(&self) -> Option<&'static str> {
        Some("COMMIT")
    }

    fn rollback_sql(&self) -> Option<&'static str> {
        Some("ROLLBACK")
    }
}

impl CatalogDialect for PostgresDialect {
    fn tables_query(&self, database: Option<&str>) -> CatalogQuery {
        match database {
            Some(schema) => CatalogQuery::new(
                "SELECT table_schema::text AS table_schema, table_name::text AS table_name \
                 FROM information_schema.tables \
                 WHERE table_type = 'BASE TABLE' AND table_schema = ? \
                 ORDER BY table_name",
                vec![json!(schema)],
            ),
            None => CatalogQuery::new(
                "SELECT table_schema::text AS table_schema, table_name::text AS table_name \
                 FROM information_schema.tables \
                 WHERE table_type = 'BASE TABLE' \
                 AND table_schema NOT IN ('pg_catalog', 'information_schema') \
                 AND table_schema NOT LIKE 'pg_toast%' \
                 ORDER BY table_schema, table_name",
                vec![],
            ),
        }
    }

    fn columns_query(&self, table: &TableRef) -> CatalogQuery {
        CatalogQuery::new(
            "SELECT column_name::text AS column_name, data_type::text AS data_type, \
             is_nullable::text AS is_nullable, column_default::text AS column_default, \
             ordinal_position::int AS ordinal_position \
             FROM information_schema.columns \
             WHERE table_schema = ? AND table_name = ? \
             ORDER BY ordinal_position",
            vec![json!(table.schema), json!(table.table)],
        )
    }

    fn indexes_query(&self, table: &TableRef) -> Option<CatalogQuery> {
        Some(CatalogQuery::new(
            "SELECT i.relname::text AS index_name, a.attname::text AS column_name, \
             k.ord::int AS key_ordinal, ix.indisunique AS is_unique, ix.indisprimary AS is_primary \
             FROM pg_index ix \
             JOIN pg_class t ON t.oid = ix.indrelid \
             JOIN pg_class i ON i.oid = ix.indexrelid \
             JOIN pg_namespace n ON n.oid = t.relnamespace \
             CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord) \
             JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
             WHERE n.nspname = ? AND t.relname = ? \
             ORDER BY i.relname, k.ord",
            vec![json!(table.schema), json!(table.table)],
        ))
    }

    fn constraints_query(&self, table: &TableRef) -> Option<CatalogQuery> {
        Some(CatalogQuery::new(
            "SELECT tc.constraint_name::text AS constraint_name, \
             tc.constraint_type::text AS constraint_type, kcu.column_name::text AS column_name \
             FROM information_schema.table_constraints tc \
             LEFT JOIN information_schema.key_column_usage kcu \
             ON kcu.constraint_schema = tc.constraint_schema \
             AND kcu.constraint_name = tc.constraint_name \
             AND kcu.table_name = tc.table_name \
             WHERE tc.table_schema = ? AND tc.table_name = ? \
             ORDER BY tc.constraint_name, kcu.ordinal_position",
            vec![json!(table.schema), json!(table.table)],
        ))
    }

    fn stats_query(&self, table: &TableRef) -> Option<CatalogQuery> {
        Some(CatalogQuery::new(
            "SELECT c.reltuples::bigint AS row_estimate, \
             pg_total_relation_size(c.oid)::bigint AS total_bytes \
             FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = ? AND c.relname = ?",
            vec![json!(table.schema), json!(table.table)],
        ))
    }

    fn default_schema(&self) -> String {
        "public".to_string()
    }
}

pub struct PostgresSession {
    conn: PgConnection,
}

impl PostgresSession {
    fn prepare<'q>(statement: &'q BoundStatement) -> Query<'q, Postgres, PgArguments> {
        statement
            .args
            .iter()
            .fold(sqlx::query(&statement.sql), |query, arg| match arg {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => query.bind(i),
                    None => query.bind(n.as_f64().unwrap_or_default()),
                },
                Value::String(s) => query.bind(s.clone()),
                other => query.bind(sqlx::types::Json(other.clone())),
            })
    }

    /// Convert a PostgreSQL row to a JSON object in column order
    fn row_to_map(row: &PgRow) -> JsonRow {
        row.columns()
            .iter()
            .map(|column| (column.name().to_string(), Self::get_column_value(row, column)))
            .collect()
    }

    /// Get a column value as a JSON value
    fn get_column_value(row: &PgRow, column: &sqlx::postgres::PgColumn) -> Value {
        use sqlx::TypeInfo;

        let type_name = column.type_info().name();
        let idx = column.ordinal();

        match type_name {
            "BOOL" => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(Value::Bool)
                .unwrap_or(Value::Null),
            "INT2" => row
                .try_get::<Option<i16>, _>(idx)
                .ok()
                .flatten()
                .map(|v| Value::Number(v.into()))
                .unwrap_or(Value::Null),
            "INT4" => row
                .try_get::<Option<i32>, _>(idx)
                .ok()
                .flatten()
                .map(|v| Value::Number(v.into()))
                .unwrap_or(Value::Null),
            "INT8" => row
                .try_get::<Option<i64>, _>(idx)
                .ok()
                .flatten()
                .map(|v| Value::Number(v.into()))
                .unwrap_or(Value::Null),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(idx)
                .ok()
                .flatten()
                .and_then(|v| serde_json::Number::from_f64(v as f64))
                .map(Value::Number)
                .unwrap_or(Value::Null),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            "NUMERIC" => row
                .try_get::<Option<rust_decimal::Decimal>, _>(idx)
                .ok()
                .flatten()
                .and_then(|v| v.to_f64())
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            "UUID" => row
                .try_get::<Option<uuid::Uuid>, _>(idx)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null),
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_rfc3339()))
                .unwrap_or(Value::Null),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(idx)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null),
            "JSON" | "JSONB" => row
                .try_get::<Option<Value>, _>(idx)
                .ok()
                .flatten()
                .unwrap_or(Value::Null),
            _ => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(Value::String)
                .unwrap_or(Value::Null),
        }
    }
}

fn query_error(e: sqlx::Error) -> PolyqueryError {
    PolyqueryError::QueryExecution(format!("PostgreSQL query failed: {}", e))
}

#[async_trait]
impl SqlSession for PostgresSession {
    async fn fetch(&mut self, statement: &BoundStatement) -> Result<RowSet> {
        let rows = Self::prepare(statement)
            .fetch_all(&mut self.conn)
            .await
            .map_err(query_error)?;
        Ok(rows.iter().map(Self::row_to_map).collect())
    }

    async fn execute(&mut self, statement: &BoundStatement) -> Result<u64> {
        let result = Self::prepare(statement)
            .execute(&mut self.conn)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }

    async fn control(&mut self, sql: &str) -> Result<()> {
        (&mut self.conn).execute(sql).await.map_err(query_error)?;
        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.conn
            .close()
            .await
            .map_err(|e| PolyqueryError::Database(format!("PostgreSQL close failed: {}", e)))
    }
}

pub struct PostgresDriver {
    config: RdbmsConfig,
    dialect: PostgresDialect,
}

impl PostgresDriver {
    pub fn new(config: RdbmsConfig) -> Self {
        Self {
            config,
            dialect: PostgresDialect,
        }
    }

    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        let ssl_mode = PgSslMode::from_str(&self.config.sslmode).map_err(|_| {
            PolyqueryError::Config(format!("unsupported sslmode '{}'", self.config.sslmode))
        })?;
        Ok(PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.user)
            .password(&self.config.password)
            .database(&self.config.database)
            .ssl_mode(ssl_mode))
    }
}

#[async_trait]
impl SqlDriver for PostgresDriver {
    type Session = PostgresSession;
    type Dialect = PostgresDialect;

    fn engine(&self) -> EngineType {
        EngineType::Postgres
    }

    fn dialect(&self) -> &PostgresDialect {
        &self.dialect
    }

    async fn open(&self) -> Result<PostgresSession> {
        let conn = self
            .connect_options()?
            .connect()
            .await
            .map_err(|e| PolyqueryError::Database(format!("PostgreSQL connection failed: {}", e)))?;
        Ok(PostgresSession { conn })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::dialect::bind;
    use crate::connectors::traits::Connector;
    use polyquery_types::QueryParams;
    use std::time::Duration;

    fn config() -> RdbmsConfig {
        RdbmsConfig {
            host: "localhost".into(),
            port: 5432,
            user: "postgres".into(),
            password: "postgres".into(),
            database: "test".into(),
            sslmode: "prefer".into(),
        }
    }

    #[test]
    fn test_catalog_queries_bind_to_dollar_placeholders() {
        let dialect = PostgresDialect;
        let table = dialect.table_ref("orders", None);
        assert_eq!(table.schema, "public");

        let query = dialect.columns_query(&table);
        let params = QueryParams::Positional(query.args);
        let bound = bind(&dialect, &query.sql, Some(&params)).unwrap();
        assert!(bound.sql.contains("table_schema = $1 AND table_name = $2"));
        assert!(bound.sql.contains("column_name::text"));
        assert_eq!(bound.args, vec![json!("public"), json!("orders")]);
    }

    #[test]
    fn test_qualified_table_ref() {
        let table = PostgresDialect.table_ref("sales.orders", None);
        assert_eq!(table.schema, "sales");
        assert_eq!(table.table, "orders");
        assert!(PostgresDialect.tables_query(None).args.is_empty());
    }

    #[test]
    fn test_connect_options_reject_unknown_sslmode() {
        let mut config = config();
        config.sslmode = "sometimes".into();
        assert!(PostgresDriver::new(config).connect_options().is_err());
        assert!(PostgresDriver::new(self::config()).connect_options().is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires a running PostgreSQL instance
    async fn test_postgres_select_one() {
        let connector = SqlConnector::new("pg_prod", PostgresDriver::new(config()), Duration::from_secs(10));
        assert!(connector.connect().await);
        let rows = connector.execute_query("SELECT 1", None).await.unwrap();
        assert_eq!(Value::Object(rows[0].clone()), json!({"?column?": 1}));
        assert!(connector.disconnect().await);
    }
}
