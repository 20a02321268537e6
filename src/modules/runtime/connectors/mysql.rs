//! MySQL connector implementation

use async_trait::async_trait;
use polyquery_core::{error::Result, PolyqueryError, RdbmsConfig};
use polyquery_types::{EngineType, Row as JsonRow, RowSet};
use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value};
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow, MySqlSslMode};
use sqlx::query::Query;
use sqlx::{Column, ConnectOptions, Connection, Executor, Row};
use std::str::FromStr;

use super::dialect::{BoundStatement, CatalogDialect, CatalogQuery, Dialect, TableRef};
use super::sql::SqlConnector;
use super::traits::{SqlDriver, SqlSession};

pub type MysqlConnector = SqlConnector<MysqlDriver>;

pub struct MysqlDialect {
    database: String,
}

impl MysqlDialect {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
        }
    }
}

impl Dialect for MysqlDialect {
    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn backslash_escapes(&self) -> bool {
        true
    }

    fn begin_sql(&self) -> Option<&'static str> {
        Some("START TRANSACTION")
    }

    fn commit_sql(&self) -> Option<&'static str> {
        Some("COMMIT")
    }

    fn rollback_sql(&self) -> Option<&'static str> {
        Some("ROLLBACK")
    }
}

impl CatalogDialect for MysqlDialect {
    fn tables_query(&self, database: Option<&str>) -> CatalogQuery {
        CatalogQuery::new(
            "SELECT table_schema AS table_schema, table_name AS table_name \
             FROM information_schema.tables \
             WHERE table_type = 'BASE TABLE' AND table_schema = ? \
             ORDER BY table_name",
            vec![json!(database.unwrap_or(&self.database))],
        )
    }

    fn columns_query(&self, table: &TableRef) -> CatalogQuery {
        CatalogQuery::new(
            "SELECT column_name AS column_name, column_type AS data_type, \
             is_nullable AS is_nullable, column_default AS column_default, \
             ordinal_position AS ordinal_position \
             FROM information_schema.columns \
             WHERE table_schema = ? AND table_name = ? \
             ORDER BY ordinal_position",
            vec![json!(table.schema), json!(table.table)],
        )
    }

    fn indexes_query(&self, table: &TableRef) -> Option<CatalogQuery> {
        Some(CatalogQuery::new(
            "SELECT index_name AS index_name, column_name AS column_name, \
             seq_in_index AS key_ordinal, (non_unique = 0) AS is_unique, \
             (index_name = 'PRIMARY') AS is_primary \
             FROM information_schema.statistics \
             WHERE table_schema = ? AND table_name = ? \
             ORDER BY index_name, seq_in_index",
            vec![json!(table.schema), json!(table.table)],
        ))
    }

    fn constraints_query(&self, table: &TableRef) -> Option<CatalogQuery> {
        Some(CatalogQuery::new(
            "SELECT tc.constraint_name AS constraint_name, tc.constraint_type AS constraint_type, \
             kcu.column_name AS column_name \
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
            "SELECT table_rows AS row_estimate, \
             (data_length + index_length) AS total_bytes, engine AS storage_engine \
             FROM information_schema.tables \
             WHERE table_schema = ? AND table_name = ?",
            vec![json!(table.schema), json!(table.table)],
        ))
    }

    fn default_schema(&self) -> String {
        self.database.clone()
    }
}

pub struct MysqlSession {
    conn: MySqlConnection,
}

impl MysqlSession {
    fn prepare<'q>(statement: &'q BoundStatement) -> Query<'q, MySql, MySqlArguments> {
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

    /// Convert a MySQL row to a JSON object in column order
    fn row_to_map(row: &MySqlRow) -> JsonRow {
        row.columns()
            .iter()
            .map(|column| (column.name().to_string(), Self::get_column_value(row, column)))
            .collect()
    }

    /// Get a column value as a JSON value
    fn get_column_value(row: &MySqlRow, column: &sqlx::mysql::MySqlColumn) -> Value {
        use sqlx::TypeInfo;

        let idx = column.ordinal();
        match Decoding::for_type(column.type_info().name()) {
            Decoding::Bool => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(Value::Bool)
                .unwrap_or(Value::Null),
            Decoding::Signed => row
                .try_get::<Option<i64>, _>(idx)
                .ok()
                .flatten()
                .map(|v| Value::Number(v.into()))
                .unwrap_or(Value::Null),
            Decoding::Unsigned => row
                .try_get::<Option<u64>, _>(idx)
                .ok()
                .flatten()
                .map(|v| Value::Number(v.into()))
                .unwrap_or(Value::Null),
            Decoding::Float => row
                .try_get::<Option<f32>, _>(idx)
                .ok()
                .flatten()
                .map(|v| float_value(v as f64))
                .unwrap_or(Value::Null),
            Decoding::Double => row
                .try_get::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .map(float_value)
                .unwrap_or(Value::Null),
            Decoding::Decimal => row
                .try_get::<Option<rust_decimal::Decimal>, _>(idx)
                .ok()
                .flatten()
                .map(decimal_value)
                .unwrap_or(Value::Null),
            Decoding::DateTime => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null),
            Decoding::Date => row
                .try_get::<Option<chrono::NaiveDate>, _>(idx)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null),
            Decoding::Json => row
                .try_get::<Option<Value>, _>(idx)
                .ok()
                .flatten()
                .unwrap_or(Value::Null),
            Decoding::Bytes => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| bytes_value(&v))
                .unwrap_or(Value::Null),
            Decoding::Text => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(Value::String)
                .unwrap_or(Value::Null),
        }
    }
}

/// How a column of a given MySQL type is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoding {
    Bool,
    Signed,
    Unsigned,
    Float,
    Double,
    Decimal,
    DateTime,
    Date,
    Json,
    Bytes,
    Text,
}

impl Decoding {
    fn for_type(type_name: &str) -> Self {
        match type_name {
            "BOOLEAN" => Decoding::Bool,
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => Decoding::Signed,
            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
            | "BIGINT UNSIGNED" => Decoding::Unsigned,
            "FLOAT" => Decoding::Float,
            "DOUBLE" => Decoding::Double,
            "DECIMAL" => Decoding::Decimal,
            "DATETIME" | "TIMESTAMP" => Decoding::DateTime,
            "DATE" => Decoding::Date,
            "JSON" => Decoding::Json,
            // information_schema reports many columns as binary strings
            "VARBINARY" | "BINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
                Decoding::Bytes
            }
            _ => Decoding::Text,
        }
    }
}

fn float_value(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Decimals that fit an f64 become numbers, others keep their exact text
fn decimal_value(v: rust_decimal::Decimal) -> Value {
    if v.fract().is_zero() {
        if let Some(i) = v.to_i64() {
            return Value::Number(i.into());
        }
    }
    v.to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(v.to_string()))
}

fn bytes_value(bytes: &[u8]) -> Value {
    Value::String(String::from_utf8_lossy(bytes).into_owned())
}

fn query_error(e: sqlx::Error) -> PolyqueryError {
    PolyqueryError::QueryExecution(format!("MySQL query failed: {}", e))
}

#[async_trait]
impl SqlSession for MysqlSession {
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
            .map_err(|e| PolyqueryError::Database(format!("MySQL close failed: {}", e)))
    }
}

pub struct MysqlDriver {
    config: RdbmsConfig,
    dialect: MysqlDialect,
}

impl MysqlDriver {
    pub fn new(config: RdbmsConfig) -> Self {
        let dialect = MysqlDialect::new(config.database.clone());
        Self { config, dialect }
    }

    pub fn connect_options(&self) -> Result<MySqlConnectOptions> {
        let ssl_mode = MySqlSslMode::from_str(&self.config.sslmode).map_err(|_| {
            PolyqueryError::Config(format!("unsupported ssl_mode '{}'", self.config.sslmode))
        })?;
        Ok(MySqlConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.user)
            .password(&self.config.password)
            .database(&self.config.database)
            .ssl_mode(ssl_mode))
    }
}

#[async_trait]
impl SqlDriver for MysqlDriver {
    type Session = MysqlSession;
    type Dialect = MysqlDialect;

    fn engine(&self) -> EngineType {
        EngineType::Mysql
    }

    fn dialect(&self) -> &MysqlDialect {
        &self.dialect
    }

    async fn open(&self) -> Result<MysqlSession> {
        let conn = self
            .connect_options()?
            .connect()
            .await
            .map_err(|e| PolyqueryError::Database(format!("MySQL connection failed: {}", e)))?;
        Ok(MysqlSession { conn })
    }
}
