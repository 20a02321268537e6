//! Oracle connector implementation
//!
//! The `oracle` driver is synchronous; every call runs on the blocking pool.

use async_trait::async_trait;
use oracle::sql_type::{OracleType, ToSql};
use oracle::{Connection, SqlValue};
use polyquery_core::{error::Result, OracleConfig, PolyqueryError};
use polyquery_types::{EngineType, Row, RowSet};
use serde_json::{json, Value};
use std::sync::Arc;

use super::dialect::{BoundStatement, CatalogDialect, CatalogQuery, Dialect, TableRef};
use super::sql::SqlConnector;
use super::traits::{SqlDriver, SqlSession};

pub type OracleConnector = SqlConnector<OracleDriver>;

pub struct OracleDialect {
    owner: String,
}

impl OracleDialect {
    pub fn new(user: &str) -> Self {
        Self {
            owner: user.to_uppercase(),
        }
    }
}

impl Dialect for OracleDialect {
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!(":{}", index)
    }

    fn begin_sql(&self) -> Option<&'static str> {
        None
    }

    fn commit_sql(&self) -> Option<&'static str> {
        Some("COMMIT")
    }

    fn rollback_sql(&self) -> Option<&'static str> {
        Some("ROLLBACK")
    }

    fn ping_sql(&self) -> &'static str {
        "SELECT 1 FROM DUAL"
    }
}

/// `column` equals the name as given, or its uppercase form when no user has the exact name
fn owner_matches(column: &str) -> String {
    format!(
        "({column} = ? OR ({column} = UPPER(?) AND NOT EXISTS \
         (SELECT 1 FROM all_users u WHERE u.username = ?)))"
    )
}

/// Same rule for an object name inside the owner held by `owner_column`
fn object_matches(owner_column: &str, column: &str) -> String {
    format!(
        "({column} = ? OR ({column} = UPPER(?) AND NOT EXISTS \
         (SELECT 1 FROM all_objects o WHERE o.owner = {owner_column} AND o.object_name = ? \
         AND o.object_type IN ('TABLE', 'VIEW'))))"
    )
}

/// Arguments for one `owner_matches` followed by one `object_matches`
fn lookup_args(table: &TableRef) -> Vec<Value> {
    let mut args = vec![json!(table.schema); 3];
    args.extend(vec![json!(table.table); 3]);
    args
}

impl CatalogDialect for OracleDialect {
    fn tables_query(&self, database: Option<&str>) -> CatalogQuery {
        let owner = database.unwrap_or(&self.owner);
        CatalogQuery::new(
            format!(
                "SELECT owner AS \"table_schema\", table_name AS \"table_name\" \
                 FROM all_tables WHERE {} ORDER BY table_name",
                owner_matches("owner")
            ),
            vec![json!(owner); 3],
        )
    }

    fn columns_query(&self, table: &TableRef) -> CatalogQuery {
        CatalogQuery::new(
            format!(
                "SELECT c.column_name AS \"column_name\", c.data_type AS \"data_type\", \
                 c.nullable AS \"is_nullable\", c.data_default AS \"column_default\", \
                 c.column_id AS \"ordinal_position\" \
                 FROM all_tab_columns c \
                 WHERE {} AND {} \
                 ORDER BY c.column_id",
                owner_matches("c.owner"),
                object_matches("c.owner", "c.table_name")
            ),
            lookup_args(table),
        )
    }

    fn indexes_query(&self, table: &TableRef) -> Option<CatalogQuery> {
        Some(CatalogQuery::new(
            format!(
                "SELECT i.index_name AS \"index_name\", ic.column_name AS \"column_name\", \
                 ic.column_position AS \"key_ordinal\", \
                 CASE WHEN i.uniqueness = 'UNIQUE' THEN 1 ELSE 0 END AS \"is_unique\", \
                 CASE WHEN c.constraint_type = 'P' THEN 1 ELSE 0 END AS \"is_primary\" \
                 FROM all_indexes i \
                 JOIN all_ind_columns ic ON ic.index_owner = i.owner AND ic.index_name = i.index_name \
                 LEFT JOIN all_constraints c ON c.owner = i.table_owner \
                 AND c.index_name = i.index_name AND c.constraint_type = 'P' \
                 WHERE {} AND {} \
                 ORDER BY i.index_name, ic.column_position",
                owner_matches("i.table_owner"),
                object_matches("i.table_owner", "i.table_name")
            ),
            lookup_args(table),
        ))
    }

    fn constraints_query(&self, table: &TableRef) -> Option<CatalogQuery> {
        Some(CatalogQuery::new(
            format!(
                "SELECT c.constraint_name AS \"constraint_name\", \
                 CASE c.constraint_type WHEN 'P' THEN 'PRIMARY KEY' WHEN 'U' THEN 'UNIQUE' \
                 WHEN 'R' THEN 'FOREIGN KEY' WHEN 'C' THEN 'CHECK' ELSE c.constraint_type END \
                 AS \"constraint_type\", \
                 cc.column_name AS \"column_name\" \
                 FROM all_constraints c \
                 LEFT JOIN all_cons_columns cc ON cc.owner = c.owner \
                 AND cc.constraint_name = c.constraint_name \
                 WHERE {} AND {} \
                 ORDER BY c.constraint_name, cc.position",
                owner_matches("c.owner"),
                object_matches("c.owner", "c.table_name")
            ),
            lookup_args(table),
        ))
    }

    fn stats_query(&self, table: &TableRef) -> Option<CatalogQuery> {
        Some(CatalogQuery::new(
            format!(
                "SELECT t.num_rows AS \"row_estimate\", t.blocks AS \"blocks\", \
                 t.avg_row_len AS \"avg_row_len\", t.last_analyzed AS \"last_analyzed\" \
                 FROM all_tables t WHERE {} AND {}",
                owner_matches("t.owner"),
                object_matches("t.owner", "t.table_name")
            ),
            lookup_args(table),
        ))
    }

    fn default_schema(&self) -> String {
        self.owner.clone()
    }
}

fn to_sql(value: &Value) -> Box<dyn ToSql> {
    match value {
        Value::Null => Box::new(None::<String>),
        Value::Bool(b) => Box::new(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Box::new(i),
            None => Box::new(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Box::new(s.clone()),
        other => Box::new(other.to_string()),
    }
}

/// NUMBER text as an integer when exact, else a float, else the text itself
fn number_value(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return Value::Number(i.into());
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(text.to_string()))
}

fn float_value(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Get a column value as a JSON value
fn get_column_value(value: &SqlValue, oracle_type: &OracleType) -> Value {
    if value.is_null().unwrap_or(true) {
        return Value::Null;
    }

    match oracle_type {
        OracleType::Number(_, _) | OracleType::Int64 | OracleType::UInt64 => value
            .get::<String>()
            .map(|s| number_value(s.trim()))
            .unwrap_or(Value::Null),
        OracleType::BinaryFloat | OracleType::BinaryDouble | OracleType::Float(_) => value
            .get::<f64>()
            .map(float_value)
            .unwrap_or(Value::Null),
        OracleType::Date | OracleType::Timestamp(_) => value
            .get::<chrono::NaiveDateTime>()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        OracleType::TimestampTZ(_) | OracleType::TimestampLTZ(_) => value
            .get::<chrono::DateTime<chrono::FixedOffset>>()
            .map(|v| Value::String(v.to_rfc3339()))
            .unwrap_or(Value::Null),
        _ => value.get::<String>().map(Value::String).unwrap_or(Value::Null),
    }
}

fn query_error(e: oracle::Error) -> PolyqueryError {
    PolyqueryError::QueryExecution(format!("Oracle query failed: {}", e))
}

pub struct OracleSession {
    conn: Arc<Connection>,
}

impl OracleSession {
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> std::result::Result<T, oracle::Error> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || f(&conn))
            .await
            .map_err(|e| PolyqueryError::Internal(format!("Oracle worker failed: {}", e)))?
            .map_err(query_error)
    }
}

#[async_trait]
impl SqlSession for OracleSession {
    async fn fetch(&mut self, statement: &BoundStatement) -> Result<RowSet> {
        let sql = statement.sql.clone();
        let args = statement.args.clone();
        self.blocking(move |conn| {
            let boxed: Vec<Box<dyn ToSql>> = args.iter().map(to_sql).collect();
            let params: Vec<&dyn ToSql> = boxed.iter().map(|b| b.as_ref()).collect();
            let result_set = conn.query(&sql, &params)?;
            let columns: Vec<(String, OracleType)> = result_set
                .column_info()
                .iter()
                .map(|c| (c.name().to_string(), c.oracle_type().clone()))
                .collect();

            let mut rows = Vec::new();
            for row in result_set {
                let row = row?;
                let map: Row = columns
                    .iter()
                    .zip(row.sql_values())
                    .map(|((name, kind), value)| (name.clone(), get_column_value(value, kind)))
                    .collect();
                rows.push(map);
            }
            Ok(rows)
        })
        .await
    }

    async fn execute(&mut self, statement: &BoundStatement) -> Result<u64> {
        let sql = statement.sql.clone();
        let args = statement.args.clone();
        self.blocking(move |conn| {
            let boxed: Vec<Box<dyn ToSql>> = args.iter().map(to_sql).collect();
            let params: Vec<&dyn ToSql> = boxed.iter().map(|b| b.as_ref()).collect();
            let stmt = conn.execute(&sql, &params)?;
            stmt.row_count()
        })
        .await
    }

    async fn control(&mut self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.blocking(move |conn| match sql.as_str() {
            "COMMIT" => conn.commit(),
            "ROLLBACK" => conn.rollback(),
            other => conn.execute(other, &[]).map(|_| ()),
        })
        .await
    }

    async fn close(self) -> Result<()> {
        self.blocking(|conn| conn.close()).await
    }
}

pub struct OracleDriver {
    config: OracleConfig,
    dialect: OracleDialect,
}

impl OracleDriver {
    pub fn new(config: OracleConfig) -> Self {
        let dialect = OracleDialect::new(&config.user);
        Self { config, dialect }
    }
}

#[async_trait]
impl SqlDriver for OracleDriver {
    type Session = OracleSession;
    type Dialect = OracleDialect;

    fn engine(&self) -> EngineType {
        EngineType::Oracle
    }

    fn dialect(&self) -> &OracleDialect {
        &self.dialect
    }

    async fn open(&self) -> Result<OracleSession> {
        let user = self.config.user.clone();
        let password = self.config.password.clone();
        let connect_string = self.config.connect_string();

        let conn = tokio::task::spawn_blocking(move || {
            Connection::connect(&user, &password, &connect_string)
        })
        .await
        .map_err(|e| PolyqueryError::Internal(format!("Oracle worker failed: {}", e)))?
        .map_err(|e| PolyqueryError::Database(format!("Oracle connection failed: {}", e)))?;

        Ok(OracleSession {
            conn: Arc::new(conn),
        })
    }
}
