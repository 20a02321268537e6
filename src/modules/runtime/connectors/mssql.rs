//! SQL Server connector implementation

use async_trait::async_trait;
use polyquery_core::{error::Result, MssqlConfig, PolyqueryError};
use polyquery_types::{EngineType, Row as JsonRow, RowSet};
use serde_json::{json, Value};
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, Row, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use super::dialect::{split_name, BoundStatement, CatalogDialect, CatalogQuery, Dialect, TableRef};
use super::sql::SqlConnector;
use super::traits::{SqlDriver, SqlSession};

pub type MssqlConnector = SqlConnector<MssqlDriver>;

/// T-SQL syntax; catalog views are addressed as `[db].sys.*`
pub struct MssqlDialect {
    database: String,
}

impl MssqlDialect {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
        }
    }

    fn catalog(&self, table: &TableRef) -> String {
        self.quote_ident(table.database.as_deref().unwrap_or(&self.database))
    }
}

impl Dialect for MssqlDialect {
    fn quote_ident(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    fn bracket_identifiers(&self) -> bool {
        true
    }

    fn begin_sql(&self) -> Option<&'static str> {
        Some("BEGIN TRANSACTION")
    }

    fn commit_sql(&self) -> Option<&'static str> {
        Some("COMMIT TRANSACTION")
    }

    fn rollback_sql(&self) -> Option<&'static str> {
        Some("ROLLBACK TRANSACTION")
    }
}

impl CatalogDialect for MssqlDialect {
    fn tables_query(&self, database: Option<&str>) -> CatalogQuery {
        let db = self.quote_ident(database.unwrap_or(&self.database));
        CatalogQuery::new(
            format!(
                "SELECT s.name AS table_schema, t.name AS table_name \
                 FROM {db}.sys.tables t \
                 JOIN {db}.sys.schemas s ON s.schema_id = t.schema_id \
                 ORDER BY s.name, t.name"
            ),
            vec![],
        )
    }

    fn columns_query(&self, table: &TableRef) -> CatalogQuery {
        let db = self.catalog(table);
        CatalogQuery::new(
            format!(
                "SELECT c.name AS column_name, ty.name AS data_type, c.is_nullable AS is_nullable, \
                 dc.definition AS column_default, c.column_id AS ordinal_position \
                 FROM {db}.sys.columns c \
                 JOIN {db}.sys.tables t ON t.object_id = c.object_id \
                 JOIN {db}.sys.schemas s ON s.schema_id = t.schema_id \
                 JOIN {db}.sys.types ty ON ty.user_type_id = c.user_type_id \
                 LEFT JOIN {db}.sys.default_constraints dc ON dc.object_id = c.default_object_id \
                 WHERE s.name = ? AND t.name = ? \
                 ORDER BY c.column_id"
            ),
            vec![json!(table.schema), json!(table.table)],
        )
    }

    fn indexes_query(&self, table: &TableRef) -> Option<CatalogQuery> {
        let db = self.catalog(table);
        Some(CatalogQuery::new(
            format!(
                "SELECT i.name AS index_name, c.name AS column_name, \
                 CAST(ic.key_ordinal AS INT) AS key_ordinal, \
                 i.is_unique AS is_unique, i.is_primary_key AS is_primary \
                 FROM {db}.sys.indexes i \
                 JOIN {db}.sys.tables t ON t.object_id = i.object_id \
                 JOIN {db}.sys.schemas s ON s.schema_id = t.schema_id \
                 JOIN {db}.sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id \
                 JOIN {db}.sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id \
                 WHERE s.name = ? AND t.name = ? AND i.name IS NOT NULL AND ic.is_included_column = 0 \
                 ORDER BY i.name, ic.key_ordinal"
            ),
            vec![json!(table.schema), json!(table.table)],
        ))
    }

    fn constraints_query(&self, table: &TableRef) -> Option<CatalogQuery> {
        let db = self.catalog(table);
        Some(CatalogQuery::new(
            format!(
                "SELECT tc.CONSTRAINT_NAME AS constraint_name, tc.CONSTRAINT_TYPE AS constraint_type, \
                 kcu.COLUMN_NAME AS column_name \
                 FROM {db}.INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
                 LEFT JOIN {db}.INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
                 ON kcu.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA \
                 AND kcu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME \
                 WHERE tc.TABLE_SCHEMA = ? AND tc.TABLE_NAME = ? \
                 ORDER BY tc.CONSTRAINT_NAME, kcu.ORDINAL_POSITION"
            ),
            vec![json!(table.schema), json!(table.table)],
        ))
    }

    fn stats_query(&self, table: &TableRef) -> Option<CatalogQuery> {
        let db = self.catalog(table);
        Some(CatalogQuery::new(
            format!(
                "SELECT SUM(p.rows) AS row_count, COUNT(*) AS partition_count \
                 FROM {db}.sys.partitions p \
                 JOIN {db}.sys.tables t ON t.object_id = p.object_id \
                 JOIN {db}.sys.schemas s ON s.schema_id = t.schema_id \
                 WHERE s.name = ? AND t.name = ? AND p.index_id IN (0, 1)"
            ),
            vec![json!(table.schema), json!(table.table)],
        ))
    }

    fn default_schema(&self) -> String {
        "dbo".to_string()
    }

    /// `table`, `schema.table` or `db.schema.table`; the hint names the database
    fn table_ref(&self, table: &str, database: Option<&str>) -> TableRef {
        let parts = split_name(table);
        match parts.as_slice() {
            [.., db, schema, name] => self.table_in(schema, name, Some(db.as_str())),
            [schema, name] => self.table_in(schema, name, database),
            [name] => self.table_in("dbo", name, database),
            [] => self.table_in("dbo", table, database),
        }
    }

    fn table_in(&self, schema: &str, table: &str, database: Option<&str>) -> TableRef {
        TableRef {
            database: Some(database.unwrap_or(&self.database).to_string()),
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }
}

fn to_sql(value: &Value) -> Box<dyn ToSql> {
    match value {
        Value::Null => Box::new(None::<String>),
        Value::Bool(b) => Box::new(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Box::new(i),
            None => Box::new(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Box::new(s.clone()),
        other => Box::new(other.to_string()),
    }
}

fn float(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Get a column value as a JSON value
fn get_column_value(data: &ColumnData<'static>) -> Value {
    match data {
        ColumnData::U8(v) => v.map(|v| Value::Number(v.into())).unwrap_or(Value::Null),
        ColumnData::I16(v) => v.map(|v| Value::Number(v.into())).unwrap_or(Value::Null),
        ColumnData::I32(v) => v.map(|v| Value::Number(v.into())).unwrap_or(Value::Null),
        ColumnData::I64(v) => v.map(|v| Value::Number(v.into())).unwrap_or(Value::Null),
        ColumnData::F32(v) => v.map(|v| float(v as f64)).unwrap_or(Value::Null),
        ColumnData::F64(v) => v.map(float).unwrap_or(Value::Null),
        ColumnData::Bit(v) => v.map(Value::Bool).unwrap_or(Value::Null),
        ColumnData::String(v) => v
            .as_ref()
            .map(|s| Value::String(s.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Guid(v) => v
            .map(|g| Value::String(g.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Numeric(v) => v
            .map(|n| float(n.value() as f64 / 10f64.powi(n.scale() as i32)))
            .unwrap_or(Value::Null),
        ColumnData::Binary(v) => v
            .as_ref()
            .map(|b| Value::String(String::from_utf8_lossy(b).into_owned()))
            .unwrap_or(Value::Null),
        ColumnData::DateTimeOffset(_) => chrono::DateTime::<chrono::FixedOffset>::from_sql(data)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_rfc3339()))
            .unwrap_or(Value::Null),
        ColumnData::Date(_) => chrono::NaiveDate::from_sql(data)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Time(_) => chrono::NaiveTime::from_sql(data)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            chrono::NaiveDateTime::from_sql(data)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null)
        }
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|x| Value::String(x.clone().into_owned().into_string()))
            .unwrap_or(Value::Null),
        #[allow(unreachable_patterns)]
        _ => Value::Null,
    }
}

fn row_to_map(row: Row) -> JsonRow {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    names
        .into_iter()
        .zip(row)
        .map(|(name, data)| (name, get_column_value(&data)))
        .collect()
}

fn query_error(e: tiberius::error::Error) -> PolyqueryError {
    PolyqueryError::QueryExecution(format!("SQL Server query failed: {}", e))
}

pub struct MssqlSession {
    client: Client<Compat<TcpStream>>,
}

#[async_trait]
impl SqlSession for MssqlSession {
    async fn fetch(&mut self, statement: &BoundStatement) -> Result<RowSet> {
        let boxed: Vec<Box<dyn ToSql>> = statement.args.iter().map(to_sql).collect();
        let params: Vec<&dyn ToSql> = boxed.iter().map(|b| b.as_ref()).collect();
        let rows = self
            .client
            .query(statement.sql.as_str(), &params)
            .await
            .map_err(query_error)?
            .into_first_result()
            .await
            .map_err(query_error)?;
        Ok(rows.into_iter().map(row_to_map).collect())
    }

    async fn execute(&mut self, statement: &BoundStatement) -> Result<u64> {
        let boxed: Vec<Box<dyn ToSql>> = statement.args.iter().map(to_sql).collect();
        let params: Vec<&dyn ToSql> = boxed.iter().map(|b| b.as_ref()).collect();
        let result = self
            .client
            .execute(statement.sql.as_str(), &params)
            .await
            .map_err(query_error)?;
        Ok(result.total())
    }

    async fn control(&mut self, sql: &str) -> Result<()> {
        self.client
            .simple_query(sql)
            .await
            .map_err(query_error)?
            .into_results()
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.client
            .close()
            .await
            .map_err(|e| PolyqueryError::Database(format!("SQL Server close failed: {}", e)))
    }
}

pub struct MssqlDriver {
    config: MssqlConfig,
    dialect: MssqlDialect,
}

impl MssqlDriver {
    pub fn new(config: MssqlConfig) -> Self {
        let dialect = MssqlDialect::new(config.database.clone());
        Self { config, dialect }
    }

    pub fn client_config(&self) -> Result<Config> {
        if self.config.trusted_connection {
            return Err(PolyqueryError::Unsupported(
                "trusted connections are not supported; configure user and password".to_string(),
            ));
        }

        let mut config = Config::new();
        config.host(&self.config.server);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(&self.config.user, &self.config.password));
        if self.config.trust_server_certificate {
            config.trust_cert();
        }
        Ok(config)
    }
}

#[async_trait]
impl SqlDriver for MssqlDriver {
    type Session = MssqlSession;
    type Dialect = MssqlDialect;

    fn engine(&self) -> EngineType {
        EngineType::Mssql
    }

    fn dialect(&self) -> &MssqlDialect {
        &self.dialect
    }

    async fn open(&self) -> Result<MssqlSession> {
        let config = self.client_config()?;
        debug!(
            "Opening SQL Server session to {} (driver hint '{}')",
            config.get_addr(),
            self.config.driver
        );

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| PolyqueryError::Database(format!("SQL Server unreachable: {}", e)))?;
        tcp.set_nodelay(true)?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| PolyqueryError::Database(format!("SQL Server connection failed: {}", e)))?;
        Ok(MssqlSession { client })
    }
}
