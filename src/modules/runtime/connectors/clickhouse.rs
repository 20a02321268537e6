//! ClickHouse connector over the HTTP interface

use async_trait::async_trait;
use polyquery_core::{error::Result, ClickhouseConfig, PolyqueryError};
use polyquery_types::{EngineType, Row, RowSet};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

use super::dialect::{
    int, text, BindStyle, BoundStatement, CatalogDialect, CatalogQuery, Dialect, TableRef,
};
use super::sql::SqlConnector;
use super::traits::{SqlDriver, SqlSession};

pub type ClickhouseConnector = SqlConnector<ClickhouseDriver>;

/// ClickHouse syntax and `system.*` catalog
pub struct ClickhouseDialect {
    database: String,
}

impl ClickhouseDialect {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
        }
    }
}

fn escape_string(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

impl Dialect for ClickhouseDialect {
    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('\\', "\\\\").replace('`', "\\`"))
    }

    fn bind_style(&self) -> BindStyle {
        BindStyle::Inline
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn backslash_escapes(&self) -> bool {
        true
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => escape_string(s),
            Value::Array(items) => {
                let elements: Vec<String> = items.iter().map(|v| self.literal(v)).collect();
                format!("[{}]", elements.join(", "))
            }
            Value::Object(_) => escape_string(&value.to_string()),
        }
    }

    fn begin_sql(&self) -> Option<&'static str> {
        None
    }

    fn commit_sql(&self) -> Option<&'static str> {
        None
    }

    fn rollback_sql(&self) -> Option<&'static str> {
        None
    }
}

impl CatalogDialect for ClickhouseDialect {
    fn tables_query(&self, database: Option<&str>) -> CatalogQuery {
        CatalogQuery::new(
            "SELECT database AS table_schema, name AS table_name \
             FROM system.tables WHERE database = ? AND NOT is_temporary ORDER BY name",
            vec![json!(database.unwrap_or(&self.database))],
        )
    }

    fn columns_query(&self, table: &TableRef) -> CatalogQuery {
        CatalogQuery::new(
            "SELECT name AS column_name, type AS data_type, \
             startsWith(type, 'Nullable') AS is_nullable, \
             default_expression AS column_default, position AS ordinal_position \
             FROM system.columns WHERE database = ? AND table = ? ORDER BY position",
            vec![json!(table.schema), json!(table.table)],
        )
    }

    fn indexes_query(&self, table: &TableRef) -> Option<CatalogQuery> {
        Some(CatalogQuery::new(
            "SELECT 'PRIMARY' AS index_name, name AS column_name, \
             toUInt64(position) AS key_ordinal, 0 AS is_unique, 1 AS is_primary \
             FROM system.columns WHERE database = ? AND table = ? AND is_in_primary_key \
             UNION ALL \
             SELECT name AS index_name, expr AS column_name, toUInt64(1) AS key_ordinal, \
             0 AS is_unique, 0 AS is_primary \
             FROM system.data_skipping_indices WHERE database = ? AND table = ?",
            vec![
                json!(table.schema),
                json!(table.table),
                json!(table.schema),
                json!(table.table),
            ],
        ))
    }

    fn constraints_query(&self, _table: &TableRef) -> Option<CatalogQuery> {
        None
    }

    fn stats_query(&self, table: &TableRef) -> Option<CatalogQuery> {
        Some(CatalogQuery::new(
            "SELECT partition, sum(rows) AS rows, sum(bytes_on_disk) AS bytes \
             FROM system.parts WHERE database = ? AND table = ? AND active \
             GROUP BY partition ORDER BY partition",
            vec![json!(table.schema), json!(table.table)],
        ))
    }

    fn default_schema(&self) -> String {
        self.database.clone()
    }

    fn stats_from_rows(&self, rows: RowSet) -> Map<String, Value> {
        let total_rows: i64 = rows.iter().map(|r| int(r, "rows")).sum();
        let total_bytes: i64 = rows.iter().map(|r| int(r, "bytes")).sum();
        let partitions: Vec<Value> = rows
            .iter()
            .map(|r| {
                json!({
                    "partition": text(r, "partition").unwrap_or_default(),
                    "rows": int(r, "rows"),
                    "bytes": int(r, "bytes"),
                })
            })
            .collect();

        let mut stats = Map::new();
        stats.insert("partition_count".to_string(), json!(partitions.len()));
        stats.insert("total_rows".to_string(), json!(total_rows));
        stats.insert("total_bytes".to_string(), json!(total_bytes));
        stats.insert("partitions".to_string(), Value::Array(partitions));
        stats
    }
}

#[derive(Debug, Deserialize)]
struct JsonOutput {
    #[serde(default)]
    data: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct Summary {
    #[serde(default)]
    written_rows: Option<String>,
}

/// One authenticated HTTP endpoint
pub struct ClickhouseSession {
    client: Client,
    url: String,
    config: ClickhouseConfig,
}

impl ClickhouseSession {
    async fn post(&self, sql: &str, format: bool) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(&self.url)
            .header("X-ClickHouse-User", &self.config.user)
            .header("X-ClickHouse-Key", &self.config.password)
            .query(&[("database", self.config.database.as_str())])
            .body(sql.to_string());
        if format {
            request = request.query(&[
                ("default_format", "JSON"),
                ("output_format_json_quote_64bit_integers", "0"),
            ]);
        }

        let response = request.send().await.map_err(|e| {
            PolyqueryError::Database(format!("ClickHouse request failed: {}", e))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                PolyqueryError::Database(format!("ClickHouse rejected credentials: {}", body.trim()))
            }
            _ => PolyqueryError::QueryExecution(format!("ClickHouse: {}", body.trim())),
        })
    }
}

#[async_trait]
impl SqlSession for ClickhouseSession {
    async fn fetch(&mut self, statement: &BoundStatement) -> Result<RowSet> {
        let response = self.post(&statement.sql, true).await?;
        let body = response.text().await.map_err(|e| {
            PolyqueryError::QueryExecution(format!("ClickHouse response unreadable: {}", e))
        })?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let output: JsonOutput = serde_json::from_str(&body)?;
        Ok(output.data)
    }

    async fn execute(&mut self, statement: &BoundStatement) -> Result<u64> {
        let response = self.post(&statement.sql, false).await?;
        let written = response
            .headers()
            .get("X-ClickHouse-Summary")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| serde_json::from_str::<Summary>(v).ok())
            .and_then(|s| s.written_rows)
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        Ok(written)
    }

    async fn close(self) -> Result<()> {
        Ok(())
    }
}

pub struct ClickhouseDriver {
    config: ClickhouseConfig,
    dialect: ClickhouseDialect,
    request_timeout: Duration,
}

impl ClickhouseDriver {
    pub fn new(config: ClickhouseConfig, request_timeout: Duration) -> Self {
        let dialect = ClickhouseDialect::new(config.database.clone());
        Self {
            config,
            dialect,
            request_timeout,
        }
    }
}

#[async_trait]
impl SqlDriver for ClickhouseDriver {
    type Session = ClickhouseSession;
    type Dialect = ClickhouseDialect;

    fn engine(&self) -> EngineType {
        EngineType::Clickhouse
    }

    fn dialect(&self) -> &ClickhouseDialect {
        &self.dialect
    }

    async fn open(&self) -> Result<ClickhouseSession> {
        let client = Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| PolyqueryError::Database(format!("HTTP client error: {}", e)))?;

        let mut session = ClickhouseSession {
            client,
            url: self.config.base_url(),
            config: self.config.clone(),
        };

        // The HTTP interface is stateless; verify reachability and credentials
        session.fetch(&BoundStatement::plain(self.dialect.ping_sql())).await?;
        debug!("ClickHouse reachable at {}", session.url);
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::traits::Connector;
    use polyquery_types::QueryParams;
    use wiremock::matchers::{body_string_contains, header, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> ClickhouseConfig {
        let address = server.address();
        ClickhouseConfig {
            host: address.ip().to_string(),
            port: address.port(),
            user: "agent".into(),
            password: "pw".into(),
            database: "analytics".into(),
            secure: false,
        }
    }

    async fn connected(server: &MockServer) -> ClickhouseConnector {
        Mock::given(method("POST"))
            .and(body_string_contains("SELECT 1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"1": 1}]})))
            .mount(server)
            .await;

        let connector = SqlConnector::new(
            "warehouse",
            ClickhouseDriver::new(config_for(server), Duration::from_secs(5)),
            Duration::from_secs(5),
        );
        assert!(connector.connect().await);
        connector
    }

    #[test]
    fn test_literal_escaping() {
        let dialect = ClickhouseDialect::new("default");
        assert_eq!(dialect.literal(&json!("it's")), "'it\\'s'");
        assert_eq!(dialect.literal(&json!([1, "a"])), "[1, 'a']");
        assert_eq!(dialect.literal(&json!(true)), "true");
        assert_eq!(dialect.quote_ident("my`col"), "`my\\`col`");
    }

    #[test]
    fn test_partition_stats() {
        let dialect = ClickhouseDialect::new("default");
        let rows: RowSet = vec![
            json!({"partition": "202401", "rows": 10, "bytes": 100}),
            json!({"partition": "202402", "rows": "5", "bytes": "50"}),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();

        let stats = dialect.stats_from_rows(rows);
        assert_eq!(stats["partition_count"], 2);
        assert_eq!(stats["total_rows"], 15);
        assert_eq!(stats["total_bytes"], 150);
        assert_eq!(stats["partitions"][1]["partition"], "202402");
    }

    #[tokio::test]
    async fn test_select_sends_credentials_and_inlines_params() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("X-ClickHouse-User", "agent"))
            .and(query_param("database", "analytics"))
            .and(body_string_contains("WHERE city = 'Oslo'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": [{"name": "city", "type": "String"}, {"name": "visits", "type": "UInt64"}],
                "data": [{"city": "Oslo", "visits": 12}],
                "rows": 1
            })))
            .mount(&server)
            .await;
        let connector = connected(&server).await;

        let params = QueryParams::Positional(vec![json!("Oslo")]);
        let rows = connector
            .execute_query("SELECT city, visits FROM hits WHERE city = ?", Some(&params))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].keys().collect::<Vec<_>>(), vec!["city", "visits"]);
        assert_eq!(rows[0]["visits"], 12);
    }

    #[tokio::test]
    async fn test_insert_reads_summary_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("INSERT INTO hits"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-ClickHouse-Summary", r#"{"read_rows":"0","written_rows":"2"}"#),
            )
            .mount(&server)
            .await;
        let connector = connected(&server).await;

        let rows = connector
            .execute_query("INSERT INTO hits VALUES ('a', 1), ('b', 2)", None)
            .await
            .unwrap();
        assert_eq!(rows[0]["rows_affected"], 2);
        assert_eq!(rows[0]["status"], "success");
    }

    #[tokio::test]
    async fn test_engine_error_carries_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("missing_table"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_string("Code: 60. DB::Exception: Table analytics.missing_table does not exist"),
            )
            .mount(&server)
            .await;
        let connector = connected(&server).await;

        let err = connector
            .execute_query("SELECT * FROM missing_table", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_connect_fails_on_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Authentication failed"))
            .mount(&server)
            .await;

        let connector = SqlConnector::new(
            "warehouse",
            ClickhouseDriver::new(config_for(&server), Duration::from_secs(5)),
            Duration::from_secs(5),
        );
        assert!(!connector.connect().await);
        assert!(!connector.test_connection().await);
    }
}
