//! Commands that talk to a running server through the remote client

use clap::{Args, ValueEnum};
use polyquery_client::{ClientConfig, ClientError, PolyqueryClient, DEFAULT_URL, ENV_API_KEY, ENV_URL};
use polyquery_core::PolyqueryError;
use polyquery_types::QueryParams;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Server address and credential shared by the remote commands
#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    /// Server base URL
    #[arg(long, env = ENV_URL, default_value = DEFAULT_URL)]
    pub url: String,

    /// API key sent as a bearer token
    #[arg(long, env = ENV_API_KEY, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// Attempts per call for transient failures
    #[arg(long, default_value = "3")]
    pub retries: u32,

    /// Output format
    #[arg(long, value_enum, default_value = "json")]
    pub output: OutputFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
}

impl RemoteArgs {
    fn client(&self) -> Result<PolyqueryClient, PolyqueryError> {
        let api_key = self.api_key.clone().ok_or_else(|| {
            PolyqueryError::Config(format!("an API key is required (--api-key or {})", ENV_API_KEY))
        })?;
        self.build(api_key)
    }

    fn build(&self, api_key: String) -> Result<PolyqueryClient, PolyqueryError> {
        let config = ClientConfig::builder()
            .base_url(&self.url)
            .api_key(api_key)
            .timeout(Duration::from_secs(self.timeout))
            .retry_attempts(self.retries)
            .build()
            .map_err(remote_error)?;
        PolyqueryClient::new(config).map_err(remote_error)
    }

    fn render<T: Serialize>(&self, value: &T) -> Result<String, PolyqueryError> {
        match self.output {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
            OutputFormat::Yaml => serde_yaml::to_string(value)
                .map_err(|e| PolyqueryError::Internal(format!("YAML render error: {}", e))),
        }
    }
}

fn remote_error(e: ClientError) -> PolyqueryError {
    match e {
        ClientError::Auth { .. } => PolyqueryError::Unauthorized(e.to_string()),
        ClientError::Config(message) => PolyqueryError::Config(message),
        other => PolyqueryError::Server(other.to_string()),
    }
}

/// Health command arguments
#[derive(Args, Debug)]
pub struct HealthCommand {
    #[command(flatten)]
    pub remote: RemoteArgs,
}

impl HealthCommand {
    pub async fn execute(&self) -> Result<(), PolyqueryError> {
        println!("{}", self.run().await?);
        Ok(())
    }

    async fn run(&self) -> Result<String, PolyqueryError> {
        // /health is public, any key satisfies the client builder
        let key = self.remote.api_key.clone().unwrap_or_else(|| "anonymous".to_string());
        let client = self.remote.build(key)?;
        if client.health_check().await {
            Ok(format!("{} is up", self.remote.url))
        } else {
            Err(PolyqueryError::Server(client.offline_message().to_string()))
        }
    }
}

/// Query command arguments
#[derive(Args, Debug)]
pub struct QueryCommand {
    /// Connection name
    pub connection: String,

    /// Statement to run
    pub statement: String,

    /// Parameters as JSON: an array for `?` markers or an object for `:name` markers
    #[arg(short, long)]
    pub params: Option<String>,

    /// Bypass the response cache
    #[arg(long)]
    pub no_cache: bool,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

impl QueryCommand {
    pub async fn execute(&self) -> Result<(), PolyqueryError> {
        println!("{}", self.run().await?);
        Ok(())
    }

    fn params(&self) -> Result<Option<QueryParams>, PolyqueryError> {
        self.params
            .as_deref()
            .map(|raw| {
                serde_json::from_str::<QueryParams>(raw).map_err(|e| {
                    PolyqueryError::Validation(format!(
                        "params must be a JSON array or object: {}",
                        e
                    ))
                })
            })
            .transpose()
    }

    async fn run(&self) -> Result<String, PolyqueryError> {
        let params = self.params()?;
        let client = self.remote.client()?;
        debug!("Running statement on '{}'", self.connection);

        let response = client
            .execute_query(&self.connection, &self.statement, params, !self.no_cache)
            .await
            .map_err(remote_error)?;
        if !response.success {
            return Err(PolyqueryError::QueryExecution(response.error));
        }
        self.remote.render(&response.results)
    }
}

/// Schema command arguments
#[derive(Args, Debug)]
pub struct SchemaCommand {
    /// Connection name
    pub connection: String,

    /// Show a single table instead of the whole catalog
    #[arg(short, long)]
    pub table: Option<String>,

    /// Only list table names
    #[arg(long, conflicts_with = "table")]
    pub names: bool,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

impl SchemaCommand {
    pub async fn execute(&self) -> Result<(), PolyqueryError> {
        println!("{}", self.run().await?);
        Ok(())
    }

    async fn run(&self) -> Result<String, PolyqueryError> {
        let client = self.remote.client()?;

        if let Some(table) = &self.table {
            let lookup = client
                .get_table_info(&self.connection, table)
                .await
                .map_err(remote_error)?;
            return match lookup.into_table() {
                Some(info) => self.remote.render(&info),
                None => Err(PolyqueryError::NotFound(format!(
                    "table '{}' on '{}'",
                    table, self.connection
                ))),
            };
        }

        if self.names {
            let tables = client.get_tables(&self.connection).await.map_err(remote_error)?;
            return self.remote.render(&tables);
        }

        let schema = client
            .get_schema(&self.connection, true)
            .await
            .map_err(remote_error)?;
        self.remote.render(&schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn remote(server: &MockServer, output: OutputFormat) -> RemoteArgs {
        RemoteArgs {
            url: server.uri(),
            api_key: Some("test-key".to_string()),
            timeout: 2,
            retries: 1,
            output,
        }
    }

    #[tokio::test]
    async fn test_query_renders_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/query"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"connection": "pg", "params": [7]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "results": [{"id": 7, "name": "ada"}],
                "row_count": 1,
                "execution_time_ms": 2
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cmd = QueryCommand {
            connection: "pg".to_string(),
            statement: "SELECT id, name FROM users WHERE id = ?".to_string(),
            params: Some("[7]".to_string()),
            no_cache: false,
            remote: remote(&server, OutputFormat::Yaml),
        };
        let out = cmd.run().await.unwrap();
        assert!(out.contains("name: ada"));
    }

    #[tokio::test]
    async fn test_query_rejects_scalar_params() {
        let server = MockServer::start().await;
        let cmd = QueryCommand {
            connection: "pg".to_string(),
            statement: "SELECT 1".to_string(),
            params: Some("42".to_string()),
            no_cache: true,
            remote: remote(&server, OutputFormat::Json),
        };
        assert!(matches!(cmd.run().await, Err(PolyqueryError::Validation(_))));
    }

    #[tokio::test]
    async fn test_query_requires_key() {
        let server = MockServer::start().await;
        let mut args = remote(&server, OutputFormat::Json);
        args.api_key = None;
        let cmd = QueryCommand {
            connection: "pg".to_string(),
            statement: "SELECT 1".to_string(),
            params: None,
            no_cache: true,
            remote: args,
        };
        assert!(matches!(cmd.run().await, Err(PolyqueryError::Config(_))));
    }

    #[tokio::test]
    async fn test_auth_failure_maps_to_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tables/pg"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"success": false, "error": "invalid api key"})),
            )
            .mount(&server)
            .await;

        let cmd = SchemaCommand {
            connection: "pg".to_string(),
            table: None,
            names: true,
            remote: remote(&server, OutputFormat::Json),
        };
        assert!(matches!(cmd.run().await, Err(PolyqueryError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_schema_missing_table() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tables/pg/ghost"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"success": false, "error": "table not found"})),
            )
            .mount(&server)
            .await;

        let cmd = SchemaCommand {
            connection: "pg".to_string(),
            table: Some("ghost".to_string()),
            names: false,
            remote: remote(&server, OutputFormat::Json),
        };
        assert!(matches!(cmd.run().await, Err(PolyqueryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_health_without_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&server)
            .await;

        let mut args = remote(&server, OutputFormat::Json);
        args.api_key = None;
        let out = HealthCommand { remote: args }.run().await.unwrap();
        assert!(out.ends_with("is up"));
    }
}
