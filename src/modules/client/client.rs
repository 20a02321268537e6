//! HTTP client with authentication, TTL caching and retry
//!
//! Each call is attempted up to `retry_attempts` times. Timeouts, transport
//! failures and 429 responses are retried after `backoff_base * 2^n`; 401/403
//! fail at once with [`ClientError::Auth`]; any other non-2xx fails at once
//! with [`ClientError::Connection`].

use polyquery_types::runtime::{
    AnalyzeRequest, ConfigResponse, ConfigSummary, ConnectionStatusResponse, ConnectionSummary,
    ConnectionsResponse, CreateConnectionRequest, CreateUserRequest, Datasource,
    DirectoryNode, DirectoryTreeResponse, FileContent, FileContentResponse, FileEntry,
    FileMetadataResponse, InsightResponse, ItemsResponse, Project, QueryRequest, QueryResponse,
    RecommendRequest, SchemaResponse, StatsResponse, StatsSnapshot, TableInfoResponse,
    TablesResponse, UpdateConnectionRequest, UserSummary, UsersResponse, Workbook, WorkbookView,
};
use polyquery_types::{QueryParams, Role, SchemaDescriptor, StatementKind, TableLookup};
use reqwest::{Client, Method, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::ResponseCache;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Shown to users while the service cannot be reached
pub const OFFLINE_MESSAGE: &str =
    "The Polyquery service is currently unreachable. Please try again in a few minutes.";

/// One logical request, rebuilt for every attempt
#[derive(Debug, Clone)]
struct Call {
    method: Method,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl Call {
    fn new(method: Method, segments: &[&str]) -> Self {
        Self {
            method,
            segments: segments.iter().map(|s| s.to_string()).collect(),
            query: Vec::new(),
            body: None,
        }
    }

    fn get(segments: &[&str]) -> Self {
        Self::new(Method::GET, segments)
    }

    fn post(segments: &[&str], body: impl Serialize) -> Result<Self> {
        Self::new(Method::POST, segments).json(body)
    }

    fn json(mut self, body: impl Serialize) -> Result<Self> {
        let body = serde_json::to_value(body).map_err(|e| ClientError::Decode(e.to_string()))?;
        self.body = Some(body);
        Ok(self)
    }

    fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    fn endpoint(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

/// Remote client for a Polyquery server
pub struct PolyqueryClient {
    http: Client,
    config: ClientConfig,
    cache: ResponseCache,
}

impl PolyqueryClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            cache: ResponseCache::new(config.cache_ttl),
            config,
        })
    }

    /// Client configured from `POLYQUERY_URL` and `POLYQUERY_API_KEY`
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, call: &Call) -> Result<Url> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| ClientError::Config(format!("invalid base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Config("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(&call.segments);
        Ok(url)
    }

    /// Delay after failed attempt `n` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.config
            .backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    async fn send(&self, call: &Call) -> Result<Response> {
        let max_attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(call, attempt).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "{} {} failed ({}), attempt {}/{}, retrying in {:?}",
                        call.method,
                        call.endpoint(),
                        e,
                        attempt,
                        max_attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, call: &Call, attempt: u32) -> Result<Response> {
        let mut request = self
            .http
            .request(call.method.clone(), self.url(call)?)
            .bearer_auth(&self.config.api_key);
        if !call.query.is_empty() {
            request = request.query(&call.query);
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout { attempts: attempt }
            } else if e.is_builder() {
                ClientError::Config(e.to_string())
            } else {
                ClientError::Connection {
                    status: None,
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.is_success() {
            debug!("{} {} -> {}", call.method, call.endpoint(), status.as_u16());
            return Ok(response);
        }

        let message = error_message(response).await;
        match status.as_u16() {
            401 | 403 => Err(ClientError::Auth {
                status: status.as_u16(),
                message,
            }),
            code => Err(ClientError::Connection {
                status: Some(code),
                message,
            }),
        }
    }

    async fn json<T: DeserializeOwned>(&self, call: Call) -> Result<T> {
        self.send(&call)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn bytes(&self, call: Call) -> Result<Vec<u8>> {
        let response = self.send(&call).await?;
        let bytes = response.bytes().await.map_err(|e| ClientError::Connection {
            status: None,
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    /// Serve from the cache when allowed, otherwise fetch and populate it
    async fn cached<T: DeserializeOwned>(&self, call: Call, params: Value, use_cache: bool) -> Result<T> {
        if !use_cache {
            return self.json(call).await;
        }

        let key = ResponseCache::key(&call.endpoint(), &params);
        if let Some(payload) = self.cache.get(&key).await {
            debug!("Cache hit: {}", key);
            return serde_json::from_value(payload).map_err(|e| ClientError::Decode(e.to_string()));
        }

        let payload: Value = self.json(call).await?;
        let typed = serde_json::from_value(payload.clone())
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        self.cache.put(key, payload).await;
        Ok(typed)
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    // Liveness

    /// Single unauthenticated check of `/health`; never errors
    pub async fn health_check(&self) -> bool {
        let call = Call::get(&["health"]);
        let url = match self.url(&call) {
            Ok(url) => url,
            Err(_) => return false,
        };
        match self.http.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health check failed: {}", e);
                false
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.health_check().await
    }

    pub fn offline_message(&self) -> &'static str {
        OFFLINE_MESSAGE
    }

    // Queries and catalogs

    /// Run a statement. Only read statements are served from or stored in the cache.
    pub async fn execute_query(
        &self,
        connection: &str,
        query: &str,
        params: Option<QueryParams>,
        use_cache: bool,
    ) -> Result<QueryResponse> {
        let request = QueryRequest {
            connection: connection.to_string(),
            query: query.to_string(),
            params,
        };
        let cache_params = json!({
            "connection": request.connection,
            "query": request.query,
            "params": request.params,
        });
        let cacheable = use_cache && StatementKind::classify(query).is_read();
        let call = Call::post(&["api", "query"], &request)?;
        self.cached(call, cache_params, cacheable).await
    }

    pub async fn get_schema(&self, connection: &str, use_cache: bool) -> Result<SchemaDescriptor> {
        let call = Call::get(&["api", "schema", connection]);
        let response: SchemaResponse = self
            .cached(call, json!({"connection": connection}), use_cache)
            .await?;
        Ok(response.schema)
    }

    pub async fn get_tables(&self, connection: &str) -> Result<Vec<String>> {
        let response: TablesResponse = self.json(Call::get(&["api", "tables", connection])).await?;
        Ok(response.tables)
    }

    /// A missing table is a [`TableLookup::Missing`] value, not an error
    pub async fn get_table_info(&self, connection: &str, table: &str) -> Result<TableLookup> {
        match self
            .json::<TableInfoResponse>(Call::get(&["api", "tables", connection, table]))
            .await
        {
            Ok(response) => Ok(TableLookup::Found(response.table)),
            Err(ClientError::Connection {
                status: Some(404),
                message,
            }) if message == TableLookup::NOT_FOUND => Ok(TableLookup::not_found()),
            Err(e) => Err(e),
        }
    }

    pub async fn analyze(&self, connection: &str, query: &str, analysis_type: &str) -> Result<String> {
        let request = AnalyzeRequest {
            connection: connection.to_string(),
            query: query.to_string(),
            analysis_type: analysis_type.to_string(),
        };
        let response: InsightResponse = self.json(Call::post(&["api", "ai", "analyze"], &request)?).await?;
        Ok(response.insight)
    }

    pub async fn recommend(&self, connection: &str, context: &str) -> Result<String> {
        let request = RecommendRequest {
            connection: connection.to_string(),
            context: context.to_string(),
        };
        let response: InsightResponse =
            self.json(Call::post(&["api", "ai", "recommend"], &request)?).await?;
        Ok(response.insight)
    }

    // Connections

    pub async fn list_connections(&self) -> Result<Vec<ConnectionSummary>> {
        let response: ConnectionsResponse = self.json(Call::get(&["api", "connections"])).await?;
        Ok(response.connections)
    }

    pub async fn create_connection(
        &self,
        name: &str,
        engine: &str,
        params: Map<String, Value>,
    ) -> Result<ConnectionStatusResponse> {
        let request = CreateConnectionRequest {
            name: name.to_string(),
            engine: engine.to_string(),
            params,
        };
        self.json(Call::post(&["api", "connections"], &request)?).await
    }

    pub async fn update_connection(
        &self,
        name: &str,
        engine: Option<&str>,
        params: Map<String, Value>,
    ) -> Result<ConnectionStatusResponse> {
        let request = UpdateConnectionRequest {
            engine: engine.map(str::to_string),
            params,
        };
        self.json(Call::new(Method::PUT, &["api", "connections", name]).json(&request)?)
            .await
    }

    pub async fn delete_connection(&self, name: &str) -> Result<ConnectionStatusResponse> {
        self.json(Call::new(Method::DELETE, &["api", "connections", name]))
            .await
    }

    pub async fn test_connection(&self, name: &str) -> Result<bool> {
        let response: ConnectionStatusResponse = self
            .json(Call::get(&["api", "connections", name, "test"]))
            .await?;
        Ok(response.success)
    }

    // Administration

    pub async fn stats(&self) -> Result<StatsSnapshot> {
        let response: StatsResponse = self.json(Call::get(&["api", "stats"])).await?;
        Ok(response.stats)
    }

    pub async fn list_users(&self) -> Result<Vec<UserSummary>> {
        let response: UsersResponse = self.json(Call::get(&["api", "users"])).await?;
        Ok(response.users)
    }

    pub async fn create_user(&self, name: &str, role: Role, api_key: &str) -> Result<UserSummary> {
        let request = CreateUserRequest {
            name: name.to_string(),
            role,
            api_key: api_key.to_string(),
        };
        self.json(Call::post(&["api", "users"], &request)?).await
    }

    pub async fn server_config(&self) -> Result<ConfigSummary> {
        let response: ConfigResponse = self.json(Call::get(&["api", "config"])).await?;
        Ok(response.config)
    }

    // Files

    pub async fn list_files(
        &self,
        connection: &str,
        path: Option<&str>,
        recursive: bool,
        extension: Option<&str>,
    ) -> Result<Vec<FileEntry>> {
        let mut call = Call::get(&["api", "files", connection]).query("recursive", recursive);
        if let Some(path) = path {
            call = call.query("path", path);
        }
        if let Some(extension) = extension {
            call = call.query("ext", extension);
        }
        let response: ItemsResponse<FileEntry> = self.json(call).await?;
        Ok(response.items)
    }

    pub async fn read_file(&self, connection: &str, path: &str) -> Result<FileContent> {
        let call = Call::get(&["api", "files", connection, "content"]).query("path", path);
        let response: FileContentResponse = self.json(call).await?;
        Ok(response.file)
    }

    pub async fn read_binary(&self, connection: &str, path: &str) -> Result<Vec<u8>> {
        self.bytes(Call::get(&["api", "files", connection, "raw"]).query("path", path))
            .await
    }

    pub async fn search_files(&self, connection: &str, pattern: &str) -> Result<Vec<FileEntry>> {
        let call = Call::get(&["api", "files", connection, "search"]).query("pattern", pattern);
        let response: ItemsResponse<FileEntry> = self.json(call).await?;
        Ok(response.items)
    }

    pub async fn file_metadata(&self, connection: &str, path: &str) -> Result<FileEntry> {
        let call = Call::get(&["api", "files", connection, "metadata"]).query("path", path);
        let response: FileMetadataResponse = self.json(call).await?;
        Ok(response.metadata)
    }

    pub async fn directory_tree(&self, connection: &str, max_depth: Option<usize>) -> Result<DirectoryNode> {
        let mut call = Call::get(&["api", "files", connection, "tree"]);
        if let Some(depth) = max_depth {
            call = call.query("max_depth", depth);
        }
        let response: DirectoryTreeResponse = self.json(call).await?;
        Ok(response.tree)
    }

    // BI content

    pub async fn list_workbooks(&self, connection: &str) -> Result<Vec<Workbook>> {
        let response: ItemsResponse<Workbook> =
            self.json(Call::get(&["api", "workbooks", connection])).await?;
        Ok(response.items)
    }

    pub async fn list_views(&self, connection: &str, workbook_id: &str) -> Result<Vec<WorkbookView>> {
        let response: ItemsResponse<WorkbookView> = self
            .json(Call::get(&["api", "workbooks", connection, workbook_id, "views"]))
            .await?;
        Ok(response.items)
    }

    pub async fn list_datasources(&self, connection: &str) -> Result<Vec<Datasource>> {
        let response: ItemsResponse<Datasource> =
            self.json(Call::get(&["api", "datasources", connection])).await?;
        Ok(response.items)
    }

    pub async fn list_projects(&self, connection: &str) -> Result<Vec<Project>> {
        let response: ItemsResponse<Project> =
            self.json(Call::get(&["api", "projects", connection])).await?;
        Ok(response.items)
    }

    /// `format` is one of `image`, `pdf` or `data`
    pub async fn export_view(&self, connection: &str, view_id: &str, format: &str) -> Result<Vec<u8>> {
        self.bytes(Call::get(&["api", "views", connection, view_id, format]))
            .await
    }
}

impl std::fmt::Debug for PolyqueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolyqueryClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Server message from an error body, falling back to the status reason
async fn error_message(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let from_body = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| body.get("error").and_then(Value::as_str).map(str::to_string));
    match from_body {
        Some(message) => message,
        None if !text.trim().is_empty() => text.trim().to_string(),
        None => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    }
}
