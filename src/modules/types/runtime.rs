//! Request/response bodies of the HTTP surface

use crate::capability::Role;
use crate::schema::{QueryParams, RowSet, SchemaDescriptor, TableInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Query execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Connection name
    pub connection: String,
    /// Statement text
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<QueryParams>,
}

/// Query execution response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Whether the query succeeded
    pub success: bool,
    /// Error message if the query failed
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Query results
    #[serde(default)]
    pub results: RowSet,
    #[serde(default)]
    pub row_count: usize,
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl QueryResponse {
    /// Create a successful response with results
    pub fn success(results: RowSet, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            error: String::new(),
            row_count: results.len(),
            results,
            execution_time_ms,
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            results: Vec::new(),
            row_count: 0,
            execution_time_ms: 0,
        }
    }
}

/// Body of every failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// `POST /api/connections`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConnectionRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub engine: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// `PUT /api/connections/{name}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConnectionRequest {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// A registered connection as shown to callers. Never carries params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub engine: String,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionsResponse {
    pub success: bool,
    pub connections: Vec<ConnectionSummary>,
}

/// Outcome of a mutation or check on one connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatusResponse {
    pub success: bool,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaResponse {
    pub success: bool,
    pub connection: String,
    pub schema: SchemaDescriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablesResponse {
    pub success: bool,
    pub connection: String,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfoResponse {
    pub success: bool,
    pub connection: String,
    pub table: TableInfo,
}

/// `POST /api/ai/analyze`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub connection: String,
    pub query: String,
    #[serde(default = "default_analysis_type")]
    pub analysis_type: String,
}

fn default_analysis_type() -> String {
    "summary".to_string()
}

/// `POST /api/ai/recommend`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendRequest {
    pub connection: String,
    #[serde(default)]
    pub context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightResponse {
    pub success: bool,
    pub connection: String,
    pub insight: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Process wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub total_queries: u64,
    pub failed_queries: u64,
    pub denied_requests: u64,
    pub uptime_secs: u64,
    pub connections: usize,
    #[serde(default)]
    pub queries_by_connection: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: StatsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersResponse {
    pub success: bool,
    pub users: Vec<UserSummary>,
}

/// `POST /api/users`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub role: Role,
    pub api_key: String,
}

/// Non-secret view of the running configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub name: String,
    pub version: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub connections: BTreeMap<String, String>,
    pub users: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub success: bool,
    pub config: ConfigSummary,
}

/// File or folder exposed by a file connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    /// Path relative to the connector root, or the remote id
    pub path: String,
    pub is_dir: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Text content of a file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    pub size: u64,
    /// True when the read was cut at the configured cap
    #[serde(default)]
    pub truncated: bool,
}

/// Node of a directory tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DirectoryNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workbook {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub content_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbookView {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub content_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workbook_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datasource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_project_id: Option<String>,
}

/// Listing envelope used by file and workbook routes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemsResponse<T> {
    pub success: bool,
    pub connection: String,
    pub count: usize,
    pub items: Vec<T>,
}

impl<T> ItemsResponse<T> {
    pub fn new(connection: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            success: true,
            connection: connection.into(),
            count: items.len(),
            items,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContentResponse {
    pub success: bool,
    pub connection: String,
    pub file: FileContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadataResponse {
    pub success: bool,
    pub connection: String,
    pub metadata: FileEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryTreeResponse {
    pub success: bool,
    pub connection: String,
    pub tree: DirectoryNode,
}
