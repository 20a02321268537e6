//! Query execution module
//!
//! Every dispatch is gated by exactly one capability, then resolved through the
//! connection registry to a live connector.

mod validator;

pub use validator::{InputValidator, MAX_TREE_DEPTH};

use polyquery_core::{
    error::Result, Authorizer, ConnectionDescriptor, InsightGenerator, PolyqueryError,
};
use polyquery_types::runtime::{
    ConnectionSummary, Datasource, DirectoryNode, FileContent, FileEntry, Project, Workbook,
    WorkbookView,
};
use polyquery_types::{
    Capability, EngineType, Principal, QueryParams, RowSet, SchemaDescriptor, StatementKind,
    TableLookup,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::content::ListOptions;
use crate::registry::ConnectionRegistry;
use crate::state::SharedStats;

/// Rendering formats of a BI view export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewExport {
    Image,
    Pdf,
    Data,
}

impl ViewExport {
    pub fn content_type(&self) -> &'static str {
        match self {
            ViewExport::Image => "image/png",
            ViewExport::Pdf => "application/pdf",
            ViewExport::Data => "text/csv",
        }
    }
}

impl std::str::FromStr for ViewExport {
    type Err = PolyqueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "image" => Ok(ViewExport::Image),
            "pdf" => Ok(ViewExport::Pdf),
            "data" => Ok(ViewExport::Data),
            other => Err(PolyqueryError::Validation(format!(
                "unknown view format '{}' (expected image, pdf or data)",
                other
            ))),
        }
    }
}

/// Dispatches authorized requests to connectors
pub struct QueryExecutor {
    registry: Arc<ConnectionRegistry>,
    authorizer: Arc<dyn Authorizer>,
    insights: Arc<dyn InsightGenerator>,
    stats: SharedStats,
    validator: InputValidator,
}

impl QueryExecutor {
    /// Create a new query executor
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        authorizer: Arc<dyn Authorizer>,
        insights: Arc<dyn InsightGenerator>,
        stats: SharedStats,
    ) -> Self {
        Self {
            registry,
            authorizer,
            insights,
            stats,
            validator: InputValidator::new(),
        }
    }

    /// RBAC gate; denials are counted
    pub async fn authorize(&self, capability: Capability, principal: &Principal) -> Result<()> {
        if self.authorizer.authorize(capability, principal).is_allowed() {
            return Ok(());
        }
        self.stats.lock().await.record_denied();
        warn!(
            "Denied {} to '{}' ({})",
            capability, principal.name, principal.role
        );
        Err(PolyqueryError::PermissionDenied(format!(
            "role '{}' lacks '{}'",
            principal.role, capability
        )))
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    // Connections

    pub async fn list_connections(&self, principal: &Principal) -> Result<Vec<ConnectionSummary>> {
        self.authorize(Capability::ViewConnections, principal).await?;
        Ok(self.registry.list().await)
    }

    pub async fn create_connection(
        &self,
        principal: &Principal,
        descriptor: ConnectionDescriptor,
    ) -> Result<()> {
        self.authorize(Capability::CreateConnections, principal).await?;
        self.registry.create(descriptor).await
    }

    pub async fn update_connection(
        &self,
        principal: &Principal,
        name: &str,
        engine: Option<EngineType>,
        params: Map<String, Value>,
    ) -> Result<()> {
        self.authorize(Capability::EditConnections, principal).await?;
        self.registry.update(name, engine, params).await.map(|_| ())
    }

    pub async fn delete_connection(&self, principal: &Principal, name: &str) -> Result<()> {
        self.authorize(Capability::DeleteConnections, principal).await?;
        self.registry.delete(name).await
    }

    pub async fn test_connection(&self, principal: &Principal, name: &str) -> Result<bool> {
        self.authorize(Capability::TestConnections, principal).await?;
        self.registry.test(name).await
    }

    // SQL

    /// Run a statement; writes need the write capability
    pub async fn execute_query(
        &self,
        principal: &Principal,
        connection: &str,
        query: &str,
        params: Option<&QueryParams>,
    ) -> Result<RowSet> {
        let capability = if StatementKind::classify(query).is_read() {
            Capability::ExecuteQueries
        } else {
            Capability::ExecuteWriteQueries
        };
        self.authorize(capability, principal).await?;
        self.run_query(connection, query, params).await
    }

    async fn run_query(
        &self,
        connection: &str,
        query: &str,
        params: Option<&QueryParams>,
    ) -> Result<RowSet> {
        self.validator.connection(connection)?;
        self.validator.query(query, params)?;

        let result = async {
            let connector = self.registry.connected(connection).await?.as_sql()?;
            connector.execute_query(query, params).await
        }
        .await;

        self.stats
            .lock()
            .await
            .record_query(connection, result.is_ok());
        match &result {
            Ok(rows) => debug!("Query on '{}' returned {} row(s)", connection, rows.len()),
            Err(e) => warn!("Query on '{}' failed: {}", connection, e),
        }
        result
    }

    pub async fn get_schema(
        &self,
        principal: &Principal,
        connection: &str,
        database: Option<&str>,
    ) -> Result<SchemaDescriptor> {
        self.authorize(Capability::ViewSchema, principal).await?;
        let connector = self.registry.connected(connection).await?.as_sql()?;
        connector.get_schema(database).await
    }

    pub async fn get_tables(
        &self,
        principal: &Principal,
        connection: &str,
        database: Option<&str>,
    ) -> Result<Vec<String>> {
        self.authorize(Capability::ViewTables, principal).await?;
        let connector = self.registry.connected(connection).await?.as_sql()?;
        connector.get_tables(database).await
    }

    pub async fn get_table_info(
        &self,
        principal: &Principal,
        connection: &str,
        table: &str,
        database: Option<&str>,
    ) -> Result<TableLookup> {
        self.authorize(Capability::ViewTableInfo, principal).await?;
        let connector = self.registry.connected(connection).await?.as_sql()?;
        connector.get_table_info(table, database).await
    }

    // Insights

    /// Run a read statement and summarize its rows
    pub async fn analyze(
        &self,
        principal: &Principal,
        connection: &str,
        query: &str,
        analysis_type: &str,
    ) -> Result<String> {
        self.authorize(Capability::UseAiAnalysis, principal).await?;
        if !StatementKind::classify(query).is_read() {
            return Err(PolyqueryError::Validation(
                "analysis runs read statements only".to_string(),
            ));
        }
        let rows = self.run_query(connection, query, None).await?;
        Ok(self.insights.analyze(&rows, analysis_type))
    }

    pub async fn recommend(
        &self,
        principal: &Principal,
        connection: &str,
        context: &str,
    ) -> Result<String> {
        self.authorize(Capability::UseAiRecommendations, principal).await?;
        let connector = self.registry.connected(connection).await?.as_sql()?;
        let schema = connector.get_schema(None).await?;
        Ok(self.insights.recommend(&schema, context))
    }

    // Files

    pub async fn list_files(
        &self,
        principal: &Principal,
        connection: &str,
        options: &ListOptions,
    ) -> Result<Vec<FileEntry>> {
        self.authorize(Capability::BrowseFiles, principal).await?;
        let source = self.registry.connected(connection).await?.as_files()?;
        source.list_files(options).await
    }

    pub async fn read_file(
        &self,
        principal: &Principal,
        connection: &str,
        path: &str,
    ) -> Result<FileContent> {
        self.authorize(Capability::ReadFiles, principal).await?;
        self.validator.path(path)?;
        let source = self.registry.connected(connection).await?.as_files()?;
        source.read_file(path).await
    }

    pub async fn read_binary(
        &self,
        principal: &Principal,
        connection: &str,
        path: &str,
    ) -> Result<Vec<u8>> {
        self.authorize(Capability::ReadFiles, principal).await?;
        self.validator.path(path)?;
        let source = self.registry.connected(connection).await?.as_files()?;
        source.read_binary(path).await
    }

    pub async fn search_files(
        &self,
        principal: &Principal,
        connection: &str,
        pattern: &str,
    ) -> Result<Vec<FileEntry>> {
        self.authorize(Capability::SearchFiles, principal).await?;
        self.validator.pattern(pattern)?;
        let source = self.registry.connected(connection).await?.as_files()?;
        source.search(pattern).await
    }

    pub async fn file_metadata(
        &self,
        principal: &Principal,
        connection: &str,
        path: &str,
    ) -> Result<FileEntry> {
        self.authorize(Capability::BrowseFiles, principal).await?;
        self.validator.path(path)?;
        let source = self.registry.connected(connection).await?.as_files()?;
        source.get_metadata(path).await
    }

    pub async fn directory_tree(
        &self,
        principal: &Principal,
        connection: &str,
        max_depth: Option<usize>,
    ) -> Result<DirectoryNode> {
        self.authorize(Capability::BrowseFiles, principal).await?;
        let depth = self.validator.tree_depth(max_depth);
        let source = self.registry.connected(connection).await?.as_files()?;
        source.directory_tree(depth).await
    }

    // BI content

    pub async fn list_workbooks(&self, principal: &Principal, connection: &str) -> Result<Vec<Workbook>> {
        self.authorize(Capability::ViewWorkbooks, principal).await?;
        let tableau = self.registry.connected(connection).await?.as_tableau()?;
        tableau.list_workbooks().await
    }

    pub async fn list_views(
        &self,
        principal: &Principal,
        connection: &str,
        workbook_id: &str,
    ) -> Result<Vec<WorkbookView>> {
        self.authorize(Capability::ViewWorkbooks, principal).await?;
        let tableau = self.registry.connected(connection).await?.as_tableau()?;
        tableau.list_views(workbook_id).await
    }

    pub async fn list_datasources(
        &self,
        principal: &Principal,
        connection: &str,
    ) -> Result<Vec<Datasource>> {
        self.authorize(Capability::ViewWorkbooks, principal).await?;
        let tableau = self.registry.connected(connection).await?.as_tableau()?;
        tableau.list_datasources().await
    }

    pub async fn list_projects(&self, principal: &Principal, connection: &str) -> Result<Vec<Project>> {
        self.authorize(Capability::ViewWorkbooks, principal).await?;
        let tableau = self.registry.connected(connection).await?.as_tableau()?;
        tableau.list_projects().await
    }

    pub async fn export_view(
        &self,
        principal: &Principal,
        connection: &str,
        view_id: &str,
        format: ViewExport,
    ) -> Result<Vec<u8>> {
        self.authorize(Capability::ExportViews, principal).await?;
        let tableau = self.registry.connected(connection).await?.as_tableau()?;
        info!("Exporting view '{}' on '{}' as {:?}", view_id, connection, format);
        match format {
            ViewExport::Image => tableau.view_as_image(view_id).await,
            ViewExport::Pdf => tableau.view_as_pdf(view_id).await,
            ViewExport::Data => tableau.query_view_data(view_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RoleAuthorizer;
    use crate::insight::SummaryInsights;
    use crate::state::Stats;
    use polyquery_parser::EnvSecretStore;
    use polyquery_types::Role;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn executor() -> (QueryExecutor, SharedStats) {
        let stats: SharedStats = Arc::new(Mutex::new(Stats::new()));
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(EnvSecretStore::new()),
            Duration::from_secs(1),
            Duration::from_secs(1),
        ));
        let executor = QueryExecutor::new(
            registry,
            Arc::new(RoleAuthorizer),
            Arc::new(SummaryInsights),
            stats.clone(),
        );
        (executor, stats)
    }

    #[tokio::test]
    async fn test_write_needs_write_capability() {
        let (executor, stats) = executor();
        let analyst = Principal::new("ana", Role::Analyst);

        let err = executor
            .execute_query(&analyst, "pg", "DELETE FROM users", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PolyqueryError::PermissionDenied(_)));
        assert_eq!(stats.lock().await.snapshot(0).denied_requests, 1);
    }

    #[tokio::test]
    async fn test_disguised_writes_need_write_capability() {
        let (executor, stats) = executor();
        let analyst = Principal::new("ana", Role::Analyst);

        let statements = [
            "WITH x AS (SELECT 1) DELETE FROM users",
            "WITH d AS (DELETE FROM users RETURNING *) SELECT * FROM d",
            "SELECT 1; DROP TABLE users",
            "SELECT * INTO backup FROM users",
        ];
        for sql in statements {
            let err = executor
                .execute_query(&analyst, "pg", sql, None)
                .await
                .unwrap_err();
            assert!(matches!(err, PolyqueryError::PermissionDenied(_)), "{sql}");
        }
        assert_eq!(
            stats.lock().await.snapshot(0).denied_requests,
            statements.len() as u64
        );
    }

    #[tokio::test]
    async fn test_missing_connection_is_counted_as_failed_query() {
        let (executor, stats) = executor();
        let admin = Principal::new("root", Role::Admin);

        let err = executor
            .execute_query(&admin, "missing_conn", "SELECT 1", None)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.to_string(), "connection not found: missing_conn");

        let snapshot = stats.lock().await.snapshot(0);
        assert_eq!(snapshot.total_queries, 1);
        assert_eq!(snapshot.failed_queries, 1);
    }

    #[tokio::test]
    async fn test_family_mismatch_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "x,y\n1,2\n").unwrap();
        let (executor, _) = executor();
        let admin = Principal::new("root", Role::Admin);
        executor
            .create_connection(
                &admin,
                ConnectionDescriptor::new(
                    "docs",
                    EngineType::Filesystem,
                    json!({"root_path": dir.path().to_string_lossy()})
                        .as_object()
                        .cloned()
                        .unwrap(),
                ),
            )
            .await
            .unwrap();

        let err = executor
            .get_tables(&admin, "docs", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PolyqueryError::Unsupported(_)));

        let files = executor
            .list_files(&admin, "docs", &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        let content = executor.read_file(&admin, "docs", "a.csv").await.unwrap();
        assert!(content.content.starts_with("x,y"));
    }

    #[tokio::test]
    async fn test_analysis_rejects_writes() {
        let (executor, _) = executor();
        let analyst = Principal::new("ana", Role::Analyst);
        let err = executor
            .analyze(&analyst, "pg", "DROP TABLE users", "summary")
            .await
            .unwrap_err();
        assert!(matches!(err, PolyqueryError::Validation(_)));
    }

    #[test]
    fn test_view_export_formats() {
        assert_eq!("pdf".parse::<ViewExport>().unwrap(), ViewExport::Pdf);
        assert_eq!(ViewExport::Data.content_type(), "text/csv");
        assert!("gif".parse::<ViewExport>().is_err());
    }
}
