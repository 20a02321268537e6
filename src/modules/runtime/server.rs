//! HTTP server for Polyquery

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use polyquery_core::{Model, PolyqueryError, SecretStore};
use polyquery_parser::EnvSecretStore;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::auth::{require_bearer, RoleAuthorizer, UserDirectory};
use crate::executor::QueryExecutor;
use crate::handlers::{
    AdminHandler, ConnectionHandler, FileHandler, InsightHandler, QueryHandler, WorkbookHandler,
};
use crate::insight::SummaryInsights;
use crate::registry::ConnectionRegistry;
use crate::state::{AppState, ServerInfo, Stats};

/// Runtime server for Polyquery
pub struct Runtime {
    model: Arc<Model>,
    state: AppState,
    port_override: Option<u16>,
}

/// Apply port override to a model configuration
fn apply_port_override(mut model: Model, port_override: Option<u16>) -> Model {
    if let Some(port) = port_override {
        model.server.port = Some(port);
    }
    model
}

fn build_state(model: &Model, secrets: Arc<dyn SecretStore>) -> AppState {
    let stats = Arc::new(Mutex::new(Stats::new()));
    let registry = Arc::new(ConnectionRegistry::from_model(model, secrets));
    let executor = Arc::new(QueryExecutor::new(
        registry.clone(),
        Arc::new(RoleAuthorizer),
        Arc::new(SummaryInsights),
        stats.clone(),
    ));
    AppState {
        executor,
        registry,
        users: Arc::new(UserDirectory::new(&model.users)),
        stats,
        info: Arc::new(ServerInfo {
            name: model.name.clone(),
            port: model.port(),
            request_timeout: model.server.request_timeout(),
        }),
    }
}

/// The full HTTP surface; everything under `/api` requires a bearer key
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let timeout = TimeoutLayer::new(state.info.request_timeout);

    let api = Router::new()
        .route("/stats", get(AdminHandler::stats))
        .route("/config", get(AdminHandler::config))
        .route(
            "/users",
            get(AdminHandler::list_users).post(AdminHandler::create_user),
        )
        // Connections
        .route(
            "/connections",
            get(ConnectionHandler::list).post(ConnectionHandler::create),
        )
        .route(
            "/connections/:name",
            axum::routing::put(ConnectionHandler::update).delete(ConnectionHandler::delete),
        )
        .route("/connections/:name/test", get(ConnectionHandler::test))
        // SQL
        .route("/query", post(QueryHandler::execute))
        .route("/schema/:connection", get(QueryHandler::schema))
        .route("/tables/:connection", get(QueryHandler::tables))
        .route("/tables/:connection/:table", get(QueryHandler::table_info))
        // Insights
        .route("/ai/analyze", post(InsightHandler::analyze))
        .route("/ai/recommend", post(InsightHandler::recommend))
        // Files
        .route("/files/:connection", get(FileHandler::list))
        .route("/files/:connection/content", get(FileHandler::content))
        .route("/files/:connection/raw", get(FileHandler::raw))
        .route("/files/:connection/search", get(FileHandler::search))
        .route("/files/:connection/metadata", get(FileHandler::metadata))
        .route("/files/:connection/tree", get(FileHandler::tree))
        // BI content
        .route("/workbooks/:connection", get(WorkbookHandler::workbooks))
        .route(
            "/workbooks/:connection/:workbook/views",
            get(WorkbookHandler::views),
        )
        .route("/datasources/:connection", get(WorkbookHandler::datasources))
        .route("/projects/:connection", get(WorkbookHandler::projects))
        .route(
            "/views/:connection/:view/:format",
            get(WorkbookHandler::export),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/health", get(AdminHandler::health))
        .nest("/api", api)
        .with_state(state)
        .layer(cors)
        .layer(timeout)
        .layer(TraceLayer::new_for_http())
}

impl Runtime {
    /// Create a new runtime from a model configuration
    pub fn new(model: Model) -> Self {
        Self::with_port_override(model, None)
    }

    /// Create a new runtime with an optional port override
    pub fn with_port_override(model: Model, port_override: Option<u16>) -> Self {
        let model = apply_port_override(model, port_override);
        let state = build_state(&model, Arc::new(EnvSecretStore::new()));
        Self {
            model: Arc::new(model),
            state,
            port_override,
        }
    }

    /// Start the server and stop on CTRL+C or SIGTERM
    pub async fn run(&self) -> Result<(), PolyqueryError> {
        self.run_until(Self::shutdown_signal()).await
    }

    /// Start the server and stop gracefully once `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), PolyqueryError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("0.0.0.0:{}", self.model.port())
            .parse()
            .map_err(|e| PolyqueryError::Server(format!("Invalid address: {}", e)))?;

        let app = router(self.state.clone());

        info!("Starting Polyquery server on http://{}", addr);
        info!("Deployment: {}", self.model.name);
        info!(
            "Connections: {}",
            self.state.registry.names().await.join(", ")
        );
        info!("Users: {}", self.state.users.len().await);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| PolyqueryError::Server(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| PolyqueryError::Server(format!("Server error: {}", e)))?;

        info!("Server stopped");
        self.shutdown().await;

        Ok(())
    }

    /// Wait for CTRL+C or SIGTERM
    pub async fn shutdown_signal() {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                debug!("CTRL+C handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    debug!("SIGTERM handler unavailable: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                debug!("Received CTRL+C, shutting down...");
            }
            _ = terminate => {
                debug!("Received SIGTERM, shutting down...");
            }
        }
    }

    /// Gracefully shutdown the runtime
    pub async fn shutdown(&self) {
        info!("Closing connections...");
        self.state.registry.close_all().await;
        info!("Shutdown complete");
    }

    /// Reload the runtime with a new model configuration
    pub async fn reload(&mut self, new_model: Model) {
        info!("Reloading configuration...");
        self.state.registry.close_all().await;

        let model = apply_port_override(new_model, self.port_override);
        self.state = build_state(&model, Arc::new(EnvSecretStore::new()));
        self.model = Arc::new(model);

        info!("Configuration reloaded successfully");
    }

    /// Get the model
    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use polyquery_core::UserConfig;
    use polyquery_types::Role;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn create_test_model() -> Model {
        let mut model = Model::new("test-api");
        model.users.push(UserConfig::new("admin", "admin-key", Role::Admin));
        model.users.push(UserConfig::new("viewer", "viewer-key", Role::Viewer));
        model
    }

    fn app() -> Router {
        router(build_state(&create_test_model(), Arc::new(EnvSecretStore::new())))
    }

    fn request(method: &str, uri: &str, key: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header("authorization", format!("Bearer {}", key));
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[test]
    fn test_apply_port_override() {
        let result = apply_port_override(create_test_model(), Some(3000));
        assert_eq!(result.port(), 3000);
        let result = apply_port_override(create_test_model(), None);
        assert_eq!(result.port(), 8080);
    }

    #[tokio::test]
    async fn test_health_needs_no_key() {
        let app = app();
        let (status, body) = send(&app, request("GET", "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_api_requires_known_bearer_key() {
        let app = app();
        let (status, body) = send(&app, request("GET", "/api/connections", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let (status, _) =
            send(&app, request("GET", "/api/connections", Some("wrong"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_connection_is_404() {
        let app = app();
        let (status, body) = send(
            &app,
            request(
                "POST",
                "/api/query",
                Some("admin-key"),
                Some(json!({"connection": "missing_conn", "query": "SELECT 1"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "connection not found: missing_conn");

        let (status, _) = send(&app, request("GET", "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_then_list_connection() {
        let dir = tempfile::tempdir().unwrap();
        let app = app();
        let (status, _) = send(
            &app,
            request(
                "POST",
                "/api/connections",
                Some("admin-key"),
                Some(json!({
                    "name": "docs",
                    "type": "filesystem",
                    "params": {"root_path": dir.path().to_string_lossy()}
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) =
            send(&app, request("GET", "/api/connections", Some("viewer-key"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connections"][0]["name"], "docs");
        assert_eq!(body["connections"][0]["type"], "filesystem");
        assert!(body["connections"][0].get("params").is_none());
    }

    #[tokio::test]
    async fn test_viewer_cannot_create_connections() {
        let app = app();
        let (status, body) = send(
            &app,
            request(
                "POST",
                "/api/connections",
                Some("viewer-key"),
                Some(json!({"name": "x", "type": "filesystem", "params": {"root_path": "/tmp"}})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);

        let (_, body) = send(&app, request("GET", "/api/stats", Some("admin-key"), None)).await;
        assert_eq!(body["stats"]["denied_requests"], 1);
        assert_eq!(body["stats"]["total_requests"], 2);
    }

    #[tokio::test]
    async fn test_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("reports")).unwrap();
        std::fs::write(dir.path().join("reports/q1.csv"), "a,b\n1,2\n").unwrap();

        let mut model = create_test_model();
        model.connections.push(polyquery_core::ConnectionDescriptor::new(
            "docs",
            polyquery_types::EngineType::Filesystem,
            json!({"root_path": dir.path().to_string_lossy()})
                .as_object()
                .cloned()
                .unwrap(),
        ));
        let app = router(build_state(&model, Arc::new(EnvSecretStore::new())));

        let (status, body) = send(
            &app,
            request("GET", "/api/files/docs?recursive=true&ext=csv", Some("admin-key"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let (status, body) = send(
            &app,
            request(
                "GET",
                "/api/files/docs/content?path=reports/q1.csv",
                Some("admin-key"),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["file"]["content"], "a,b\n1,2\n");

        let (status, _) = send(
            &app,
            request("GET", "/api/tables/docs", Some("admin-key"), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_root_escape_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hi").unwrap();

        let mut model = create_test_model();
        model.connections.push(polyquery_core::ConnectionDescriptor::new(
            "docs",
            polyquery_types::EngineType::Filesystem,
            json!({"root_path": dir.path().to_string_lossy()})
                .as_object()
                .cloned()
                .unwrap(),
        ));
        let app = router(build_state(&model, Arc::new(EnvSecretStore::new())));

        for uri in [
            "/api/files/docs/content?path=../etc/passwd",
            "/api/files/docs/metadata?path=../../etc/passwd",
        ] {
            let (status, body) = send(&app, request("GET", uri, Some("admin-key"), None)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["success"], false);
        }
    }

    #[tokio::test]
    async fn test_upstream_rejection_is_a_bad_gateway() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/3.19/auth/signin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "credentials": {"token": "tok", "site": {"id": "site-1"}, "user": {"id": "u"}}
            })))
            .mount(&upstream)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/3.19/sites/site-1/projects"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&upstream)
            .await;

        let mut model = create_test_model();
        model.connections.push(polyquery_core::ConnectionDescriptor::new(
            "bi",
            polyquery_types::EngineType::Tableau,
            json!({
                "server_url": upstream.uri(),
                "token_name": "agent",
                "token_value": "pat"
            })
            .as_object()
            .cloned()
            .unwrap(),
        ));
        let app = router(build_state(&model, Arc::new(EnvSecretStore::new())));

        let (status, body) =
            send(&app, request("GET", "/api/projects/bi", Some("admin-key"), None)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["success"], false);

        // A rejected API key is still the caller's 401
        let (status, _) = send(&app, request("GET", "/api/projects/bi", Some("nope"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
