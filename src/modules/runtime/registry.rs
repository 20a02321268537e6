//! Connection registry: named descriptors and their live connectors

use polyquery_core::{
    error::Result, ConnectionConfig, ConnectionDescriptor, Model, PolyqueryError, SecretStore,
};
use polyquery_parser::ConfigValidator;
use polyquery_types::runtime::ConnectionSummary;
use polyquery_types::EngineType;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::connectors::{
    ClickhouseDriver, Connector, MssqlDriver, MysqlDriver, OracleDriver, PostgresDriver,
    SqlConnector,
};
use crate::content::{DriveConnector, FileSource, FilesystemConnector, TableauConnector};

/// A built connector of any family
#[derive(Clone)]
pub enum LiveConnector {
    Sql(Arc<dyn Connector>),
    Tableau(Arc<TableauConnector>),
    Files(Arc<dyn FileSource>),
}

impl LiveConnector {
    pub async fn connect(&self) -> bool {
        match self {
            LiveConnector::Sql(c) => c.connect().await,
            LiveConnector::Tableau(c) => c.connect().await,
            LiveConnector::Files(c) => c.connect().await,
        }
    }

    pub async fn disconnect(&self) -> bool {
        match self {
            LiveConnector::Sql(c) => c.disconnect().await,
            LiveConnector::Tableau(c) => c.disconnect().await,
            LiveConnector::Files(c) => c.disconnect().await,
        }
    }

    pub async fn is_connected(&self) -> bool {
        match self {
            LiveConnector::Sql(c) => c.is_connected().await,
            LiveConnector::Tableau(c) => c.is_connected().await,
            LiveConnector::Files(c) => c.is_connected().await,
        }
    }

    pub async fn test_connection(&self) -> bool {
        match self {
            LiveConnector::Sql(c) => c.test_connection().await,
            LiveConnector::Tableau(c) => c.test_connection().await,
            LiveConnector::Files(c) => c.test_connection().await,
        }
    }

    pub fn as_sql(&self) -> Result<Arc<dyn Connector>> {
        match self {
            LiveConnector::Sql(c) => Ok(c.clone()),
            _ => Err(PolyqueryError::Unsupported(
                "queries and catalogs need a SQL connection".to_string(),
            )),
        }
    }

    pub fn as_tableau(&self) -> Result<Arc<TableauConnector>> {
        match self {
            LiveConnector::Tableau(c) => Ok(c.clone()),
            _ => Err(PolyqueryError::Unsupported(
                "workbooks and views need a tableau connection".to_string(),
            )),
        }
    }

    pub fn as_files(&self) -> Result<Arc<dyn FileSource>> {
        match self {
            LiveConnector::Files(c) => Ok(c.clone()),
            _ => Err(PolyqueryError::Unsupported(
                "file browsing needs a filesystem or google_drive connection".to_string(),
            )),
        }
    }
}

/// Build the connector for a resolved config; nothing is opened yet
pub fn build_connector(
    name: &str,
    config: ConnectionConfig,
    connect_timeout: Duration,
    request_timeout: Duration,
) -> LiveConnector {
    match config {
        ConnectionConfig::Clickhouse(c) => LiveConnector::Sql(Arc::new(SqlConnector::new(
            name,
            ClickhouseDriver::new(c, request_timeout),
            connect_timeout,
        ))),
        ConnectionConfig::Postgres(c) => LiveConnector::Sql(Arc::new(SqlConnector::new(
            name,
            PostgresDriver::new(c),
            connect_timeout,
        ))),
        ConnectionConfig::Mysql(c) => LiveConnector::Sql(Arc::new(SqlConnector::new(
            name,
            MysqlDriver::new(c),
            connect_timeout,
        ))),
        ConnectionConfig::Oracle(c) => LiveConnector::Sql(Arc::new(SqlConnector::new(
            name,
            OracleDriver::new(c),
            connect_timeout,
        ))),
        ConnectionConfig::Mssql(c) => LiveConnector::Sql(Arc::new(SqlConnector::new(
            name,
            MssqlDriver::new(c),
            connect_timeout,
        ))),
        ConnectionConfig::Tableau(c) => {
            LiveConnector::Tableau(Arc::new(TableauConnector::new(name, c, request_timeout)))
        }
        ConnectionConfig::Filesystem(c) => {
            LiveConnector::Files(Arc::new(FilesystemConnector::new(name, c)))
        }
        ConnectionConfig::GoogleDrive(c) => {
            LiveConnector::Files(Arc::new(DriveConnector::new(name, c, request_timeout)))
        }
    }
}

/// Manages connection descriptors and at most one live connector per name
pub struct ConnectionRegistry {
    descriptors: RwLock<BTreeMap<String, ConnectionDescriptor>>,
    live: RwLock<HashMap<String, LiveConnector>>,
    secrets: Arc<dyn SecretStore>,
    validator: ConfigValidator,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(secrets: Arc<dyn SecretStore>, connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            descriptors: RwLock::new(BTreeMap::new()),
            live: RwLock::new(HashMap::new()),
            secrets,
            validator: ConfigValidator::new(),
            connect_timeout,
            request_timeout,
        }
    }

    /// Registry seeded with every connection of a model
    pub fn from_model(model: &Model, secrets: Arc<dyn SecretStore>) -> Self {
        let mut registry = Self::new(
            secrets,
            model.server.connect_timeout(),
            model.server.request_timeout(),
        );
        *registry.descriptors.get_mut() = model
            .connections
            .iter()
            .map(|d| (d.name.clone(), d.clone()))
            .collect();
        registry
    }

    pub async fn create(&self, descriptor: ConnectionDescriptor) -> Result<()> {
        self.validator.validate_connection(&descriptor)?;
        let mut descriptors = self.descriptors.write().await;
        if descriptors.contains_key(&descriptor.name) {
            return Err(PolyqueryError::ConnectionExists(descriptor.name));
        }
        info!("Registered connection '{}' ({})", descriptor.name, descriptor.engine);
        descriptors.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Replace params (and optionally the engine); the live session is dropped
    pub async fn update(
        &self,
        name: &str,
        engine: Option<EngineType>,
        params: Map<String, Value>,
    ) -> Result<ConnectionDescriptor> {
        let (updated, stale) = {
            let mut descriptors = self.descriptors.write().await;
            let current = descriptors
                .get(name)
                .ok_or_else(|| PolyqueryError::ConnectionNotFound(name.to_string()))?;
            let updated = ConnectionDescriptor::new(name, engine.unwrap_or(current.engine), params);
            self.validator.validate_connection(&updated)?;

            let stale = self.live.write().await.remove(name);
            descriptors.insert(name.to_string(), updated.clone());
            (updated, stale)
        };

        Self::close(name, stale).await;
        info!("Updated connection '{}'", name);
        Ok(updated)
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        let stale = {
            let mut descriptors = self.descriptors.write().await;
            if descriptors.remove(name).is_none() {
                return Err(PolyqueryError::ConnectionNotFound(name.to_string()));
            }
            self.live.write().await.remove(name)
        };
        Self::close(name, stale).await;
        info!("Deleted connection '{}'", name);
        Ok(())
    }

    /// Disconnect a connector already taken out of the registry
    async fn close(name: &str, connector: Option<LiveConnector>) {
        if let Some(connector) = connector {
            if !connector.disconnect().await {
                warn!("Connection '{}' did not close cleanly", name);
            }
        }
    }

    pub async fn get(&self, name: &str) -> Result<ConnectionDescriptor> {
        self.descriptors
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| PolyqueryError::ConnectionNotFound(name.to_string()))
    }

    pub async fn has(&self, name: &str) -> bool {
        self.descriptors.read().await.contains_key(name)
    }

    pub async fn names(&self) -> Vec<String> {
        self.descriptors.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.descriptors.read().await.len()
    }

    /// Engine type of every connection by name
    pub async fn engines(&self) -> BTreeMap<String, String> {
        self.descriptors
            .read()
            .await
            .values()
            .map(|d| (d.name.clone(), d.engine.to_string()))
            .collect()
    }

    pub async fn list(&self) -> Vec<ConnectionSummary> {
        let descriptors: Vec<ConnectionDescriptor> =
            self.descriptors.read().await.values().cloned().collect();
        let live = self.live.read().await.clone();

        let mut summaries = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let connected = match live.get(&descriptor.name) {
                Some(connector) => connector.is_connected().await,
                None => false,
            };
            summaries.push(ConnectionSummary {
                name: descriptor.name,
                engine: descriptor.engine.to_string(),
                connected,
            });
        }
        summaries
    }

    /// The connector for `name`, built on first use from the resolved config
    pub async fn connector(&self, name: &str) -> Result<LiveConnector> {
        if let Some(connector) = self.live.read().await.get(name) {
            return Ok(connector.clone());
        }

        // Held across the build so an update cannot slip a stale connector in
        let descriptors = self.descriptors.read().await;
        let descriptor = descriptors
            .get(name)
            .ok_or_else(|| PolyqueryError::ConnectionNotFound(name.to_string()))?;
        let mut live = self.live.write().await;
        if let Some(connector) = live.get(name) {
            return Ok(connector.clone());
        }

        let config = self.secrets.resolve(descriptor)?;
        debug!("Building {} connector for '{}'", config.engine(), name);
        let connector = build_connector(name, config, self.connect_timeout, self.request_timeout);
        live.insert(name.to_string(), connector.clone());
        Ok(connector)
    }

    /// The connector for `name` with an open session
    pub async fn connected(&self, name: &str) -> Result<LiveConnector> {
        let connector = self.connector(name).await?;
        if !connector.connect().await {
            return Err(PolyqueryError::NotConnected(format!(
                "could not connect to '{}'",
                name
            )));
        }
        Ok(connector)
    }

    /// Run `test_connection` on a named connection
    pub async fn test(&self, name: &str) -> Result<bool> {
        Ok(self.connector(name).await?.test_connection().await)
    }

    /// Liveness of every open connector, checked concurrently
    pub async fn health_check_all(&self) -> BTreeMap<String, bool> {
        use futures::stream::{self, StreamExt};

        let connectors: Vec<_> = self
            .live
            .read()
            .await
            .iter()
            .map(|(name, connector)| (name.clone(), connector.clone()))
            .collect();

        stream::iter(connectors)
            .map(|(name, connector)| async move { (name, connector.test_connection().await) })
            .buffer_unordered(16)
            .collect()
            .await
    }

    /// Close all live connectors
    pub async fn close_all(&self) {
        let connectors: Vec<_> = self.live.write().await.drain().collect();
        for (name, connector) in connectors {
            if !connector.disconnect().await {
                warn!("Connection '{}' did not close cleanly", name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyquery_parser::EnvSecretStore;
    use serde_json::json;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(
            Arc::new(EnvSecretStore::new()),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
    }

    fn filesystem(name: &str, root: &str) -> ConnectionDescriptor {
        ConnectionDescriptor::new(
            name,
            EngineType::Filesystem,
            json!({"root_path": root}).as_object().cloned().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let registry = registry();
        registry.create(filesystem("docs", "/tmp")).await.unwrap();

        let listed = registry.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "docs");
        assert_eq!(listed[0].engine, "filesystem");
        assert!(!listed[0].connected);
    }

    #[tokio::test]
    async fn test_duplicate_and_invalid_descriptors() {
        let registry = registry();
        registry.create(filesystem("docs", "/tmp")).await.unwrap();
        assert!(matches!(
            registry.create(filesystem("docs", "/var")).await,
            Err(PolyqueryError::ConnectionExists(_))
        ));

        let missing_host = ConnectionDescriptor::new("pg", EngineType::Postgres, Map::new());
        assert!(matches!(
            registry.create(missing_host).await,
            Err(PolyqueryError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let registry = registry();
        let err = registry.connector("missing_conn").await.err().unwrap();
        assert_eq!(err.to_string(), "connection not found: missing_conn");
        assert!(registry.delete("missing_conn").await.is_err());
    }

    #[tokio::test]
    async fn test_connector_is_built_once_and_dropped_on_update() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let registry = registry();
        registry.create(filesystem("docs", &root)).await.unwrap();

        let live = registry.connected("docs").await.unwrap();
        assert!(live.as_files().is_ok());
        assert!(live.as_sql().is_err());
        assert!(registry.list().await[0].connected);

        registry
            .update("docs", None, json!({"root_path": root}).as_object().cloned().unwrap())
            .await
            .unwrap();
        assert!(!live.is_connected().await);
        assert!(!registry.list().await[0].connected);

        registry.delete("docs").await.unwrap();
        assert!(registry.names().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_root_is_not_connected() {
        let registry = registry();
        registry
            .create(filesystem("ghost", "/definitely/not/here"))
            .await
            .unwrap();
        assert!(matches!(
            registry.connected("ghost").await,
            Err(PolyqueryError::NotConnected(_))
        ));
        assert!(!registry.test("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_closes_old_session_without_blocking_readers() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/3.19/auth/signin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "credentials": {"token": "tok", "site": {"id": "s"}, "user": {"id": "u"}}
            })))
            .mount(&upstream)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/3.19/auth/signout"))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(600)))
            .expect(1)
            .mount(&upstream)
            .await;

        let params = json!({
            "server_url": upstream.uri(),
            "token_name": "agent",
            "token_value": "pat"
        })
        .as_object()
        .cloned()
        .unwrap();
        let registry = ConnectionRegistry::new(
            Arc::new(EnvSecretStore::new()),
            Duration::from_secs(2),
            Duration::from_secs(2),
        );
        registry
            .create(ConnectionDescriptor::new("bi", EngineType::Tableau, params.clone()))
            .await
            .unwrap();
        registry.connected("bi").await.unwrap();

        let reader = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let started = std::time::Instant::now();
            assert_eq!(registry.names().await, vec!["bi".to_string()]);
            started.elapsed()
        };
        let (updated, waited) = tokio::join!(registry.update("bi", None, params), reader);
        assert!(updated.is_ok());
        assert!(waited < Duration::from_millis(300), "reader waited {:?}", waited);
    }
}
