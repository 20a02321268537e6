//! Generic SQL connector over a driver and its dialect

use async_trait::async_trait;
use polyquery_core::{error::Result, PolyqueryError};
use polyquery_types::schema::write_result;
use polyquery_types::{
    EngineType, QueryParams, RowSet, SchemaDescriptor, StatementKind, TableLookup,
};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::catalog;
use super::dialect::{bind, join_name, BoundStatement, CatalogDialect, Dialect};
use super::traits::{Connector, SqlDriver, SqlSession};

/// Implements [`Connector`] for any [`SqlDriver`].
///
/// The session lives behind an async mutex held for the whole of one
/// operation, so a session is never shared by two callers at once.
pub struct SqlConnector<D: SqlDriver> {
    name: String,
    driver: D,
    session: Mutex<Option<D::Session>>,
    connect_timeout: Duration,
}

impl<D: SqlDriver> SqlConnector<D> {
    pub fn new(name: impl Into<String>, driver: D, connect_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            driver,
            session: Mutex::new(None),
            connect_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dialect(&self) -> &D::Dialect {
        self.driver.dialect()
    }

    fn not_connected(&self) -> PolyqueryError {
        PolyqueryError::NotConnected(format!(
            "connection '{}' has no open {} session",
            self.name,
            self.driver.engine()
        ))
    }

    async fn open_session(&self) -> Result<D::Session> {
        tokio::time::timeout(self.connect_timeout, self.driver.open())
            .await
            .map_err(|_| {
                PolyqueryError::Database(format!(
                    "timed out after {:?} opening session",
                    self.connect_timeout
                ))
            })?
    }

    /// Run a write inside the dialect's transaction statements
    async fn run_write(session: &mut D::Session, dialect: &D::Dialect, bound: &BoundStatement) -> Result<RowSet> {
        if let Some(begin) = dialect.begin_sql() {
            session.control(begin).await?;
        }

        match session.execute(bound).await {
            Ok(rows_affected) => {
                if let Some(commit) = dialect.commit_sql() {
                    if let Err(e) = session.control(commit).await {
                        Self::rollback(session, dialect).await;
                        return Err(e);
                    }
                }
                Ok(write_result(rows_affected))
            }
            Err(e) => {
                Self::rollback(session, dialect).await;
                Err(e)
            }
        }
    }

    async fn rollback(session: &mut D::Session, dialect: &D::Dialect) {
        if let Some(rollback) = dialect.rollback_sql() {
            if let Err(e) = session.control(rollback).await {
                error!("Rollback failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl<D: SqlDriver> Connector for SqlConnector<D> {
    async fn connect(&self) -> bool {
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            debug!("Connection '{}' already open", self.name);
            return true;
        }

        match self.open_session().await {
            Ok(session) => {
                info!("Connected '{}' ({})", self.name, self.driver.engine());
                *guard = Some(session);
                true
            }
            Err(e) => {
                warn!("Failed to connect '{}': {}", self.name, e);
                false
            }
        }
    }

    async fn disconnect(&self) -> bool {
        let mut guard = self.session.lock().await;
        match guard.take() {
            Some(session) => match session.close().await {
                Ok(()) => {
                    info!("Disconnected '{}'", self.name);
                    true
                }
                Err(e) => {
                    warn!("Error closing '{}': {}", self.name, e);
                    false
                }
            },
            None => true,
        }
    }

    async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    async fn execute_query(&self, query: &str, params: Option<&QueryParams>) -> Result<RowSet> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(|| self.not_connected())?;
        let dialect = self.driver.dialect();
        let bound = bind(dialect, query, params)?;

        match StatementKind::classify(query) {
            StatementKind::Read => session.fetch(&bound).await,
            StatementKind::Write => Self::run_write(session, dialect, &bound).await,
        }
    }

    async fn get_schema(&self, database: Option<&str>) -> Result<SchemaDescriptor> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(|| self.not_connected())?;
        catalog::walk_schema(session, self.driver.dialect(), database).await
    }

    async fn get_tables(&self, database: Option<&str>) -> Result<Vec<String>> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(|| self.not_connected())?;
        let tables = catalog::list_tables(session, self.driver.dialect(), database).await?;
        Ok(tables
            .into_iter()
            .map(|(schema, table)| join_name(&schema, &table))
            .collect())
    }

    async fn get_table_info(&self, table: &str, database: Option<&str>) -> Result<TableLookup> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(|| self.not_connected())?;
        let dialect = self.driver.dialect();
        let table_ref = dialect.table_ref(table, database);
        catalog::describe_table(session, dialect, &table_ref).await
    }

    async fn test_connection(&self) -> bool {
        if !self.connect().await {
            return false;
        }

        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return false;
        };
        let ping = BoundStatement::plain(self.driver.dialect().ping_sql());
        match session.fetch(&ping).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Liveness check failed for '{}': {}", self.name, e);
                false
            }
        }
    }

    fn engine(&self) -> EngineType {
        self.driver.engine()
    }
}
