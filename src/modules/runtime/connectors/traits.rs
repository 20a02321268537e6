//! Connector trait definitions

use async_trait::async_trait;
use polyquery_core::error::Result;
use polyquery_types::{EngineType, QueryParams, RowSet, SchemaDescriptor, TableLookup};

use super::dialect::{BoundStatement, CatalogDialect};

/// Query and catalog contract shared by every SQL engine
///
/// Liveness operations (`connect`, `disconnect`, `test_connection`) never
/// return errors; failures collapse to `false` and are logged.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open the session. Calling it on an open connector is a no-op.
    async fn connect(&self) -> bool;

    /// Release the session. Safe when already disconnected.
    async fn disconnect(&self) -> bool;

    async fn is_connected(&self) -> bool;

    /// Run a statement.
    ///
    /// Reads return rows keyed by column name in result order. Writes run in
    /// a transaction and return the single `{rows_affected, status}` row; on
    /// failure the transaction is rolled back before the error is returned.
    async fn execute_query(&self, query: &str, params: Option<&QueryParams>) -> Result<RowSet>;

    /// Every table in `database` (or the default namespace) with full details
    async fn get_schema(&self, database: Option<&str>) -> Result<SchemaDescriptor>;

    /// Qualified `schema.table` names
    async fn get_tables(&self, database: Option<&str>) -> Result<Vec<String>>;

    /// Columns, indexes, constraints and stats of one table
    async fn get_table_info(&self, table: &str, database: Option<&str>) -> Result<TableLookup>;

    /// Minimal liveness query
    async fn test_connection(&self) -> bool;

    fn engine(&self) -> EngineType;
}

/// One open engine session
#[async_trait]
pub trait SqlSession: Send + 'static {
    /// Run a statement and collect its rows
    async fn fetch(&mut self, statement: &BoundStatement) -> Result<RowSet>;

    /// Run a statement and return the affected row count
    async fn execute(&mut self, statement: &BoundStatement) -> Result<u64>;

    /// Run a transaction control statement
    async fn control(&mut self, sql: &str) -> Result<()> {
        self.execute(&BoundStatement::plain(sql)).await.map(|_| ())
    }

    /// Consume the session and release it on the engine side
    async fn close(self) -> Result<()>;
}

/// Opens sessions for one engine and supplies its dialect
#[async_trait]
pub trait SqlDriver: Send + Sync + 'static {
    type Session: SqlSession;
    type Dialect: CatalogDialect;

    fn engine(&self) -> EngineType;

    fn dialect(&self) -> &Self::Dialect;

    async fn open(&self) -> Result<Self::Session>;
}
