//! SQL connectors for Polyquery
//!
//! Every engine implements [`Connector`] through the generic [`SqlConnector`],
//! parameterised by a driver (sessions) and a dialect (syntax and catalog).

mod catalog;
mod clickhouse;
mod dialect;
mod mssql;
mod mysql;
mod oracle;
mod postgres;
mod sql;
mod traits;

pub use clickhouse::{ClickhouseConnector, ClickhouseDialect, ClickhouseDriver};
pub use dialect::{bind, BindStyle, BoundStatement, CatalogDialect, Dialect, TableRef};
pub use mssql::{MssqlConnector, MssqlDialect, MssqlDriver};
pub use mysql::{MysqlConnector, MysqlDialect, MysqlDriver};
pub use oracle::{OracleConnector, OracleDialect, OracleDriver};
pub use postgres::{PostgresConnector, PostgresDialect, PostgresDriver};
pub use sql::SqlConnector;
pub use traits::{Connector, SqlDriver, SqlSession};
