//! Runtime server for Polyquery
//!
//! This crate provides the connector contract and its engine implementations,
//! the file and BI content connectors, the connection registry, authorization,
//! request dispatch and the HTTP server.

pub mod auth;
pub mod connectors;
pub mod content;
pub mod executor;
pub mod handlers;
pub mod insight;
pub mod registry;
pub mod server;
pub mod state;

pub use auth::{RoleAuthorizer, UserDirectory};
pub use connectors::{Connector, SqlConnector};
pub use content::{FileSource, ListOptions, TableauConnector};
pub use executor::QueryExecutor;
pub use insight::SummaryInsights;
pub use registry::{ConnectionRegistry, LiveConnector};
pub use server::{router, Runtime};
pub use state::{AppState, Stats};
