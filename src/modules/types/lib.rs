//! Type definitions for Polyquery
//!
//! This crate contains shared type definitions used by the server and the remote
//! client, including engine identifiers, capabilities, catalog shapes and the
//! HTTP request/response bodies.

pub mod capability;
pub mod engine;
pub mod runtime;
pub mod schema;

pub use capability::{Capability, PermissionSet, Principal, Role};
pub use engine::{EngineFamily, EngineType};
pub use schema::{
    ColumnInfo, ConstraintInfo, IndexColumn, IndexInfo, QueryParams, Row, RowSet,
    SchemaDescriptor, StatementKind, TableInfo, TableLookup,
};
