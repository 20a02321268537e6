//! Domain models for Polyquery configuration

mod config;
mod connection;
mod model;
mod types;
mod user;

pub use config::{
    ClickhouseConfig, ConnectionConfig, DriveConfig, FilesystemConfig, MssqlConfig, OracleConfig,
    OracleTarget, RdbmsConfig, TableauAuth, TableauConfig, DEFAULT_CHUNK_SIZE,
    DEFAULT_DRIVE_API_BASE, DEFAULT_DRIVE_TOKEN_URL, DEFAULT_MAX_READ_BYTES,
    DEFAULT_TABLEAU_API_VERSION,
};
pub use connection::ConnectionDescriptor;
pub use model::Model;
pub use types::ServerConfig;
pub use user::UserConfig;
