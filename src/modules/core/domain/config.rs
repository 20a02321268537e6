//! Typed per-engine connection configuration
//!
//! A [`ConnectionDescriptor`] carries a free-form parameter map. Once secrets
//! have been resolved the map is converted into one of the typed configs below,
//! and missing required fields surface as validation errors.

use super::ConnectionDescriptor;
use crate::error::{PolyqueryError, Result};
use polyquery_types::EngineType;
use serde_json::{Map, Value};
use std::path::PathBuf;

/// ClickHouse over its HTTP interface
#[derive(Debug, Clone, PartialEq)]
pub struct ClickhouseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub secure: bool,
}

impl ClickhouseConfig {
    /// Base URL of the HTTP interface
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}/", scheme, self.host, self.port)
    }
}

/// PostgreSQL and MySQL share one shape
#[derive(Debug, Clone, PartialEq)]
pub struct RdbmsConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub sslmode: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleTarget {
    ServiceName(String),
    Sid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OracleConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub target: OracleTarget,
}

impl OracleConfig {
    /// Easy Connect string for a service name, full descriptor for a SID
    pub fn connect_string(&self) -> String {
        match &self.target {
            OracleTarget::ServiceName(service) => {
                format!("//{}:{}/{}", self.host, self.port, service)
            }
            OracleTarget::Sid(sid) => format!(
                "(DESCRIPTION=(ADDRESS=(PROTOCOL=TCP)(HOST={})(PORT={}))(CONNECT_DATA=(SID={})))",
                self.host, self.port, sid
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MssqlConfig {
    pub server: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub driver: String,
    pub trusted_connection: bool,
    /// Accept any server certificate; off unless configured
    pub trust_server_certificate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableauAuth {
    Token { name: String, value: String },
    UsernamePassword { username: String, password: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableauConfig {
    pub server_url: String,
    pub site_id: String,
    pub api_version: String,
    pub auth: TableauAuth,
    pub site_content_url: String,
}

impl TableauConfig {
    /// `https://server/api/<version>`
    pub fn api_base(&self) -> String {
        format!(
            "{}/api/{}",
            self.server_url.trim_end_matches('/'),
            self.api_version
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilesystemConfig {
    pub root_path: PathBuf,
    pub max_read_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriveConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub api_base: String,
    pub token_url: String,
    pub chunk_size: u64,
    pub max_read_bytes: u64,
}

/// Secret-resolved, typed configuration of one connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionConfig {
    Clickhouse(ClickhouseConfig),
    Postgres(RdbmsConfig),
    Mysql(RdbmsConfig),
    Oracle(OracleConfig),
    Mssql(MssqlConfig),
    Tableau(TableauConfig),
    Filesystem(FilesystemConfig),
    GoogleDrive(DriveConfig),
}

pub const DEFAULT_MAX_READ_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_TABLEAU_API_VERSION: &str = "3.19";
pub const DEFAULT_DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_DRIVE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

impl ConnectionConfig {
    /// Build the typed config from an already resolved descriptor
    pub fn from_descriptor(descriptor: &ConnectionDescriptor) -> Result<Self> {
        let p = Params {
            connection: &descriptor.name,
            map: &descriptor.params,
        };

        let config = match descriptor.engine {
            EngineType::Clickhouse => {
                let secure = p.flag("secure")?;
                ConnectionConfig::Clickhouse(ClickhouseConfig {
                    host: p.required("host")?,
                    port: p.port(if secure { 8443 } else { 8123 })?,
                    user: p.optional("user").unwrap_or_else(|| "default".to_string()),
                    password: p.optional("password").unwrap_or_default(),
                    database: p.optional("database").unwrap_or_else(|| "default".to_string()),
                    secure,
                })
            }
            EngineType::Postgres => ConnectionConfig::Postgres(p.rdbms(5432, "prefer")?),
            EngineType::Mysql => ConnectionConfig::Mysql(p.rdbms(3306, "preferred")?),
            EngineType::Oracle => {
                let target = match (p.optional("service_name"), p.optional("sid")) {
                    (Some(service), _) => OracleTarget::ServiceName(service),
                    (None, Some(sid)) => OracleTarget::Sid(sid),
                    (None, None) => {
                        return Err(p.invalid("requires either 'service_name' or 'sid'"))
                    }
                };
                ConnectionConfig::Oracle(OracleConfig {
                    host: p.required("host")?,
                    port: p.port(1521)?,
                    user: p.required("user")?,
                    password: p.optional("password").unwrap_or_default(),
                    target,
                })
            }
            EngineType::Mssql => {
                let trusted_connection = p.flag("trusted_connection")?;
                let user = if trusted_connection {
                    p.optional("user").unwrap_or_default()
                } else {
                    p.required("user")?
                };
                ConnectionConfig::Mssql(MssqlConfig {
                    server: p.required("server")?,
                    port: p.port(1433)?,
                    database: p.required("database")?,
                    user,
                    password: p.optional("password").unwrap_or_default(),
                    driver: p
                        .optional("driver")
                        .unwrap_or_else(|| "ODBC Driver 17 for SQL Server".to_string()),
                    trusted_connection,
                    trust_server_certificate: p.flag("trust_server_certificate")?,
                })
            }
            EngineType::Tableau => {
                let method = p
                    .optional("auth_method")
                    .unwrap_or_else(|| "token".to_string());
                let auth = match method.as_str() {
                    "token" => TableauAuth::Token {
                        name: p.required("token_name")?,
                        value: p.required("token_value")?,
                    },
                    "username_password" => TableauAuth::UsernamePassword {
                        username: p.required("username")?,
                        password: p.required("password")?,
                    },
                    other => {
                        return Err(p.invalid(&format!(
                            "unknown auth_method '{}' (expected 'token' or 'username_password')",
                            other
                        )))
                    }
                };
                ConnectionConfig::Tableau(TableauConfig {
                    server_url: p.required("server_url")?,
                    site_id: p.optional("site_id").unwrap_or_default(),
                    api_version: p
                        .optional("api_version")
                        .unwrap_or_else(|| DEFAULT_TABLEAU_API_VERSION.to_string()),
                    auth,
                    site_content_url: p.optional("site_content_url").unwrap_or_default(),
                })
            }
            EngineType::Filesystem => ConnectionConfig::Filesystem(FilesystemConfig {
                root_path: PathBuf::from(p.required("root_path")?),
                max_read_bytes: p.unsigned("max_read_bytes", DEFAULT_MAX_READ_BYTES)?,
            }),
            EngineType::GoogleDrive => ConnectionConfig::GoogleDrive(DriveConfig {
                client_id: p.required("client_id")?,
                client_secret: p.required("client_secret")?,
                refresh_token: p.required("refresh_token")?,
                api_base: p
                    .optional("api_base")
                    .unwrap_or_else(|| DEFAULT_DRIVE_API_BASE.to_string()),
                token_url: p
                    .optional("token_url")
                    .unwrap_or_else(|| DEFAULT_DRIVE_TOKEN_URL.to_string()),
                chunk_size: p.unsigned("chunk_size", DEFAULT_CHUNK_SIZE)?,
                max_read_bytes: p.unsigned("max_read_bytes", DEFAULT_MAX_READ_BYTES)?,
            }),
        };

        Ok(config)
    }

    pub fn engine(&self) -> EngineType {
        match self {
            ConnectionConfig::Clickhouse(_) => EngineType::Clickhouse,
            ConnectionConfig::Postgres(_) => EngineType::Postgres,
            ConnectionConfig::Mysql(_) => EngineType::Mysql,
            ConnectionConfig::Oracle(_) => EngineType::Oracle,
            ConnectionConfig::Mssql(_) => EngineType::Mssql,
            ConnectionConfig::Tableau(_) => EngineType::Tableau,
            ConnectionConfig::Filesystem(_) => EngineType::Filesystem,
            ConnectionConfig::GoogleDrive(_) => EngineType::GoogleDrive,
        }
    }
}

/// Typed accessors over a raw parameter map
struct Params<'a> {
    connection: &'a str,
    map: &'a Map<String, Value>,
}

impl Params<'_> {
    fn invalid(&self, message: &str) -> PolyqueryError {
        PolyqueryError::Validation(format!("connection '{}': {}", self.connection, message))
    }

    fn optional(&self, key: &str) -> Option<String> {
        match self.map.get(key)? {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .ok_or_else(|| self.invalid(&format!("missing required field '{}'", key)))
    }

    fn unsigned(&self, key: &str, default: u64) -> Result<u64> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| self.invalid(&format!("'{}' must be a positive integer", key))),
            Some(Value::String(s)) if s.is_empty() => Ok(default),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| self.invalid(&format!("'{}' must be a positive integer", key))),
            Some(_) => Err(self.invalid(&format!("'{}' must be a positive integer", key))),
        }
    }

    fn port(&self, default: u16) -> Result<u16> {
        let value = self.unsigned("port", u64::from(default))?;
        u16::try_from(value).map_err(|_| self.invalid(&format!("port {} out of range", value)))
    }

    fn flag(&self, key: &str) -> Result<bool> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(true),
                "false" | "no" | "0" | "off" | "" => Ok(false),
                _ => Err(self.invalid(&format!("'{}' must be a boolean", key))),
            },
            Some(Value::Number(n)) => Ok(n.as_i64() != Some(0)),
            Some(_) => Err(self.invalid(&format!("'{}' must be a boolean", key))),
        }
    }

    fn rdbms(&self, default_port: u16, default_sslmode: &str) -> Result<RdbmsConfig> {
        Ok(RdbmsConfig {
            host: self.required("host")?,
            port: self.port(default_port)?,
            user: self.required("user")?,
            password: self.optional("password").unwrap_or_default(),
            database: self.required("database")?,
            sslmode: self
                .optional("sslmode")
                .unwrap_or_else(|| default_sslmode.to_string()),
        })
    }
}
