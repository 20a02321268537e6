//! YAML configuration parser

use polyquery_core::{ConnectionDescriptor, Model, PolyqueryError, ServerConfig, UserConfig};
use polyquery_types::{EngineType, Role};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::env::EnvSubstitutor;

/// YAML parser for Polyquery configuration files
pub struct YamlParser;

/// On-disk schema: connections and users are maps keyed by name.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default = "default_name")]
    name: String,

    #[serde(default)]
    server: Option<FileServer>,

    #[serde(default)]
    connections: BTreeMap<String, FileConnection>,

    #[serde(default)]
    users: BTreeMap<String, FileUser>,
}

fn default_name() -> String {
    "polyquery".to_string()
}

#[derive(Debug, Deserialize)]
struct FileConnection {
    #[serde(rename = "type")]
    engine: EngineType,

    /// Nested form, mirrors the HTTP create body
    #[serde(default)]
    params: Option<Map<String, Value>>,

    /// Flat form: every other key is a param
    #[serde(flatten)]
    inline: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct FileUser {
    api_key: String,

    #[serde(default = "default_role")]
    role: Role,
}

fn default_role() -> Role {
    Role::Viewer
}

#[derive(Debug, Deserialize)]
struct FileServer {
    #[serde(default)]
    port: Option<serde_yaml::Value>,

    #[serde(default)]
    log_level: Option<u8>,

    #[serde(default)]
    request_timeout_secs: Option<u64>,

    #[serde(default)]
    connect_timeout_secs: Option<u64>,
}

impl YamlParser {
    /// Parse a YAML string into a Model.
    ///
    /// User API keys are resolved from the environment here. Connection
    /// params keep their placeholders until a connector is built.
    pub fn parse(content: &str) -> Result<Model, PolyqueryError> {
        let mut model = Self::parse_raw(content)?;

        let substitutor = EnvSubstitutor::new();
        for user in &mut model.users {
            if EnvSubstitutor::has_placeholders(&user.api_key) {
                user.api_key = substitutor.substitute(&user.api_key)?;
            }
        }

        Ok(model)
    }

    /// Parse a YAML string without environment variable substitution
    pub fn parse_raw(content: &str) -> Result<Model, PolyqueryError> {
        let file = serde_yaml::from_str::<ConfigFile>(content)
            .map_err(|e| PolyqueryError::Config(format!("YAML parse error: {}", e)))?;
        file_to_model(file)
    }
}

fn file_to_model(cfg: ConfigFile) -> Result<Model, PolyqueryError> {
    let connections = cfg
        .connections
        .into_iter()
        .map(|(name, conn)| {
            let mut params = conn.inline;
            if let Some(nested) = conn.params {
                params.extend(nested);
            }
            ConnectionDescriptor::new(name, conn.engine, params)
        })
        .collect();

    let users = cfg
        .users
        .into_iter()
        .map(|(name, user)| UserConfig::new(name, user.api_key, user.role))
        .collect();

    let server = match cfg.server {
        None => ServerConfig::default(),
        Some(s) => ServerConfig {
            port: s.port.map(yaml_port).transpose()?,
            log_level: s.log_level,
            request_timeout_secs: s.request_timeout_secs,
            connect_timeout_secs: s.connect_timeout_secs,
        },
    };

    Ok(Model {
        name: cfg.name,
        server,
        connections,
        users,
    })
}

fn yaml_port(value: serde_yaml::Value) -> Result<u16, PolyqueryError> {
    let port = match &value {
        serde_yaml::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        serde_yaml::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    port.ok_or_else(|| PolyqueryError::Config(format!("Invalid server port: {:?}", value)))
}
