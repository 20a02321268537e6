//! Root model configuration

use serde::{Deserialize, Serialize};

use super::{ConnectionDescriptor, ServerConfig, UserConfig};

/// Root configuration model that represents a Polyquery configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Name of this deployment
    pub name: String,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Named data source connections
    #[serde(default)]
    pub connections: Vec<ConnectionDescriptor>,

    /// API users
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

impl Model {
    /// Create a new empty model with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server: ServerConfig::default(),
            connections: Vec::new(),
            users: Vec::new(),
        }
    }

    /// Find a connection by name
    pub fn find_connection(&self, name: &str) -> Option<&ConnectionDescriptor> {
        self.connections.iter().find(|c| c.name == name)
    }

    /// Find a user by API key
    pub fn find_user_by_key(&self, api_key: &str) -> Option<&UserConfig> {
        self.users.iter().find(|u| u.api_key == api_key)
    }

    /// Get the server port, defaulting to 8080
    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// Get the log level, defaulting to 1 (INFO)
    pub fn log_level(&self) -> u8 {
        self.server.log_level()
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new("polyquery")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyquery_types::{EngineType, Role};

    #[test]
    fn test_model_new() {
        let model = Model::new("agents");
        assert_eq!(model.name, "agents");
        assert!(model.connections.is_empty());
        assert!(model.users.is_empty());
        assert_eq!(model.port(), 8080);
    }

    #[test]
    fn test_model_lookups() {
        let mut model = Model::default();
        model.connections.push(ConnectionDescriptor::new(
            "pg_prod",
            EngineType::Postgres,
            Default::default(),
        ));
        model
            .users
            .push(UserConfig::new("admin", "secret-key", Role::Admin));

        assert!(model.find_connection("pg_prod").is_some());
        assert!(model.find_connection("missing_conn").is_none());
        assert_eq!(model.find_user_by_key("secret-key").unwrap().name, "admin");
        assert!(model.find_user_by_key("nope").is_none());
    }
}
