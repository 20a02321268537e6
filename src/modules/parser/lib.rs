//! Configuration parsing for Polyquery
//!
//! This crate handles parsing of YAML configuration files, validation, and
//! environment variable resolution for user keys and connection secrets.

pub mod env;
pub mod secrets;
pub mod validator;
pub mod yaml;

pub use secrets::EnvSecretStore;
pub use validator::ConfigValidator;
pub use yaml::YamlParser;

use polyquery_core::{Model, PolyqueryError};

/// Parse a configuration file from a path
pub fn parse_file(path: &str) -> Result<Model, PolyqueryError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PolyqueryError::Config(format!("Failed to read file '{}': {}", path, e)))?;

    parse_string(&content)
}

/// Parse a configuration from a string
pub fn parse_string(content: &str) -> Result<Model, PolyqueryError> {
    // Parse YAML
    let model = YamlParser::parse(content)?;

    // Validate configuration
    let validator = ConfigValidator::new();
    validator.validate(&model)?;

    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_config() {
        let yaml = r#"
name: agents
connections:
  docs:
    type: filesystem
    root_path: /srv/docs
users:
  admin:
    api_key: admin-key
    role: admin
"#;
        let model = parse_string(yaml).unwrap();
        assert_eq!(model.name, "agents");
        assert_eq!(model.connections.len(), 1);
        assert_eq!(model.users.len(), 1);
    }

    #[test]
    fn test_parse_rejects_invalid_connection() {
        let yaml = r#"
name: agents
connections:
  docs:
    type: filesystem
"#;
        assert!(parse_string(yaml).is_err());
    }

    #[test]
    fn test_parse_file_missing() {
        let err = parse_file("/nonexistent/polyquery.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read file"));
    }
}
