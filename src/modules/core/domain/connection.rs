//! Named connection descriptors

use polyquery_types::EngineType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named configuration identifying one logical data source instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Unique name callers use to address this connection
    pub name: String,

    /// Engine behind the connection
    #[serde(rename = "type")]
    pub engine: EngineType,

    /// Engine specific parameters (may contain `{{ env.VAR }}` placeholders)
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ConnectionDescriptor {
    /// Create a new descriptor
    pub fn new(name: impl Into<String>, engine: EngineType, params: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            engine,
            params,
        }
    }

    /// Check if any string parameter contains environment variable placeholders
    pub fn has_env_placeholders(&self) -> bool {
        self.params
            .values()
            .filter_map(Value::as_str)
            .any(|v| v.contains("{{") && v.contains("}}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_descriptor_env_placeholders() {
        let descriptor = ConnectionDescriptor::new(
            "pg_prod",
            EngineType::Postgres,
            params(json!({"host": "db", "password": "{{ env.PG_PASSWORD }}"})),
        );
        assert!(descriptor.has_env_placeholders());

        let plain = ConnectionDescriptor::new(
            "pg_dev",
            EngineType::Postgres,
            params(json!({"host": "localhost", "port": 5432})),
        );
        assert!(!plain.has_env_placeholders());
    }

    #[test]
    fn test_descriptor_serde_uses_type_key() {
        let descriptor =
            ConnectionDescriptor::new("warehouse", EngineType::Clickhouse, Map::new());
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["type"], "clickhouse");

        let parsed: ConnectionDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, descriptor);
    }
}
