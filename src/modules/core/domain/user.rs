//! API users

use polyquery_types::{runtime::UserSummary, Principal, Role};
use serde::{Deserialize, Serialize};

/// A caller identified by a bearer API key
#[derive(Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: String,
    pub api_key: String,
    pub role: Role,
}

impl UserConfig {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            role,
        }
    }

    pub fn principal(&self) -> Principal {
        Principal::new(self.name.clone(), self.role)
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            name: self.name.clone(),
            role: self.role,
        }
    }
}

// Keys stay out of logs
impl std::fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserConfig")
            .field("name", &self.name)
            .field("api_key", &"***")
            .field("role", &self.role)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_key() {
        let user = UserConfig::new("alice", "pq_live_123", Role::Analyst);
        let debug = format!("{:?}", user);
        assert!(!debug.contains("pq_live_123"));
        assert!(debug.contains("alice"));
    }

    #[test]
    fn test_principal() {
        let user = UserConfig::new("bob", "key", Role::Viewer);
        assert_eq!(user.principal(), Principal::new("bob", Role::Viewer));
        assert_eq!(user.summary().role, Role::Viewer);
    }
}
