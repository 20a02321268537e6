//! Collaborator interfaces the runtime is wired against

use crate::domain::{ConnectionConfig, ConnectionDescriptor};
use crate::error::Result;
use polyquery_types::{Capability, Principal, RowSet, SchemaDescriptor};
use serde::{Deserialize, Serialize};

/// Turns a stored descriptor into a usable config with secrets filled in.
///
/// Implementations must not hand the raw secret values anywhere except the
/// returned config.
pub trait SecretStore: Send + Sync {
    fn resolve(&self, descriptor: &ConnectionDescriptor) -> Result<ConnectionConfig>;
}

/// Outcome of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        *self == Decision::Allow
    }
}

/// RBAC gate evaluated before every dispatch
pub trait Authorizer: Send + Sync {
    fn authorize(&self, capability: Capability, principal: &Principal) -> Decision;
}

/// Produces narrative text about query results or a schema
pub trait InsightGenerator: Send + Sync {
    fn analyze(&self, rows: &RowSet, analysis_type: &str) -> String;

    fn recommend(&self, schema: &SchemaDescriptor, context: &str) -> String;
}
