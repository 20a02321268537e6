//! Environment backed secret store

use crate::env::EnvSubstitutor;
use polyquery_core::error::Result;
use polyquery_core::{ConnectionConfig, ConnectionDescriptor, SecretStore};
use tracing::debug;

/// Resolves `{{ env.NAME }}` placeholders in connection params at connect time.
///
/// The stored descriptor keeps its placeholders; only the returned config
/// holds the secret values.
#[derive(Debug, Default)]
pub struct EnvSecretStore {
    substitutor: EnvSubstitutor,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for EnvSecretStore {
    fn resolve(&self, descriptor: &ConnectionDescriptor) -> Result<ConnectionConfig> {
        let mut resolved = descriptor.clone();
        if descriptor.has_env_placeholders() {
            debug!("Resolving secrets for connection '{}'", descriptor.name);
            for value in resolved.params.values_mut() {
                *value = self.substitutor.substitute_value(value)?;
            }
        }
        ConnectionConfig::from_descriptor(&resolved)
    }
}
