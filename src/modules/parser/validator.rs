//! Configuration validation

use polyquery_core::{ConnectionConfig, ConnectionDescriptor, Model, PolyqueryError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Regex pattern for valid names (lower-kebab-case or lower_snake_case)
static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9]*(?:[-_][a-z0-9]+)*$").expect("valid name pattern")
});

/// Configuration validator
pub struct ConfigValidator {
    /// Whether to validate names strictly
    strict_names: bool,
}

impl ConfigValidator {
    /// Create a new validator with default settings
    pub fn new() -> Self {
        Self { strict_names: true }
    }

    /// Create a validator with lenient name checking
    pub fn lenient() -> Self {
        Self {
            strict_names: false,
        }
    }

    /// Validate the entire model configuration
    pub fn validate(&self, model: &Model) -> Result<(), PolyqueryError> {
        self.validate_name("model", &model.name)?;
        self.validate_connections(model)?;
        self.validate_users(model)?;
        Ok(())
    }

    fn validate_name(&self, kind: &str, name: &str) -> Result<(), PolyqueryError> {
        if name.is_empty() {
            return Err(PolyqueryError::Validation(format!(
                "{} name cannot be empty",
                capitalize(kind)
            )));
        }

        if self.strict_names && !NAME_PATTERN.is_match(name) {
            return Err(PolyqueryError::Validation(format!(
                "Invalid {} name '{}': must be lower-kebab-case or lower_snake_case",
                kind, name
            )));
        }

        Ok(())
    }

    /// Validate one connection descriptor.
    ///
    /// Descriptors holding env placeholders are only checked by name, their
    /// params are checked once the secrets are resolved.
    pub fn validate_connection(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<(), PolyqueryError> {
        self.validate_name("connection", &descriptor.name)?;
        if !descriptor.has_env_placeholders() {
            ConnectionConfig::from_descriptor(descriptor)?;
        }
        Ok(())
    }

    /// Validate connections configuration
    fn validate_connections(&self, model: &Model) -> Result<(), PolyqueryError> {
        let mut names = HashSet::new();

        for connection in &model.connections {
            self.validate_connection(connection)?;

            if !names.insert(&connection.name) {
                return Err(PolyqueryError::Validation(format!(
                    "Duplicate connection name: '{}'",
                    connection.name
                )));
            }
        }

        Ok(())
    }

    /// Validate users configuration
    fn validate_users(&self, model: &Model) -> Result<(), PolyqueryError> {
        let mut names = HashSet::new();
        let mut keys = HashSet::new();

        for user in &model.users {
            self.validate_name("user", &user.name)?;

            if !names.insert(&user.name) {
                return Err(PolyqueryError::Validation(format!(
                    "Duplicate user name: '{}'",
                    user.name
                )));
            }

            if user.api_key.is_empty() {
                return Err(PolyqueryError::Validation(format!(
                    "User '{}' has an empty api_key",
                    user.name
                )));
            }

            if !keys.insert(&user.api_key) {
                return Err(PolyqueryError::Validation(format!(
                    "User '{}' reuses another user's api_key",
                    user.name
                )));
            }
        }

        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
