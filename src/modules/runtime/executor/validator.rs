//! Input validation for dispatched requests

use polyquery_core::{error::Result, PolyqueryError};
use polyquery_types::QueryParams;
use serde_json::Value;

/// Deepest directory tree a caller may request
pub const MAX_TREE_DEPTH: usize = 16;

/// Checks request inputs before any connector is touched
pub struct InputValidator;

impl InputValidator {
    /// Create a new input validator
    pub fn new() -> Self {
        Self
    }

    pub fn connection(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(PolyqueryError::Validation(
                "connection name is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate a statement and its parameters
    pub fn query(&self, query: &str, params: Option<&QueryParams>) -> Result<()> {
        if query.trim().is_empty() {
            return Err(PolyqueryError::Validation("query is empty".to_string()));
        }
        let Some(params) = params else {
            return Ok(());
        };

        let check = |label: String, value: &Value| match value {
            Value::Object(_) => Err(PolyqueryError::Validation(format!(
                "parameter {} must be a scalar or an array",
                label
            ))),
            _ => Ok(()),
        };
        match params {
            QueryParams::Positional(values) => values
                .iter()
                .enumerate()
                .try_for_each(|(i, v)| check((i + 1).to_string(), v)),
            QueryParams::Named(values) => values
                .iter()
                .try_for_each(|(name, v)| check(format!("'{}'", name), v)),
        }
    }

    pub fn path(&self, path: &str) -> Result<()> {
        if path.trim().is_empty() {
            return Err(PolyqueryError::Validation("path is required".to_string()));
        }
        if path.contains('\0') {
            return Err(PolyqueryError::Validation(
                "path contains a NUL byte".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pattern(&self, pattern: &str) -> Result<()> {
        if pattern.trim().is_empty() {
            return Err(PolyqueryError::Validation("pattern is required".to_string()));
        }
        Ok(())
    }

    /// Clamp a requested tree depth into `1..=MAX_TREE_DEPTH`
    pub fn tree_depth(&self, max_depth: Option<usize>) -> usize {
        max_depth.unwrap_or(3).clamp(1, MAX_TREE_DEPTH)
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_query() {
        let validator = InputValidator::new();
        assert!(validator.query("SELECT 1", None).is_ok());
        assert!(validator.query("   ", None).is_err());

        let positional = QueryParams::Positional(vec![json!(1), json!([1, 2]), json!(null)]);
        assert!(validator.query("SELECT ?", Some(&positional)).is_ok());

        let nested = QueryParams::Positional(vec![json!({"a": 1})]);
        let err = validator.query("SELECT ?", Some(&nested)).unwrap_err();
        assert!(err.to_string().contains("parameter 1"));

        let named: QueryParams = json!({"id": {"x": 1}}).as_object().cloned().unwrap().into();
        let err = validator.query("SELECT :id", Some(&named)).unwrap_err();
        assert!(err.to_string().contains("'id'"));
    }

    #[test]
    fn test_validate_paths_and_depth() {
        let validator = InputValidator::new();
        assert!(validator.path("reports/q1.csv").is_ok());
        assert!(validator.path("").is_err());
        assert!(validator.path("a\0b").is_err());
        assert!(validator.pattern("").is_err());
        assert!(validator.connection(" ").is_err());
        assert_eq!(validator.tree_depth(None), 3);
        assert_eq!(validator.tree_depth(Some(0)), 1);
        assert_eq!(validator.tree_depth(Some(99)), MAX_TREE_DEPTH);
    }
}
