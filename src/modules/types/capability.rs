//! Capabilities, roles and principals used for authorization

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A named permission gating exactly one kind of operation.
///
/// The set is closed: every HTTP route and every connector dispatch is guarded
/// by one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ViewConnections,
    CreateConnections,
    EditConnections,
    DeleteConnections,
    TestConnections,
    ExecuteQueries,
    ExecuteWriteQueries,
    ViewSchema,
    ViewTables,
    ViewTableInfo,
    ExportData,
    UseAiAnalysis,
    UseAiRecommendations,
    ViewStats,
    ViewUsers,
    ManageUsers,
    ViewConfig,
    ManageConfig,
    ViewWorkbooks,
    ExportViews,
    BrowseFiles,
    ReadFiles,
    SearchFiles,
}

const ALL_CAPABILITIES: [Capability; 23] = [
    Capability::ViewConnections,
    Capability::CreateConnections,
    Capability::EditConnections,
    Capability::DeleteConnections,
    Capability::TestConnections,
    Capability::ExecuteQueries,
    Capability::ExecuteWriteQueries,
    Capability::ViewSchema,
    Capability::ViewTables,
    Capability::ViewTableInfo,
    Capability::ExportData,
    Capability::UseAiAnalysis,
    Capability::UseAiRecommendations,
    Capability::ViewStats,
    Capability::ViewUsers,
    Capability::ManageUsers,
    Capability::ViewConfig,
    Capability::ManageConfig,
    Capability::ViewWorkbooks,
    Capability::ExportViews,
    Capability::BrowseFiles,
    Capability::ReadFiles,
    Capability::SearchFiles,
];

impl Capability {
    /// Returns every capability
    pub fn all() -> &'static [Capability] {
        &ALL_CAPABILITIES
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ViewConnections => "view_connections",
            Capability::CreateConnections => "create_connections",
            Capability::EditConnections => "edit_connections",
            Capability::DeleteConnections => "delete_connections",
            Capability::TestConnections => "test_connections",
            Capability::ExecuteQueries => "execute_queries",
            Capability::ExecuteWriteQueries => "execute_write_queries",
            Capability::ViewSchema => "view_schema",
            Capability::ViewTables => "view_tables",
            Capability::ViewTableInfo => "view_table_info",
            Capability::ExportData => "export_data",
            Capability::UseAiAnalysis => "use_ai_analysis",
            Capability::UseAiRecommendations => "use_ai_recommendations",
            Capability::ViewStats => "view_stats",
            Capability::ViewUsers => "view_users",
            Capability::ManageUsers => "manage_users",
            Capability::ViewConfig => "view_config",
            Capability::ManageConfig => "manage_config",
            Capability::ViewWorkbooks => "view_workbooks",
            Capability::ExportViews => "export_views",
            Capability::BrowseFiles => "browse_files",
            Capability::ReadFiles => "read_files",
            Capability::SearchFiles => "search_files",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("Unknown capability: {}", s))
    }
}

/// Set of granted capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Capability>);

impl PermissionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn full() -> Self {
        Self(Capability::all().iter().copied().collect())
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn grant(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn revoke(&mut self, capability: Capability) {
        self.0.remove(&capability);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Built-in roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Analyst,
    Viewer,
}

impl Role {
    /// Capabilities granted to this role
    pub fn permissions(&self) -> PermissionSet {
        use Capability::*;
        match self {
            Role::Admin => PermissionSet::full(),
            Role::Analyst => [
                ViewConnections,
                TestConnections,
                ExecuteQueries,
                ViewSchema,
                ViewTables,
                ViewTableInfo,
                ExportData,
                UseAiAnalysis,
                UseAiRecommendations,
                ViewStats,
                ViewConfig,
                ViewWorkbooks,
                ExportViews,
                BrowseFiles,
                ReadFiles,
                SearchFiles,
            ]
            .into_iter()
            .collect(),
            Role::Viewer => [
                ViewConnections,
                ViewSchema,
                ViewTables,
                ViewTableInfo,
                ViewStats,
                ViewWorkbooks,
                BrowseFiles,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Analyst => write!(f, "analyst"),
            Role::Viewer => write!(f, "viewer"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "analyst" => Ok(Role::Analyst),
            "viewer" | "readonly" => Ok(Role::Viewer),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub role: Role,
}

impl Principal {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_set_is_closed_at_23() {
        assert_eq!(Capability::all().len(), 23);
        let unique: BTreeSet<_> = Capability::all().iter().map(|c| c.as_str()).collect();
        assert_eq!(unique.len(), 23);
    }

    #[test]
    fn test_capability_roundtrip_names() {
        for cap in Capability::all() {
            assert_eq!(Capability::from_str(cap.as_str()).unwrap(), *cap);
            let json = serde_json::to_string(cap).unwrap();
            assert_eq!(json, format!("\"{}\"", cap.as_str()));
        }
        assert!(Capability::from_str("drop_everything").is_err());
    }

    #[test]
    fn test_role_permissions() {
        assert_eq!(Role::Admin.permissions().len(), 23);
        assert!(Role::Analyst.permissions().allows(Capability::ExecuteQueries));
        assert!(!Role::Analyst.permissions().allows(Capability::ExecuteWriteQueries));
        assert!(!Role::Analyst.permissions().allows(Capability::ManageUsers));
        assert!(Role::Viewer.permissions().allows(Capability::ViewSchema));
        assert!(!Role::Viewer.permissions().allows(Capability::ExecuteQueries));
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!(Role::from_str("Admin").unwrap(), Role::Admin);
        assert_eq!(Role::from_str("readonly").unwrap(), Role::Viewer);
        assert!(Role::from_str("root").is_err());
    }
}
