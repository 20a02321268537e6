//! Data source engine type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported data source engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineType {
    /// ClickHouse columnar store (HTTP interface)
    Clickhouse,
    /// PostgreSQL database
    Postgres,
    /// MySQL database
    Mysql,
    /// Oracle database
    Oracle,
    /// Microsoft SQL Server
    Mssql,
    /// Tableau Server / Tableau Cloud
    Tableau,
    /// Local filesystem tree
    Filesystem,
    /// Google Drive document store
    GoogleDrive,
}

/// The operation contract a connector of a given engine implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineFamily {
    /// Query + catalog contract
    Sql,
    /// Content catalog with rendering exports
    Content,
    /// File listing and reading
    Files,
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clickhouse" | "ch" => Ok(EngineType::Clickhouse),
            "postgres" | "postgresql" | "pg" => Ok(EngineType::Postgres),
            "mysql" | "mariadb" => Ok(EngineType::Mysql),
            "oracle" => Ok(EngineType::Oracle),
            "mssql" | "sqlserver" | "sql_server" => Ok(EngineType::Mssql),
            "tableau" => Ok(EngineType::Tableau),
            "filesystem" | "fs" | "local" => Ok(EngineType::Filesystem),
            "google_drive" | "gdrive" | "drive" => Ok(EngineType::GoogleDrive),
            _ => Err(format!("Unknown engine type: {}", s)),
        }
    }
}

impl EngineType {
    /// Returns all supported engine types
    pub fn all() -> &'static [EngineType] {
        &[
            EngineType::Clickhouse,
            EngineType::Postgres,
            EngineType::Mysql,
            EngineType::Oracle,
            EngineType::Mssql,
            EngineType::Tableau,
            EngineType::Filesystem,
            EngineType::GoogleDrive,
        ]
    }

    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::Clickhouse => "clickhouse",
            EngineType::Postgres => "postgres",
            EngineType::Mysql => "mysql",
            EngineType::Oracle => "oracle",
            EngineType::Mssql => "mssql",
            EngineType::Tableau => "tableau",
            EngineType::Filesystem => "filesystem",
            EngineType::GoogleDrive => "google_drive",
        }
    }

    /// Which operation contract this engine's connector implements
    pub fn family(&self) -> EngineFamily {
        match self {
            EngineType::Clickhouse
            | EngineType::Postgres
            | EngineType::Mysql
            | EngineType::Oracle
            | EngineType::Mssql => EngineFamily::Sql,
            EngineType::Tableau => EngineFamily::Content,
            EngineType::Filesystem | EngineType::GoogleDrive => EngineFamily::Files,
        }
    }

    /// Returns true if this engine accepts SQL queries
    pub fn is_sql(&self) -> bool {
        self.family() == EngineFamily::Sql
    }

    /// Returns true if this engine exposes files
    pub fn is_files(&self) -> bool {
        self.family() == EngineFamily::Files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_from_str() {
        assert_eq!(EngineType::from_str("postgres").unwrap(), EngineType::Postgres);
        assert_eq!(EngineType::from_str("PostgreSQL").unwrap(), EngineType::Postgres);
        assert_eq!(EngineType::from_str("sqlserver").unwrap(), EngineType::Mssql);
        assert_eq!(EngineType::from_str("gdrive").unwrap(), EngineType::GoogleDrive);
        assert!(EngineType::from_str("cassandra").is_err());
    }

    #[test]
    fn test_engine_display_matches_serde() {
        for engine in EngineType::all() {
            let json = serde_json::to_string(engine).unwrap();
            assert_eq!(json, format!("\"{}\"", engine));
        }
    }

    #[test]
    fn test_engine_family() {
        assert!(EngineType::Clickhouse.is_sql());
        assert!(EngineType::Oracle.is_sql());
        assert_eq!(EngineType::Tableau.family(), EngineFamily::Content);
        assert!(EngineType::Filesystem.is_files());
        assert!(!EngineType::GoogleDrive.is_sql());
    }
}
