//! Non-SQL sources: the BI server and file stores
//!
//! These connectors expose a reduced contract. File stores share
//! [`FileSource`]; Tableau has its own surface.

mod drive;
mod filesystem;
mod tableau;
mod token;

use async_trait::async_trait;
use polyquery_core::{error::Result, PolyqueryError};
use polyquery_types::runtime::{DirectoryNode, FileContent, FileEntry};
use polyquery_types::EngineType;
use serde::Deserialize;

pub use drive::DriveConnector;
pub use filesystem::FilesystemConnector;
pub use tableau::{TableauConnector, TableauSession};
pub use token::{AccessToken, OAuthTokenStore, TokenStore};

/// Filters for [`FileSource::list_files`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListOptions {
    /// Folder to list; the source root when absent
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub recursive: bool,
    /// Extension filter, with or without the leading dot
    #[serde(default, alias = "extension")]
    pub ext: Option<String>,
}

impl ListOptions {
    pub fn new(path: Option<&str>) -> Self {
        Self {
            path: path.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.ext = Some(ext.into());
        self
    }

    /// Whether a file name passes the extension filter
    pub fn accepts(&self, name: &str) -> bool {
        let Some(ext) = self.ext.as_deref() else {
            return true;
        };
        let ext = ext.trim_start_matches('.');
        name.rsplit_once('.')
            .map_or(false, |(_, actual)| actual.eq_ignore_ascii_case(ext))
    }
}

/// Browsing contract shared by file stores
#[async_trait]
pub trait FileSource: Send + Sync {
    async fn connect(&self) -> bool;

    async fn disconnect(&self) -> bool;

    async fn is_connected(&self) -> bool;

    async fn test_connection(&self) -> bool;

    async fn list_files(&self, options: &ListOptions) -> Result<Vec<FileEntry>>;

    /// Text content, lossily decoded
    async fn read_file(&self, path: &str) -> Result<FileContent>;

    async fn read_binary(&self, path: &str) -> Result<Vec<u8>>;

    /// Entries whose path matches a glob pattern
    async fn search(&self, pattern: &str) -> Result<Vec<FileEntry>>;

    async fn get_metadata(&self, path: &str) -> Result<FileEntry>;

    async fn directory_tree(&self, _max_depth: usize) -> Result<DirectoryNode> {
        Err(PolyqueryError::Unsupported(format!(
            "{} sources have no directory tree",
            self.engine()
        )))
    }

    fn engine(&self) -> EngineType;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_filter() {
        let any = ListOptions::new(None);
        assert!(any.accepts("README"));

        let csv = ListOptions::new(None).with_extension(".CSV");
        assert!(csv.accepts("sales.csv"));
        assert!(csv.accepts("Q1.Csv"));
        assert!(!csv.accepts("sales.csv.bak"));
        assert!(!csv.accepts("csv"));
    }

    #[test]
    fn test_options_from_query_string() {
        let options: ListOptions =
            serde_json::from_value(serde_json::json!({"path": "reports", "recursive": true, "extension": "pdf"}))
                .unwrap();
        assert!(options.recursive);
        assert_eq!(options.ext.as_deref(), Some("pdf"));
    }
}
