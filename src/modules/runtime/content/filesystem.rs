//! Local filesystem source jailed to a root directory

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::GlobBuilder;
use polyquery_core::{error::Result, FilesystemConfig, PolyqueryError};
use polyquery_types::runtime::{DirectoryNode, FileContent, FileEntry};
use polyquery_types::EngineType;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{FileSource, ListOptions};

pub struct FilesystemConnector {
    name: String,
    config: FilesystemConfig,
    root: RwLock<Option<PathBuf>>,
}

impl FilesystemConnector {
    pub fn new(name: impl Into<String>, config: FilesystemConfig) -> Self {
        Self {
            name: name.into(),
            config,
            root: RwLock::new(None),
        }
    }

    async fn root(&self) -> Result<PathBuf> {
        self.root.read().await.clone().ok_or_else(|| {
            PolyqueryError::NotConnected(format!("filesystem '{}' is not connected", self.name))
        })
    }

    /// Resolve a caller path inside the root
    async fn resolve(&self, path: &str) -> Result<(PathBuf, PathBuf)> {
        let root = self.root().await?;
        let resolved = confine(&root, path)?;
        if !resolved.exists() {
            return Err(PolyqueryError::NotFound(format!("no such file: {}", path)));
        }
        // Symlinks may still point outside
        let canonical = resolved.canonicalize()?;
        if !canonical.starts_with(&root) {
            return Err(PolyqueryError::Validation(format!(
                "path escapes the connection root: {}",
                path
            )));
        }
        Ok((root, canonical))
    }

    async fn blocking<T, F>(f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| PolyqueryError::Internal(format!("filesystem worker failed: {}", e)))?
    }
}

/// Join `path` onto `root` lexically, refusing to climb above it.
/// A leading separator means the connection root.
fn confine(root: &Path, path: &str) -> Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    let path = path.trim_start_matches(|c| c == '/' || c == '\\');
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if resolved == root {
                    return Err(PolyqueryError::Validation(format!(
                        "path escapes the connection root: {}",
                        path
                    )));
                }
                resolved.pop();
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PolyqueryError::Validation(format!(
                    "absolute paths are not allowed: {}",
                    path
                )));
            }
        }
    }
    Ok(resolved)
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn to_entry(root: &Path, path: &Path, metadata: &Metadata) -> FileEntry {
    let is_dir = metadata.is_dir();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    FileEntry {
        mime_type: if is_dir {
            None
        } else {
            mime_guess::from_path(path).first_raw().map(str::to_string)
        },
        name,
        path: relative(root, path),
        is_dir,
        size: if is_dir { 0 } else { metadata.len() },
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
    }
}

fn tree_node(root: &Path, path: &Path) -> DirectoryNode {
    DirectoryNode {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string()),
        path: relative(root, path),
        is_dir: path.is_dir(),
        children: Vec::new(),
    }
}

fn build_tree(root: &Path, path: &Path, depth: usize, max_depth: usize) -> Result<DirectoryNode> {
    let mut node = tree_node(root, path);
    if !node.is_dir || depth >= max_depth {
        return Ok(node);
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    for child in entries {
        // Links are shown but never descended; those leaving the root are hidden
        if child.is_symlink() {
            match child.canonicalize() {
                Ok(target) if target.starts_with(root) => node.children.push(tree_node(root, &child)),
                _ => debug!("Skipping link outside the root: {}", child.display()),
            }
            continue;
        }
        node.children
            .push(build_tree(root, &child, depth + 1, max_depth)?);
    }
    Ok(node)
}

#[async_trait]
impl FileSource for FilesystemConnector {
    async fn connect(&self) -> bool {
        let mut guard = self.root.write().await;
        if guard.is_some() {
            return true;
        }
        match self.config.root_path.canonicalize() {
            Ok(root) if root.is_dir() => {
                info!("Connected '{}' at {}", self.name, root.display());
                *guard = Some(root);
                true
            }
            Ok(root) => {
                warn!("Root of '{}' is not a directory: {}", self.name, root.display());
                false
            }
            Err(e) => {
                warn!(
                    "Failed to open root of '{}' ({}): {}",
                    self.name,
                    self.config.root_path.display(),
                    e
                );
                false
            }
        }
    }

    async fn disconnect(&self) -> bool {
        self.root.write().await.take();
        true
    }

    async fn is_connected(&self) -> bool {
        self.root.read().await.is_some()
    }

    async fn test_connection(&self) -> bool {
        self.connect().await && self.root().await.map(|r| r.is_dir()).unwrap_or(false)
    }

    async fn list_files(&self, options: &ListOptions) -> Result<Vec<FileEntry>> {
        let (root, dir) = self.resolve(options.path.as_deref().unwrap_or("")).await?;
        if !dir.is_dir() {
            return Err(PolyqueryError::Validation(format!(
                "not a directory: {}",
                options.path.as_deref().unwrap_or("")
            )));
        }

        let options = options.clone();
        Self::blocking(move || {
            let mut walker = WalkDir::new(&dir).min_depth(1).sort_by_file_name();
            if !options.recursive {
                walker = walker.max_depth(1);
            }
            let entries = walker
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| {
                    let is_dir = entry.file_type().is_dir();
                    match options.ext {
                        Some(_) => !is_dir && options.accepts(&entry.file_name().to_string_lossy()),
                        None => true,
                    }
                })
                .filter_map(|entry| {
                    let metadata = entry.metadata().ok()?;
                    Some(to_entry(&root, entry.path(), &metadata))
                })
                .collect();
            Ok(entries)
        })
        .await
    }

    async fn read_file(&self, path: &str) -> Result<FileContent> {
        let (root, file) = self.resolve(path).await?;
        let metadata = tokio::fs::metadata(&file).await?;
        if metadata.is_dir() {
            return Err(PolyqueryError::Validation(format!("is a directory: {}", path)));
        }

        let cap = self.config.max_read_bytes;
        let mut buffer = Vec::new();
        tokio::fs::File::open(&file)
            .await?
            .take(cap)
            .read_to_end(&mut buffer)
            .await?;
        debug!("Read {} bytes from {}", buffer.len(), file.display());

        Ok(FileContent {
            path: relative(&root, &file),
            content: String::from_utf8_lossy(&buffer).into_owned(),
            size: metadata.len(),
            truncated: metadata.len() > cap,
        })
    }

    async fn read_binary(&self, path: &str) -> Result<Vec<u8>> {
        let (_, file) = self.resolve(path).await?;
        if file.is_dir() {
            return Err(PolyqueryError::Validation(format!("is a directory: {}", path)));
        }
        Ok(tokio::fs::read(&file).await?)
    }

    async fn search(&self, pattern: &str) -> Result<Vec<FileEntry>> {
        let root = self.root().await?;
        let matcher = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| PolyqueryError::Validation(format!("invalid pattern '{}': {}", pattern, e)))?
            .compile_matcher();

        Self::blocking(move || {
            let entries = WalkDir::new(&root)
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter(|entry| matcher.is_match(relative(&root, entry.path())))
                .filter_map(|entry| {
                    let metadata = entry.metadata().ok()?;
                    Some(to_entry(&root, entry.path(), &metadata))
                })
                .collect();
            Ok(entries)
        })
        .await
    }

    async fn get_metadata(&self, path: &str) -> Result<FileEntry> {
        let (root, file) = self.resolve(path).await?;
        let metadata = tokio::fs::metadata(&file).await?;
        Ok(to_entry(&root, &file, &metadata))
    }

    async fn directory_tree(&self, max_depth: usize) -> Result<DirectoryNode> {
        let root = self.root().await?;
        Self::blocking(move || build_tree(&root, &root, 0, max_depth)).await
    }

    fn engine(&self) -> EngineType {
        EngineType::Filesystem
    }
}
