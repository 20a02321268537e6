//! Google Drive source over the Drive v3 REST API
//!
//! Paths are file and folder ids; `root` is the top of My Drive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher};
use polyquery_core::{error::Result, DriveConfig, PolyqueryError};
use polyquery_types::runtime::{FileContent, FileEntry};
use polyquery_types::EngineType;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::token::{OAuthTokenStore, TokenStore};
use super::{FileSource, ListOptions};

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const GOOGLE_APPS_PREFIX: &str = "application/vnd.google-apps.";
const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    modified_time: Option<DateTime<Utc>>,
}

impl DriveFile {
    fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }

    fn into_entry(self) -> FileEntry {
        FileEntry {
            is_dir: self.is_folder(),
            size: self.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0),
            modified: self.modified_time,
            mime_type: Some(self.mime_type),
            name: self.name,
            path: self.id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Export format for Google-native documents
fn export_mime(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "application/vnd.google-apps.document" => Some("text/plain"),
        "application/vnd.google-apps.spreadsheet" => Some("text/csv"),
        "application/vnd.google-apps.presentation" => Some("text/plain"),
        "application/vnd.google-apps.drawing" => Some("image/svg+xml"),
        _ => None,
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Longest literal run of a glob, used to narrow the server-side query
fn literal_hint(pattern: &str) -> Option<&str> {
    pattern
        .split(|c| matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '/'))
        .max_by_key(|s| s.len())
        .filter(|s| !s.is_empty())
}

/// `Range` header for the chunk starting at `start`
fn range_header(start: u64, chunk: u64) -> String {
    let end = start.saturating_add(chunk.max(1) - 1);
    format!("bytes={}-{}", start, end)
}

/// Total size from `Content-Range: bytes 0-1023/5000`
fn content_range_total(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(header::CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit_once('/')?
        .1
        .parse()
        .ok()
}

pub struct DriveConnector {
    name: String,
    config: DriveConfig,
    client: Client,
    tokens: Arc<dyn TokenStore>,
    connected: AtomicBool,
}

impl DriveConnector {
    pub fn new(name: impl Into<String>, config: DriveConfig, request_timeout: Duration) -> Self {
        let name = name.into();
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("HTTP client for '{}' falls back to defaults: {}", name, e);
                Client::new()
            });
        let tokens = Arc::new(OAuthTokenStore::new(client.clone(), &config));
        Self::with_token_store(name, config, client, tokens)
    }

    pub fn with_token_store(
        name: impl Into<String>,
        config: DriveConfig,
        client: Client,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            client,
            tokens,
            connected: AtomicBool::new(false),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PolyqueryError::NotConnected(format!(
                "drive '{}' is not connected",
                self.name
            )))
        }
    }

    /// Send with a bearer token, refreshing once when the token is rejected
    async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&str) -> RequestBuilder + Send + Sync,
    {
        let token = self.tokens.access_token().await?;
        let mut response = build(&token)
            .send()
            .await
            .map_err(|e| PolyqueryError::Content(format!("Drive request failed: {}", e)))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("Drive token rejected for '{}', refreshing", self.name);
            let token = self.tokens.refresh().await?.token;
            response = build(&token)
                .send()
                .await
                .map_err(|e| PolyqueryError::Content(format!("Drive request failed: {}", e)))?;
        }

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => PolyqueryError::NotFound(format!("Drive: {}", body.trim())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                PolyqueryError::Content(format!("Drive rejected the request: {}", status))
            }
            _ => PolyqueryError::Content(format!("Drive API error {}: {}", status, body.trim())),
        })
    }

    /// Every page of a files.list query
    async fn query_files(&self, query: &str) -> Result<Vec<DriveFile>> {
        let url = self.url("files");
        let fields = format!("nextPageToken,files({})", FILE_FIELDS);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = page_token.clone();
            let response = self
                .send(|token| {
                    let mut request = self.client.get(&url).bearer_auth(token).query(&[
                        ("q", query),
                        ("fields", fields.as_str()),
                        ("pageSize", "100"),
                    ]);
                    if let Some(page) = &page {
                        request = request.query(&[("pageToken", page.as_str())]);
                    }
                    request
                })
                .await?;
            let list: FileList = response
                .json()
                .await
                .map_err(|e| PolyqueryError::Content(format!("invalid Drive listing: {}", e)))?;
            files.extend(list.files);

            match list.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(files)
    }

    async fn file(&self, id: &str) -> Result<DriveFile> {
        let url = self.url(&format!("files/{}", id));
        let response = self
            .send(|token| {
                self.client
                    .get(&url)
                    .bearer_auth(token)
                    .query(&[("fields", FILE_FIELDS)])
            })
            .await?;
        response
            .json()
            .await
            .map_err(|e| PolyqueryError::Content(format!("invalid Drive metadata: {}", e)))
    }

    async fn export(&self, id: &str, mime: &str) -> Result<Vec<u8>> {
        let url = self.url(&format!("files/{}/export", id));
        let response = self
            .send(|token| self.client.get(&url).bearer_auth(token).query(&[("mimeType", mime)]))
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PolyqueryError::Content(format!("Drive export failed: {}", e)))?;
        Ok(bytes.to_vec())
    }

    /// Download with HTTP Range requests of `chunk_size` bytes, stopping at `cap`.
    /// Returns the bytes and whether the cap cut the file short.
    async fn download(&self, id: &str, cap: Option<u64>) -> Result<(Vec<u8>, bool)> {
        let url = self.url(&format!("files/{}", id));
        let chunk = self.config.chunk_size.max(1);
        let mut data = Vec::new();
        let mut start: u64 = 0;
        let mut truncated = false;

        loop {
            let want = match cap {
                Some(cap) if start >= cap => {
                    truncated = true;
                    break;
                }
                Some(cap) => chunk.min(cap - start),
                None => chunk,
            };
            let range = range_header(start, want);
            let response = self
                .send(|token| {
                    self.client
                        .get(&url)
                        .bearer_auth(token)
                        .query(&[("alt", "media")])
                        .header(header::RANGE, range.as_str())
                })
                .await?;

            let partial = response.status() == StatusCode::PARTIAL_CONTENT;
            let total = content_range_total(&response);
            let bytes = response
                .bytes()
                .await
                .map_err(|e| PolyqueryError::Content(format!("Drive download failed: {}", e)))?;
            let received = bytes.len() as u64;
            data.extend_from_slice(&bytes);

            if !partial {
                // Server ignored the range and sent everything
                if let Some(cap) = cap {
                    truncated = cut(&mut data, cap);
                }
                break;
            }
            start = start.saturating_add(received);
            let done = match total {
                Some(total) => start >= total,
                None => received < want,
            };
            if done || received == 0 {
                break;
            }
        }
        debug!("Downloaded {} bytes of {}", data.len(), id);
        Ok((data, truncated))
    }
}

/// Shorten `data` to `cap` bytes, reporting whether anything was dropped
fn cut(data: &mut Vec<u8>, cap: u64) -> bool {
    let cap = usize::try_from(cap).unwrap_or(usize::MAX);
    if data.len() > cap {
        data.truncate(cap);
        true
    } else {
        false
    }
}

#[async_trait]
impl FileSource for DriveConnector {
    async fn connect(&self) -> bool {
        if self.connected.load(Ordering::SeqCst) {
            return true;
        }
        match self.tokens.refresh().await {
            Ok(_) => {
                info!("Connected '{}' (google_drive)", self.name);
                self.connected.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                warn!("Failed to connect '{}': {}", self.name, e);
                false
            }
        }
    }

    async fn disconnect(&self) -> bool {
        self.connected.store(false, Ordering::SeqCst);
        true
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn test_connection(&self) -> bool {
        if !self.connect().await {
            return false;
        }
        let url = self.url("about");
        match self
            .send(|token| self.client.get(&url).bearer_auth(token).query(&[("fields", "user")]))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Drive check failed for '{}': {}", self.name, e);
                false
            }
        }
    }

    async fn list_files(&self, options: &ListOptions) -> Result<Vec<FileEntry>> {
        self.ensure_connected()?;
        let start = options.path.clone().unwrap_or_else(|| "root".to_string());
        let mut seen = HashSet::from([start.clone()]);
        let mut folders = VecDeque::from([start]);
        let mut entries = Vec::new();

        while let Some(folder) = folders.pop_front() {
            let query = format!("{} in parents and trashed=false", quote(&folder));
            for file in self.query_files(&query).await? {
                // Files with several parents, and folder cycles, are visited once
                if !seen.insert(file.id.clone()) {
                    continue;
                }
                if file.is_folder() {
                    if options.recursive {
                        folders.push_back(file.id.clone());
                    }
                    if options.ext.is_some() {
                        continue;
                    }
                } else if !options.accepts(&file.name) {
                    continue;
                }
                entries.push(file.into_entry());
            }
        }
        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> Result<FileContent> {
        self.ensure_connected()?;
        let file = self.file(path).await?;
        if file.is_folder() {
            return Err(PolyqueryError::Validation(format!("is a folder: {}", path)));
        }

        let cap = self.config.max_read_bytes;
        let (bytes, truncated) = match export_mime(&file.mime_type) {
            Some(mime) => {
                let mut bytes = self.export(&file.id, mime).await?;
                let truncated = cut(&mut bytes, cap);
                (bytes, truncated)
            }
            None if file.mime_type.starts_with(GOOGLE_APPS_PREFIX) => {
                return Err(PolyqueryError::Unsupported(format!(
                    "cannot export {}",
                    file.mime_type
                )))
            }
            None => self.download(&file.id, Some(cap)).await?,
        };
        let declared: Option<u64> = file.size.as_deref().and_then(|s| s.parse().ok());

        Ok(FileContent {
            path: file.id,
            size: declared.unwrap_or(bytes.len() as u64),
            content: String::from_utf8_lossy(&bytes).into_owned(),
            truncated,
        })
    }

    async fn read_binary(&self, path: &str) -> Result<Vec<u8>> {
        self.ensure_connected()?;
        let file = self.file(path).await?;
        match export_mime(&file.mime_type) {
            Some(mime) => self.export(&file.id, mime).await,
            None => Ok(self.download(&file.id, None).await?.0),
        }
    }

    async fn search(&self, pattern: &str) -> Result<Vec<FileEntry>> {
        self.ensure_connected()?;
        let matcher: GlobMatcher = Glob::new(pattern)
            .map_err(|e| PolyqueryError::Validation(format!("invalid pattern '{}': {}", pattern, e)))?
            .compile_matcher();

        let query = match literal_hint(pattern) {
            Some(hint) => format!("name contains {} and trashed=false", quote(hint)),
            None => "trashed=false".to_string(),
        };
        Ok(self
            .query_files(&query)
            .await?
            .into_iter()
            .filter(|file| matcher.is_match(&file.name))
            .map(DriveFile::into_entry)
            .collect())
    }

    async fn get_metadata(&self, path: &str) -> Result<FileEntry> {
        self.ensure_connected()?;
        Ok(self.file(path).await?.into_entry())
    }

    fn engine(&self) -> EngineType {
        EngineType::GoogleDrive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header as header_is, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn connected(server: &MockServer, chunk_size: u64, max_read_bytes: u64) -> DriveConnector {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "at", "expires_in": 3600})),
            )
            .mount(server)
            .await;

        let connector = DriveConnector::new(
            "drive",
            DriveConfig {
                client_id: "cid".into(),
                client_secret: "secret".into(),
                refresh_token: "rt".into(),
                api_base: server.uri(),
                token_url: format!("{}/token", server.uri()),
                chunk_size,
                max_read_bytes,
            },
            Duration::from_secs(2),
        );
        assert!(connector.connect().await);
        connector
    }

    #[test]
    fn test_literal_hint() {
        assert_eq!(literal_hint("report_*.pdf"), Some("report_"));
        assert_eq!(literal_hint("*"), None);
        assert_eq!(quote("it's"), "'it\\'s'");
    }

    #[test]
    fn test_range_end_saturates() {
        assert_eq!(range_header(0, 4), "bytes=0-3");
        assert_eq!(range_header(0, u64::MAX), format!("bytes=0-{}", u64::MAX - 1));
        assert_eq!(range_header(10, u64::MAX), format!("bytes=10-{}", u64::MAX));
        assert_eq!(range_header(7, 0), "bytes=7-7");
    }

    #[tokio::test]
    async fn test_calls_require_connect() {
        let server = MockServer::start().await;
        let connector = DriveConnector::new(
            "drive",
            DriveConfig {
                client_id: "cid".into(),
                client_secret: "secret".into(),
                refresh_token: "rt".into(),
                api_base: server.uri(),
                token_url: format!("{}/token", server.uri()),
                chunk_size: 16,
                max_read_bytes: 1024,
            },
            Duration::from_secs(2),
        );
        let err = connector.get_metadata("abc").await.unwrap_err();
        assert!(matches!(err, PolyqueryError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_recursive_listing_follows_folders_and_pages() {
        let server = MockServer::start().await;
        let connector = connected(&server, 1024, 1024).await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("q", "'root' in parents and trashed=false"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{"id": "f2", "name": "b.csv", "mimeType": "text/csv", "size": "20"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("q", "'root' in parents and trashed=false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [
                    {"id": "d1", "name": "Reports", "mimeType": FOLDER_MIME},
                    {"id": "f1", "name": "a.csv", "mimeType": "text/csv", "size": "10"}
                ],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("q", "'d1' in parents and trashed=false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{"id": "f3", "name": "notes.txt", "mimeType": "text/plain", "size": "3"}]
            })))
            .mount(&server)
            .await;

        let flat = connector.list_files(&ListOptions::new(None)).await.unwrap();
        let ids: Vec<_> = flat.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(ids, vec!["d1", "f1", "f2"]);
        assert!(flat[0].is_dir);

        let csv = connector
            .list_files(&ListOptions::new(None).recursive().with_extension("csv"))
            .await
            .unwrap();
        assert_eq!(csv.len(), 2);

        let all = connector
            .list_files(&ListOptions::new(None).recursive())
            .await
            .unwrap();
        assert_eq!(all.last().map(|e| e.name.as_str()), Some("notes.txt"));
    }

    #[tokio::test]
    async fn test_google_docs_are_exported_as_text() {
        let server = MockServer::start().await;
        let connector = connected(&server, 1024, 1024).await;

        Mock::given(method("GET"))
            .and(path("/files/doc1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "doc1", "name": "Plan", "mimeType": "application/vnd.google-apps.document"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/doc1/export"))
            .and(query_param("mimeType", "text/plain"))
            .and(header_is("authorization", "Bearer at"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Quarterly plan"))
            .mount(&server)
            .await;

        let content = connector.read_file("doc1").await.unwrap();
        assert_eq!(content.content, "Quarterly plan");
        assert_eq!(content.path, "doc1");
    }

    #[tokio::test]
    async fn test_binary_download_is_chunked() {
        let server = MockServer::start().await;
        let connector = connected(&server, 4, 1024).await;

        Mock::given(method("GET"))
            .and(path("/files/bin1"))
            .and(query_param("fields", FILE_FIELDS))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "bin1", "name": "data.bin", "mimeType": "application/octet-stream", "size": "10"
            })))
            .mount(&server)
            .await;
        for (range, body, content_range) in [
            ("bytes=0-3", "0123", "bytes 0-3/10"),
            ("bytes=4-7", "4567", "bytes 4-7/10"),
            ("bytes=8-11", "89", "bytes 8-9/10"),
        ] {
            Mock::given(method("GET"))
                .and(path("/files/bin1"))
                .and(query_param("alt", "media"))
                .and(header_is("range", range))
                .respond_with(
                    ResponseTemplate::new(206)
                        .insert_header("Content-Range", content_range)
                        .set_body_string(body),
                )
                .expect(1)
                .mount(&server)
                .await;
        }

        let bytes = connector.read_binary("bin1").await.unwrap();
        assert_eq!(bytes, b"0123456789");
    }

    #[tokio::test]
    async fn test_search_filters_by_glob() {
        let server = MockServer::start().await;
        let connector = connected(&server, 1024, 1024).await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("q", "name contains 'report_' and trashed=false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [
                    {"id": "a", "name": "report_q1.pdf", "mimeType": "application/pdf"},
                    {"id": "b", "name": "old_report_q1.doc", "mimeType": "application/msword"}
                ]
            })))
            .mount(&server)
            .await;

        let found = connector.search("report_*").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "a");
    }

    #[tokio::test]
    async fn test_read_file_stops_at_cap() {
        let server = MockServer::start().await;
        let connector = connected(&server, 4, 6).await;

        Mock::given(method("GET"))
            .and(path("/files/big"))
            .and(query_param("fields", FILE_FIELDS))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "big", "name": "big.txt", "mimeType": "text/plain", "size": "10"
            })))
            .mount(&server)
            .await;
        for (range, body, content_range) in [
            ("bytes=0-3", "0123", "bytes 0-3/10"),
            ("bytes=4-5", "45", "bytes 4-5/10"),
        ] {
            Mock::given(method("GET"))
                .and(path("/files/big"))
                .and(query_param("alt", "media"))
                .and(header_is("range", range))
                .respond_with(
                    ResponseTemplate::new(206)
                        .insert_header("Content-Range", content_range)
                        .set_body_string(body),
                )
                .expect(1)
                .mount(&server)
                .await;
        }

        let content = connector.read_file("big").await.unwrap();
        assert_eq!(content.content, "012345");
        assert!(content.truncated);
        assert_eq!(content.size, 10);
    }

    #[tokio::test]
    async fn test_folder_cycles_are_listed_once() {
        let server = MockServer::start().await;
        let connector = connected(&server, 1024, 1024).await;

        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("q", "'root' in parents and trashed=false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{"id": "d1", "name": "Shared", "mimeType": FOLDER_MIME}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("q", "'d1' in parents and trashed=false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [
                    {"id": "d2", "name": "Inner", "mimeType": FOLDER_MIME},
                    {"id": "f1", "name": "a.txt", "mimeType": "text/plain", "size": "1"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("q", "'d2' in parents and trashed=false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [
                    {"id": "d1", "name": "Shared", "mimeType": FOLDER_MIME},
                    {"id": "f1", "name": "a.txt", "mimeType": "text/plain", "size": "1"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let all = connector
            .list_files(&ListOptions::new(None).recursive())
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2", "f1"]);
    }

    #[tokio::test]
    async fn test_forbidden_is_an_upstream_error() {
        let server = MockServer::start().await;
        let connector = connected(&server, 1024, 1024).await;

        Mock::given(method("GET"))
            .and(path("/files/locked"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = connector.get_metadata("locked").await.unwrap_err();
        assert!(matches!(err, PolyqueryError::Content(_)));
        assert_eq!(err.status_code(), 502);
    }
}
