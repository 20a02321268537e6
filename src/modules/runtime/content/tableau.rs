//! Tableau Server REST connector

use polyquery_core::{error::Result, PolyqueryError, TableauAuth, TableauConfig};
use polyquery_types::runtime::{Datasource, Project, Workbook, WorkbookView};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const AUTH_HEADER: &str = "X-Tableau-Auth";
const PAGE_SIZE: usize = 100;

/// Credentials returned by a successful signin
#[derive(Clone)]
pub struct TableauSession {
    pub token: String,
    pub site_id: String,
    pub user_id: String,
}

impl std::fmt::Debug for TableauSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableauSession")
            .field("token", &"***")
            .field("site_id", &self.site_id)
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct IdRef {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct SigninCredentials {
    token: String,
    site: IdRef,
    user: IdRef,
}

#[derive(Debug, Deserialize)]
struct SigninResponse {
    credentials: SigninCredentials,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectRef {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWorkbook {
    id: String,
    name: String,
    #[serde(default)]
    content_url: String,
    #[serde(default)]
    project: ProjectRef,
    #[serde(default)]
    updated_at: Option<String>,
}

impl From<RawWorkbook> for Workbook {
    fn from(raw: RawWorkbook) -> Self {
        Workbook {
            id: raw.id,
            name: raw.name,
            content_url: raw.content_url,
            project_id: raw.project.id,
            project_name: raw.project.name,
            updated_at: raw.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawView {
    id: String,
    name: String,
    #[serde(default)]
    content_url: String,
    #[serde(default)]
    workbook: Option<IdRef>,
}

impl From<RawView> for WorkbookView {
    fn from(raw: RawView) -> Self {
        WorkbookView {
            id: raw.id,
            name: raw.name,
            content_url: raw.content_url,
            workbook_id: raw.workbook.map(|w| w.id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDatasource {
    id: String,
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    project: ProjectRef,
}

impl From<RawDatasource> for Datasource {
    fn from(raw: RawDatasource) -> Self {
        Datasource {
            id: raw.id,
            name: raw.name,
            kind: raw.kind,
            project_name: raw.project.name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProject {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parent_project_id: Option<String>,
}

impl From<RawProject> for Project {
    fn from(raw: RawProject) -> Self {
        Project {
            id: raw.id,
            name: raw.name,
            description: raw.description,
            parent_project_id: raw.parent_project_id,
        }
    }
}

/// BI server connector: workbooks, views and exports, not SQL
pub struct TableauConnector {
    name: String,
    config: TableauConfig,
    client: Client,
    session: RwLock<Option<TableauSession>>,
    signin_lock: Mutex<()>,
}

impl TableauConnector {
    pub fn new(name: impl Into<String>, config: TableauConfig, request_timeout: Duration) -> Self {
        let name = name.into();
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("HTTP client for '{}' falls back to defaults: {}", name, e);
                Client::new()
            });
        Self {
            name,
            config,
            client,
            session: RwLock::new(None),
            signin_lock: Mutex::new(()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base(), path)
    }

    async fn current(&self) -> Result<TableauSession> {
        self.session.read().await.clone().ok_or_else(|| {
            PolyqueryError::NotConnected(format!("tableau '{}' is not signed in", self.name))
        })
    }

    async fn dispatch(&self, request: RequestBuilder) -> Result<Response> {
        request
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| PolyqueryError::Content(format!("Tableau request failed: {}", e)))
    }

    /// Turn a non-success status into an error
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => PolyqueryError::NotFound(format!("Tableau: {}", body.trim())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                PolyqueryError::Content(format!("Tableau rejected the request: {}", status))
            }
            _ => PolyqueryError::Content(format!("Tableau API error {}: {}", status, body.trim())),
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        Self::check(self.dispatch(request).await?).await
    }

    /// GET under the current site, signing in again once when the token is rejected
    async fn get(&self, path: &str) -> Result<Response> {
        let session = self.current().await?;
        let response = self.dispatch(self.site_request(&session, path)).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check(response).await;
        }

        debug!("Tableau token for '{}' was rejected, signing in again", self.name);
        let session = self.renew(&session.token).await?;
        Self::check(self.dispatch(self.site_request(&session, path)).await?).await
    }

    fn site_request(&self, session: &TableauSession, path: &str) -> RequestBuilder {
        let url = self.url(&format!("sites/{}/{}", session.site_id, path));
        self.client.get(url).header(AUTH_HEADER, &session.token)
    }

    /// Replace a rejected token unless another caller already did
    async fn renew(&self, stale_token: &str) -> Result<TableauSession> {
        let _guard = self.signin_lock.lock().await;
        if let Some(session) = self.session.read().await.clone() {
            if session.token != stale_token {
                return Ok(session);
            }
        }
        match self.signin_locked().await {
            Ok(session) => Ok(session),
            Err(e) => {
                self.session.write().await.take();
                Err(e)
            }
        }
    }

    /// Collect `body[outer][inner]` over every page until `totalAvailable`
    async fn paginate<T: DeserializeOwned>(&self, path: &str, outer: &str, inner: &str) -> Result<Vec<T>> {
        let mut items: Vec<T> = Vec::new();
        let mut page_number = 1;

        loop {
            let separator = if path.contains('?') { '&' } else { '?' };
            let page_path = format!(
                "{}{}pageSize={}&pageNumber={}",
                path, separator, PAGE_SIZE, page_number
            );
            let body: Value = self
                .get(&page_path)
                .await?
                .json()
                .await
                .map_err(|e| PolyqueryError::Content(format!("invalid Tableau listing: {}", e)))?;

            let page: Vec<T> = match body.get(outer).and_then(|o| o.get(inner)) {
                Some(list) => serde_json::from_value(list.clone())?,
                None => Vec::new(),
            };
            let total: usize = body
                .pointer("/pagination/totalAvailable")
                .and_then(|v| v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_u64().map(|n| n as usize)))
                .unwrap_or(0);

            let received = page.len();
            items.extend(page);
            debug!("Tableau {} page {}: {}/{} items", path, page_number, items.len(), total);

            if received == 0 || items.len() >= total {
                break;
            }
            page_number += 1;
        }
        Ok(items)
    }

    async fn export(&self, view_id: &str, kind: &str) -> Result<Vec<u8>> {
        let bytes = self
            .get(&format!("views/{}/{}", view_id, kind))
            .await?
            .bytes()
            .await
            .map_err(|e| PolyqueryError::Content(format!("Tableau export failed: {}", e)))?;
        Ok(bytes.to_vec())
    }

    /// Sign in with the configured credentials and keep the session
    pub async fn signin(&self) -> Result<TableauSession> {
        let _guard = self.signin_lock.lock().await;
        self.signin_locked().await
    }

    async fn signin_locked(&self) -> Result<TableauSession> {
        let site = json!({"contentUrl": self.config.site_content_url});
        let credentials = match &self.config.auth {
            TableauAuth::Token { name, value } => json!({
                "personalAccessTokenName": name,
                "personalAccessTokenSecret": value,
                "site": site,
            }),
            TableauAuth::UsernamePassword { username, password } => json!({
                "name": username,
                "password": password,
                "site": site,
            }),
        };

        let response: SigninResponse = self
            .send(
                self.client
                    .post(self.url("auth/signin"))
                    .json(&json!({ "credentials": credentials })),
            )
            .await?
            .json()
            .await
            .map_err(|e| PolyqueryError::Content(format!("invalid signin response: {}", e)))?;

        let credentials = response.credentials;
        let session = TableauSession {
            token: credentials.token,
            site_id: if credentials.site.id.is_empty() {
                self.config.site_id.clone()
            } else {
                credentials.site.id
            },
            user_id: credentials.user.id,
        };
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    /// Invalidate the session token
    pub async fn signout(&self) -> Result<()> {
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };
        self.send(
            self.client
                .post(self.url("auth/signout"))
                .header(AUTH_HEADER, &session.token),
        )
        .await?;
        Ok(())
    }

    pub async fn connect(&self) -> bool {
        let _guard = self.signin_lock.lock().await;
        if self.session.read().await.is_some() {
            return true;
        }
        match self.signin_locked().await {
            Ok(session) => {
                info!("Signed in '{}' to site {}", self.name, session.site_id);
                true
            }
            Err(e) => {
                warn!("Failed to sign in '{}': {}", self.name, e);
                false
            }
        }
    }

    pub async fn disconnect(&self) -> bool {
        match self.signout().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Signout failed for '{}': {}", self.name, e);
                false
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Succeeds when a signin succeeds
    pub async fn test_connection(&self) -> bool {
        self.connect().await
    }

    pub async fn list_workbooks(&self) -> Result<Vec<Workbook>> {
        let raw: Vec<RawWorkbook> = self.paginate("workbooks", "workbooks", "workbook").await?;
        Ok(raw.into_iter().map(Workbook::from).collect())
    }

    pub async fn list_views(&self, workbook_id: &str) -> Result<Vec<WorkbookView>> {
        let raw: Vec<RawView> = self
            .paginate(&format!("workbooks/{}/views", workbook_id), "views", "view")
            .await?;
        Ok(raw.into_iter().map(WorkbookView::from).collect())
    }

    pub async fn list_datasources(&self) -> Result<Vec<Datasource>> {
        let raw: Vec<RawDatasource> = self.paginate("datasources", "datasources", "datasource").await?;
        Ok(raw.into_iter().map(Datasource::from).collect())
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let raw: Vec<RawProject> = self.paginate("projects", "projects", "project").await?;
        Ok(raw.into_iter().map(Project::from).collect())
    }

    /// PNG rendering of a view
    pub async fn view_as_image(&self, view_id: &str) -> Result<Vec<u8>> {
        self.export(view_id, "image").await
    }

    pub async fn view_as_pdf(&self, view_id: &str) -> Result<Vec<u8>> {
        self.export(view_id, "pdf").await
    }

    /// Underlying data of a view as CSV
    pub async fn query_view_data(&self, view_id: &str) -> Result<Vec<u8>> {
        self.export(view_id, "data").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header as header_is, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn config(server: &MockServer, auth: TableauAuth) -> TableauConfig {
        TableauConfig {
            server_url: server.uri(),
            site_id: "fallback-site".into(),
            api_version: "3.19".into(),
            auth,
            site_content_url: "marketing".into(),
        }
    }

    fn token_auth() -> TableauAuth {
        TableauAuth::Token {
            name: "agent".into(),
            value: "pat-secret".into(),
        }
    }

    async fn mount_signin(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/3.19/auth/signin"))
            .and(body_partial_json(json!({
                "credentials": {"personalAccessTokenName": "agent", "site": {"contentUrl": "marketing"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "credentials": {"token": "tok-1", "site": {"id": "site-9", "contentUrl": "marketing"}, "user": {"id": "user-3"}}
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_calls_before_signin_fail() {
        let server = MockServer::start().await;
        let connector = TableauConnector::new("bi", config(&server, token_auth()), TIMEOUT);
        let err = connector.list_workbooks().await.unwrap_err();
        assert!(matches!(err, PolyqueryError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_signin_with_token() {
        let server = MockServer::start().await;
        mount_signin(&server).await;
        let connector = TableauConnector::new("bi", config(&server, token_auth()), TIMEOUT);

        let session = connector.signin().await.unwrap();
        assert_eq!(session.site_id, "site-9");
        assert_eq!(session.user_id, "user-3");
        assert!(!format!("{:?}", session).contains("tok-1"));
        assert!(connector.is_connected().await);
    }

    #[tokio::test]
    async fn test_password_signin_failure_is_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/3.19/auth/signin"))
            .and(body_partial_json(json!({"credentials": {"name": "ana"}})))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let connector = TableauConnector::new(
            "bi",
            config(
                &server,
                TableauAuth::UsernamePassword {
                    username: "ana".into(),
                    password: "wrong".into(),
                },
            ),
            TIMEOUT,
        );
        assert!(!connector.test_connection().await);
        assert!(!connector.is_connected().await);
    }

    #[tokio::test]
    async fn test_workbooks_paginate_until_total() {
        let server = MockServer::start().await;
        mount_signin(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/3.19/sites/site-9/workbooks"))
            .and(query_param("pageNumber", "1"))
            .and(header_is("X-Tableau-Auth", "tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "pagination": {"pageNumber": "1", "pageSize": "100", "totalAvailable": "3"},
                "workbooks": {"workbook": [
                    {"id": "w1", "name": "Sales", "contentUrl": "Sales", "project": {"id": "p1", "name": "Default"}},
                    {"id": "w2", "name": "Ops", "contentUrl": "Ops", "project": {"id": "p1", "name": "Default"}}
                ]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/3.19/sites/site-9/workbooks"))
            .and(query_param("pageNumber", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "pagination": {"pageNumber": "2", "pageSize": "100", "totalAvailable": "3"},
                "workbooks": {"workbook": [{"id": "w3", "name": "Finance", "updatedAt": "2024-05-01T00:00:00Z"}]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let connector = TableauConnector::new("bi", config(&server, token_auth()), TIMEOUT);
        assert!(connector.connect().await);
        let workbooks = connector.list_workbooks().await.unwrap();
        assert_eq!(workbooks.len(), 3);
        assert_eq!(workbooks[0].project_name.as_deref(), Some("Default"));
        assert_eq!(workbooks[2].updated_at.as_deref(), Some("2024-05-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_view_data_and_signout() {
        let server = MockServer::start().await;
        mount_signin(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/3.19/sites/site-9/views/v1/data"))
            .respond_with(ResponseTemplate::new(200).set_body_string("region,total\nnorth,10\n"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/3.19/auth/signout"))
            .and(header_is("X-Tableau-Auth", "tok-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let connector = TableauConnector::new("bi", config(&server, token_auth()), TIMEOUT);
        assert!(connector.connect().await);
        let csv = connector.query_view_data("v1").await.unwrap();
        assert!(String::from_utf8(csv).unwrap().starts_with("region,total"));

        assert!(connector.disconnect().await);
        assert!(!connector.is_connected().await);
        assert!(connector.view_as_pdf("v1").await.is_err());
    }

    fn signin_body(token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "credentials": {"token": token, "site": {"id": "site-9"}, "user": {"id": "user-3"}}
        }))
    }

    fn empty_workbooks() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "pagination": {"totalAvailable": "0"},
            "workbooks": {"workbook": []}
        }))
    }

    #[tokio::test]
    async fn test_expired_token_signs_in_again_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/3.19/auth/signin"))
            .respond_with(signin_body("tok-1"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/3.19/auth/signin"))
            .respond_with(signin_body("tok-2"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/3.19/sites/site-9/workbooks"))
            .and(header_is("X-Tableau-Auth", "tok-1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/3.19/sites/site-9/workbooks"))
            .and(header_is("X-Tableau-Auth", "tok-2"))
            .respond_with(empty_workbooks())
            .expect(2)
            .mount(&server)
            .await;

        let connector = TableauConnector::new("bi", config(&server, token_auth()), TIMEOUT);
        assert!(connector.connect().await);
        assert!(connector.list_workbooks().await.unwrap().is_empty());
        // The renewed token is kept for later calls
        assert!(connector.list_workbooks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistent_rejection_is_an_upstream_error() {
        let server = MockServer::start().await;
        mount_signin(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/3.19/sites/site-9/projects"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let connector = TableauConnector::new("bi", config(&server, token_auth()), TIMEOUT);
        assert!(connector.connect().await);
        let err = connector.list_projects().await.unwrap_err();
        assert!(matches!(err, PolyqueryError::Content(_)));
        assert_eq!(err.status_code(), 502);
    }

    #[tokio::test]
    async fn test_concurrent_connects_sign_in_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/3.19/auth/signin"))
            .respond_with(signin_body("tok-1").set_delay(Duration::from_millis(50)))
            .expect(1)
            .mount(&server)
            .await;

        let connector = TableauConnector::new("bi", config(&server, token_auth()), TIMEOUT);
        let results = futures::future::join_all((0..4).map(|_| connector.connect())).await;
        assert!(results.into_iter().all(|ok| ok));
    }

    #[tokio::test]
    async fn test_requests_time_out() {
        let server = MockServer::start().await;
        mount_signin(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/3.19/sites/site-9/datasources"))
            .respond_with(empty_workbooks().set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let connector = TableauConnector::new(
            "bi",
            config(&server, token_auth()),
            Duration::from_millis(200),
        );
        assert!(connector.connect().await);
        let err = connector.list_datasources().await.unwrap_err();
        assert!(matches!(err, PolyqueryError::Content(_)));
    }
}
