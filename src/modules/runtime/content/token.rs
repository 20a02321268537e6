//! OAuth access token persistence for cloud document stores

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use polyquery_core::{error::Result, DriveConfig, PolyqueryError};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

/// A bearer token and its expiry
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Create a token that expires in N seconds from now
    pub fn expires_in(token: impl Into<String>, seconds: i64) -> Self {
        Self::new(token, Some(Utc::now() + Duration::seconds(seconds)))
    }

    /// Check if the token is expired (with 30 second buffer)
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() + Duration::seconds(30) >= expires_at,
            None => false,
        }
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token state owned by one connector; never handed to callers
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Current token if it is still valid
    async fn get(&self) -> Option<AccessToken>;

    async fn put(&self, token: AccessToken);

    /// Obtain a fresh token and store it
    async fn refresh(&self) -> Result<AccessToken>;

    /// A valid token, refreshing when the stored one expired
    async fn access_token(&self) -> Result<String> {
        match self.get().await {
            Some(token) => Ok(token.token),
            None => Ok(self.refresh().await?.token),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// In-memory store refreshed through the OAuth refresh-token grant
pub struct OAuthTokenStore {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    current: Mutex<Option<AccessToken>>,
}

impl OAuthTokenStore {
    pub fn new(client: Client, config: &DriveConfig) -> Self {
        Self {
            client,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            refresh_token: config.refresh_token.clone(),
            current: Mutex::new(None),
        }
    }

    pub async fn clear(&self) {
        self.current.lock().await.take();
    }
}

#[async_trait]
impl TokenStore for OAuthTokenStore {
    async fn get(&self) -> Option<AccessToken> {
        let mut current = self.current.lock().await;
        match current.as_ref() {
            Some(token) if !token.is_expired() => Some(token.clone()),
            Some(_) => {
                current.take();
                None
            }
            None => None,
        }
    }

    async fn put(&self, token: AccessToken) {
        *self.current.lock().await = Some(token);
    }

    async fn refresh(&self) -> Result<AccessToken> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PolyqueryError::Content(format!("token endpoint unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PolyqueryError::Content(format!(
                "token refresh rejected ({}): {}",
                status,
                body.trim()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| PolyqueryError::Content(format!("invalid token response: {}", e)))?;
        let token = match body.expires_in {
            Some(seconds) => AccessToken::expires_in(body.access_token, seconds),
            None => AccessToken::new(body.access_token, None),
        };
        debug!("Refreshed access token, expires at {:?}", token.expires_at);
        self.put(token.clone()).await;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> DriveConfig {
        DriveConfig {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            refresh_token: "rt-1".into(),
            api_base: server.uri(),
            token_url: format!("{}/token", server.uri()),
            chunk_size: 1024,
            max_read_bytes: 1024,
        }
    }

    #[test]
    fn test_token_expiry_buffer() {
        assert!(!AccessToken::expires_in("t", 3600).is_expired());
        assert!(AccessToken::expires_in("t", 10).is_expired());
        assert!(!AccessToken::new("t", None).is_expired());
        assert!(!format!("{:?}", AccessToken::new("secret", None)).contains("secret"));
    }

    #[tokio::test]
    async fn test_refresh_once_then_reuse() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "at-1", "expires_in": 3600})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = OAuthTokenStore::new(Client::new(), &config(&server));
        assert!(store.get().await.is_none());
        assert_eq!(store.access_token().await.unwrap(), "at-1");
        assert_eq!(store.access_token().await.unwrap(), "at-1");
    }

    #[tokio::test]
    async fn test_expired_token_is_dropped() {
        let server = MockServer::start().await;
        let store = OAuthTokenStore::new(Client::new(), &config(&server));
        store.put(AccessToken::expires_in("old", -5)).await;
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_an_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let store = OAuthTokenStore::new(Client::new(), &config(&server));
        let err = store.refresh().await.unwrap_err();
        assert!(matches!(err, PolyqueryError::Content(_)));
        assert_eq!(err.status_code(), 502);
    }
}
