//! Client configuration

use std::time::Duration;

use crate::error::{ClientError, Result};

pub const ENV_URL: &str = "POLYQUERY_URL";
pub const ENV_API_KEY: &str = "POLYQUERY_API_KEY";
pub const DEFAULT_URL: &str = "http://localhost:8080";

/// Configuration for [`crate::PolyqueryClient`]
#[derive(Clone)]
pub struct ClientConfig {
    /// Server root, without the `/api` suffix
    pub base_url: String,
    /// Bearer key sent on every request
    pub api_key: String,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Total attempts per call, including the first
    pub retry_attempts: u32,
    /// Attempt `n` is followed by a sleep of `backoff_base * 2^n`
    pub backoff_base: Duration,
    /// Lifetime of cached read responses
    pub cache_ttl: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_URL.to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            backoff_base: Duration::from_secs(1),
            cache_ttl: Duration::from_secs(300),
            user_agent: format!("polyquery-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("timeout", &self.timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("backoff_base", &self.backoff_base)
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Read `POLYQUERY_URL` (optional) and `POLYQUERY_API_KEY` (required)
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(ENV_API_KEY)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ClientError::Config(format!("{} is not set", ENV_API_KEY)))?;
        let mut builder = Self::builder().api_key(api_key);
        if let Ok(url) = std::env::var(ENV_URL) {
            if !url.is_empty() {
                builder = builder.base_url(url);
            }
        }
        builder.build()
    }
}

/// Builder for client config
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.config.retry_attempts = attempts;
        self
    }

    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.config.backoff_base = base;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Build the config
    pub fn build(mut self) -> Result<ClientConfig> {
        if self.config.api_key.is_empty() {
            return Err(ClientError::Config("api key is required".to_string()));
        }
        if !self.config.base_url.starts_with("http://")
            && !self.config.base_url.starts_with("https://")
        {
            return Err(ClientError::Config(format!(
                "base url must start with http:// or https://: {}",
                self.config.base_url
            )));
        }
        self.config.base_url = self.config.base_url.trim_end_matches('/').to_string();
        self.config.retry_attempts = self.config.retry_attempts.max(1);
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert_eq!(config.base_url, DEFAULT_URL);
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::builder()
            .base_url("https://pq.example.com/")
            .api_key("k")
            .timeout(Duration::from_secs(5))
            .retry_attempts(0)
            .cache_ttl(Duration::from_secs(60))
            .build()
            .unwrap();

        assert_eq!(config.base_url, "https://pq.example.com");
        assert_eq!(config.retry_attempts, 1);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert!(!format!("{:?}", config).contains("\"k\""));
    }

    #[test]
    fn test_config_builder_rejects() {
        assert!(ClientConfig::builder().build().is_err());
        assert!(ClientConfig::builder()
            .api_key("k")
            .base_url("ftp://x")
            .build()
            .is_err());
    }
}
