//! Remote client for Polyquery
//!
//! A thin typed client over the HTTP surface with the behaviour agents rely on:
//!
//! - **Authentication**: bearer key on every call
//! - **Caching**: TTL cache for read queries and schemas, opt-in per call
//! - **Retry**: exponential backoff for timeouts, transport failures and 429
//! - **Degradation**: `health_check` never errors, `offline_message` is always set

mod cache;
mod client;
mod config;
mod error;

pub use cache::ResponseCache;
pub use client::{PolyqueryClient, OFFLINE_MESSAGE};
pub use config::{ClientConfig, ClientConfigBuilder, DEFAULT_URL, ENV_API_KEY, ENV_URL};
pub use error::{ClientError, Result};
