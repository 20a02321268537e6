//! HTTP request handlers for the Polyquery server
//!
//! Handlers take the authenticated [`Principal`] from request extensions and
//! hand off to the executor, which performs the capability check.

mod admin;
mod connections;
mod files;
mod insight;
mod query;
mod workbooks;

pub use admin::AdminHandler;
pub use connections::ConnectionHandler;
pub use files::FileHandler;
pub use insight::InsightHandler;
pub use query::QueryHandler;
pub use workbooks::WorkbookHandler;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use polyquery_core::PolyqueryError;
use polyquery_types::runtime::ErrorResponse;
use tracing::{error, warn};

/// A failed request rendered as `{success: false, error}`
#[derive(Debug)]
pub struct ApiError(pub PolyqueryError);

impl From<PolyqueryError> for ApiError {
    fn from(err: PolyqueryError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.0.is_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }
        (status, Json(ErrorResponse::new(self.0.sanitized_message()))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
