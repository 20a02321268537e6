//! Connection registry handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use polyquery_core::{ConnectionDescriptor, PolyqueryError};
use polyquery_types::runtime::{
    ConnectionStatusResponse, ConnectionsResponse, CreateConnectionRequest,
    UpdateConnectionRequest,
};
use polyquery_types::{EngineType, Principal};
use tracing::info;

use super::ApiResult;
use crate::state::AppState;

fn parse_engine(engine: &str) -> Result<EngineType, PolyqueryError> {
    engine.parse().map_err(PolyqueryError::Validation)
}

fn status(name: String, message: impl Into<String>) -> Json<ConnectionStatusResponse> {
    Json(ConnectionStatusResponse {
        success: true,
        name,
        message: message.into(),
    })
}

pub struct ConnectionHandler;

impl ConnectionHandler {
    /// Handle GET /api/connections
    pub async fn list(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
    ) -> ApiResult<Json<ConnectionsResponse>> {
        let connections = state.executor.list_connections(&principal).await?;
        Ok(Json(ConnectionsResponse {
            success: true,
            connections,
        }))
    }

    /// Handle POST /api/connections
    pub async fn create(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Json(request): Json<CreateConnectionRequest>,
    ) -> ApiResult<(StatusCode, Json<ConnectionStatusResponse>)> {
        let engine = parse_engine(&request.engine)?;
        let descriptor = ConnectionDescriptor::new(request.name.clone(), engine, request.params);
        state
            .executor
            .create_connection(&principal, descriptor)
            .await?;
        info!("'{}' created connection '{}'", principal.name, request.name);
        Ok((StatusCode::CREATED, status(request.name, "created")))
    }

    /// Handle PUT /api/connections/{name}
    pub async fn update(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path(name): Path<String>,
        Json(request): Json<UpdateConnectionRequest>,
    ) -> ApiResult<Json<ConnectionStatusResponse>> {
        let engine = request.engine.as_deref().map(parse_engine).transpose()?;
        state
            .executor
            .update_connection(&principal, &name, engine, request.params)
            .await?;
        Ok(status(name, "updated"))
    }

    /// Handle DELETE /api/connections/{name}
    pub async fn delete(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path(name): Path<String>,
    ) -> ApiResult<Json<ConnectionStatusResponse>> {
        state.executor.delete_connection(&principal, &name).await?;
        Ok(status(name, "deleted"))
    }

    /// Handle GET /api/connections/{name}/test
    pub async fn test(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path(name): Path<String>,
    ) -> ApiResult<Json<ConnectionStatusResponse>> {
        let ok = state.executor.test_connection(&principal, &name).await?;
        Ok(Json(ConnectionStatusResponse {
            success: ok,
            name,
            message: if ok { "reachable" } else { "unreachable" }.to_string(),
        }))
    }
}
