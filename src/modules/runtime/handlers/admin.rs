//! Health, stats, users and configuration handlers

use axum::{extract::State, http::StatusCode, Extension, Json};
use polyquery_core::UserConfig;
use polyquery_types::runtime::{
    ConfigResponse, ConfigSummary, CreateUserRequest, HealthResponse, StatsResponse, UserSummary,
    UsersResponse,
};
use polyquery_types::{Capability, Principal};
use tracing::info;

use super::ApiResult;
use crate::state::AppState;

pub struct AdminHandler;

impl AdminHandler {
    /// Handle GET /health
    pub async fn health() -> Json<HealthResponse> {
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Handle GET /api/stats
    pub async fn stats(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
    ) -> ApiResult<Json<StatsResponse>> {
        state
            .executor
            .authorize(Capability::ViewStats, &principal)
            .await?;
        let connections = state.registry.len().await;
        let stats = state.stats.lock().await.snapshot(connections);
        Ok(Json(StatsResponse {
            success: true,
            stats,
        }))
    }

    /// Handle GET /api/users
    pub async fn list_users(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
    ) -> ApiResult<Json<UsersResponse>> {
        state
            .executor
            .authorize(Capability::ViewUsers, &principal)
            .await?;
        Ok(Json(UsersResponse {
            success: true,
            users: state.users.list().await,
        }))
    }

    /// Handle POST /api/users
    pub async fn create_user(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Json(request): Json<CreateUserRequest>,
    ) -> ApiResult<(StatusCode, Json<UserSummary>)> {
        state
            .executor
            .authorize(Capability::ManageUsers, &principal)
            .await?;
        let user = UserConfig::new(request.name, request.api_key, request.role);
        let summary = user.summary();
        state.users.add(user).await?;
        info!("'{}' added user '{}' ({})", principal.name, summary.name, summary.role);
        Ok((StatusCode::CREATED, Json(summary)))
    }

    /// Handle GET /api/config
    pub async fn config(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
    ) -> ApiResult<Json<ConfigResponse>> {
        state
            .executor
            .authorize(Capability::ViewConfig, &principal)
            .await?;
        Ok(Json(ConfigResponse {
            success: true,
            config: ConfigSummary {
                name: state.info.name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                port: state.info.port,
                request_timeout_secs: state.info.request_timeout.as_secs(),
                connections: state.registry.engines().await,
                users: state.users.len().await,
            },
        }))
    }
}
