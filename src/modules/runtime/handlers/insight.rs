//! Narrative analysis handlers

use axum::{extract::State, Extension, Json};
use polyquery_types::runtime::{AnalyzeRequest, InsightResponse, RecommendRequest};
use polyquery_types::Principal;

use super::ApiResult;
use crate::state::AppState;

pub struct InsightHandler;

impl InsightHandler {
    /// Handle POST /api/ai/analyze
    pub async fn analyze(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Json(request): Json<AnalyzeRequest>,
    ) -> ApiResult<Json<InsightResponse>> {
        let insight = state
            .executor
            .analyze(
                &principal,
                &request.connection,
                &request.query,
                &request.analysis_type,
            )
            .await?;
        Ok(Json(InsightResponse {
            success: true,
            connection: request.connection,
            insight,
        }))
    }

    /// Handle POST /api/ai/recommend
    pub async fn recommend(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Json(request): Json<RecommendRequest>,
    ) -> ApiResult<Json<InsightResponse>> {
        let insight = state
            .executor
            .recommend(&principal, &request.connection, &request.context)
            .await?;
        Ok(Json(InsightResponse {
            success: true,
            connection: request.connection,
            insight,
        }))
    }
}
