//! BI workbook, view and datasource handlers

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use polyquery_types::runtime::{Datasource, ItemsResponse, Project, Workbook, WorkbookView};
use polyquery_types::Principal;

use super::ApiResult;
use crate::executor::ViewExport;
use crate::state::AppState;

pub struct WorkbookHandler;

impl WorkbookHandler {
    /// Handle GET /api/workbooks/{connection}
    pub async fn workbooks(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path(connection): Path<String>,
    ) -> ApiResult<Json<ItemsResponse<Workbook>>> {
        let items = state.executor.list_workbooks(&principal, &connection).await?;
        Ok(Json(ItemsResponse::new(connection, items)))
    }

    /// Handle GET /api/workbooks/{connection}/{workbook}/views
    pub async fn views(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path((connection, workbook)): Path<(String, String)>,
    ) -> ApiResult<Json<ItemsResponse<WorkbookView>>> {
        let items = state
            .executor
            .list_views(&principal, &connection, &workbook)
            .await?;
        Ok(Json(ItemsResponse::new(connection, items)))
    }

    /// Handle GET /api/datasources/{connection}
    pub async fn datasources(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path(connection): Path<String>,
    ) -> ApiResult<Json<ItemsResponse<Datasource>>> {
        let items = state
            .executor
            .list_datasources(&principal, &connection)
            .await?;
        Ok(Json(ItemsResponse::new(connection, items)))
    }

    /// Handle GET /api/projects/{connection}
    pub async fn projects(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path(connection): Path<String>,
    ) -> ApiResult<Json<ItemsResponse<Project>>> {
        let items = state.executor.list_projects(&principal, &connection).await?;
        Ok(Json(ItemsResponse::new(connection, items)))
    }

    /// Handle GET /api/views/{connection}/{view}/{format}
    pub async fn export(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path((connection, view, format)): Path<(String, String, String)>,
    ) -> ApiResult<Response> {
        let format: ViewExport = format.parse()?;
        let bytes = state
            .executor
            .export_view(&principal, &connection, &view, format)
            .await?;
        Ok(([(header::CONTENT_TYPE, format.content_type())], bytes).into_response())
    }
}
