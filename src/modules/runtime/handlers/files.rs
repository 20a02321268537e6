//! File browsing handlers

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use polyquery_types::runtime::{
    DirectoryTreeResponse, FileContentResponse, FileEntry, FileMetadataResponse, ItemsResponse,
};
use polyquery_types::Principal;
use serde::Deserialize;

use super::ApiResult;
use crate::content::ListOptions;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PathParams {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub pattern: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TreeParams {
    #[serde(default)]
    pub max_depth: Option<usize>,
}

pub struct FileHandler;

impl FileHandler {
    /// Handle GET /api/files/{connection}
    pub async fn list(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path(connection): Path<String>,
        Query(options): Query<ListOptions>,
    ) -> ApiResult<Json<ItemsResponse<FileEntry>>> {
        let files = state
            .executor
            .list_files(&principal, &connection, &options)
            .await?;
        Ok(Json(ItemsResponse::new(connection, files)))
    }

    /// Handle GET /api/files/{connection}/content
    pub async fn content(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path(connection): Path<String>,
        Query(params): Query<PathParams>,
    ) -> ApiResult<Json<FileContentResponse>> {
        let file = state
            .executor
            .read_file(&principal, &connection, &params.path)
            .await?;
        Ok(Json(FileContentResponse {
            success: true,
            connection,
            file,
        }))
    }

    /// Handle GET /api/files/{connection}/raw
    pub async fn raw(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path(connection): Path<String>,
        Query(params): Query<PathParams>,
    ) -> ApiResult<Response> {
        let bytes = state
            .executor
            .read_binary(&principal, &connection, &params.path)
            .await?;
        let mime = mime_guess::from_path(&params.path).first_or_octet_stream();
        Ok(([(header::CONTENT_TYPE, mime.to_string())], bytes).into_response())
    }

    /// Handle GET /api/files/{connection}/search
    pub async fn search(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path(connection): Path<String>,
        Query(params): Query<SearchParams>,
    ) -> ApiResult<Json<ItemsResponse<FileEntry>>> {
        let files = state
            .executor
            .search_files(&principal, &connection, &params.pattern)
            .await?;
        Ok(Json(ItemsResponse::new(connection, files)))
    }

    /// Handle GET /api/files/{connection}/metadata
    pub async fn metadata(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path(connection): Path<String>,
        Query(params): Query<PathParams>,
    ) -> ApiResult<Json<FileMetadataResponse>> {
        let metadata = state
            .executor
            .file_metadata(&principal, &connection, &params.path)
            .await?;
        Ok(Json(FileMetadataResponse {
            success: true,
            connection,
            metadata,
        }))
    }

    /// Handle GET /api/files/{connection}/tree
    pub async fn tree(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path(connection): Path<String>,
        Query(params): Query<TreeParams>,
    ) -> ApiResult<Json<DirectoryTreeResponse>> {
        let tree = state
            .executor
            .directory_tree(&principal, &connection, params.max_depth)
            .await?;
        Ok(Json(DirectoryTreeResponse {
            success: true,
            connection,
            tree,
        }))
    }
}
