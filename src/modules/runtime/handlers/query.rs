//! Query execution and catalog handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use polyquery_types::runtime::{
    ErrorResponse, QueryRequest, QueryResponse, SchemaResponse, TableInfoResponse, TablesResponse,
};
use polyquery_types::{Principal, TableLookup};
use serde::Deserialize;
use std::time::Instant;
use tracing::{error, info};

use super::{ApiError, ApiResult};
use crate::state::AppState;

/// Optional namespace selector for catalog routes
#[derive(Debug, Default, Deserialize)]
pub struct CatalogParams {
    #[serde(default)]
    pub database: Option<String>,
}

/// Handler for query execution requests
pub struct QueryHandler;

impl QueryHandler {
    /// Handle POST /api/query
    pub async fn execute(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Json(request): Json<QueryRequest>,
    ) -> impl IntoResponse {
        info!("Executing query on '{}'", request.connection);
        let started = Instant::now();

        match state
            .executor
            .execute_query(
                &principal,
                &request.connection,
                &request.query,
                request.params.as_ref(),
            )
            .await
        {
            Ok(results) => {
                let elapsed = started.elapsed().as_millis() as u64;
                info!(
                    "Query on '{}' executed successfully, {} rows returned in {}ms",
                    request.connection,
                    results.len(),
                    elapsed
                );
                (StatusCode::OK, Json(QueryResponse::success(results, elapsed)))
            }
            Err(e) => {
                error!("Query on '{}' failed: {}", request.connection, e);
                let status = StatusCode::from_u16(e.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, Json(QueryResponse::error(e.sanitized_message())))
            }
        }
    }

    /// Handle GET /api/schema/{connection}
    pub async fn schema(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path(connection): Path<String>,
        Query(params): Query<CatalogParams>,
    ) -> ApiResult<Json<SchemaResponse>> {
        let schema = state
            .executor
            .get_schema(&principal, &connection, params.database.as_deref())
            .await?;
        Ok(Json(SchemaResponse {
            success: true,
            connection,
            schema,
        }))
    }

    /// Handle GET /api/tables/{connection}
    pub async fn tables(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path(connection): Path<String>,
        Query(params): Query<CatalogParams>,
    ) -> ApiResult<Json<TablesResponse>> {
        let tables = state
            .executor
            .get_tables(&principal, &connection, params.database.as_deref())
            .await?;
        Ok(Json(TablesResponse {
            success: true,
            connection,
            tables,
        }))
    }

    /// Handle GET /api/tables/{connection}/{table}
    pub async fn table_info(
        State(state): State<AppState>,
        Extension(principal): Extension<Principal>,
        Path((connection, table)): Path<(String, String)>,
        Query(params): Query<CatalogParams>,
    ) -> Result<Response, ApiError> {
        let lookup = state
            .executor
            .get_table_info(&principal, &connection, &table, params.database.as_deref())
            .await?;
        Ok(match lookup {
            TableLookup::Found(table) => Json(TableInfoResponse {
                success: true,
                connection,
                table,
            })
            .into_response(),
            TableLookup::Missing { error } => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse::new(error))).into_response()
            }
        })
    }
}
