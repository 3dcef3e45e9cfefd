//! REST handlers for the document store.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;

use fitsync_core::remote::{QueryRequest, QueryResponse};
use fitsync_core::Document;

use super::auth::AuthUser;
use super::storage::StorageError;
use super::AppState;

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// Handler error mapped onto an HTTP status.
#[derive(Debug)]
pub enum ApiError {
    NotFound { collection: String, id: String },
    Storage(StorageError),
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::Storage(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::NotFound { collection, id } => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("No document {}/{}", collection, id),
            ),
            ApiError::Storage(e @ StorageError::InvalidCollection(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_collection", e.to_string())
            }
            ApiError::Storage(e) => {
                tracing::error!("storage failure: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "storage", e.to_string())
            }
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

fn not_found(collection: String, id: String) -> ApiError {
    ApiError::NotFound { collection, id }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn get_document(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Document>, ApiError> {
    let found = state.store.get(&collection, &id).await?;
    match found {
        Some(doc) => Ok(Json(doc)),
        None => Err(not_found(collection, id)),
    }
}

pub async fn put_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((collection, id)): Path<(String, String)>,
    Json(document): Json<Document>,
) -> Result<StatusCode, ApiError> {
    state.store.put(&collection, &id, document).await?;
    tracing::info!(%collection, %id, user_id = %user.user_id, "document stored");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn patch_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((collection, id)): Path<(String, String)>,
    Json(fields): Json<Document>,
) -> Result<Json<Document>, ApiError> {
    let merged = state.store.patch(&collection, &id, fields).await?;
    match merged {
        Some(doc) => {
            tracing::info!(%collection, %id, user_id = %user.user_id, "document patched");
            Ok(Json(doc))
        }
        None => Err(not_found(collection, id)),
    }
}

pub async fn delete_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let removed = state.store.delete(&collection, &id).await?;
    if removed {
        tracing::info!(%collection, %id, user_id = %user.user_id, "document deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(collection, id))
    }
}

pub async fn query_documents(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let documents = state.store.query(&collection, &request.filters).await?;
    tracing::debug!(%collection, filters = request.filters.len(), found = documents.len(), "query");
    Ok(Json(QueryResponse { documents }))
}
