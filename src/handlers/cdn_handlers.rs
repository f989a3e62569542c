//! HTTP handlers for bucket, directory and file-metadata operations.
//! Validation-light: payloads are deserialized, then delegated to the
//! catalog, reconciler, or object-store client.

use crate::{
    auth::AuthUser,
    errors::AppError,
    handlers::{ApiResponse, ok},
    models::BucketIdentity,
    services::{
        catalog_service::{FileListing, NewDirectory, Pager, SaveFile},
        oss_client::{BucketDetail, BucketSummary, SignMethod, SignatureOptions},
        reconcile_service::FileDeletion,
    },
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::Deserialize;
use uuid::Uuid;

/// GET `/api/v1/cdn/buckets`
pub async fn get_buckets(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<BucketSummary>>>, AppError> {
    let buckets = state.oss.list_buckets().await?;
    Ok(ok(buckets))
}

/// GET `/api/v1/cdn/buckets/{name}`
pub async fn get_bucket_detail(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<BucketDetail>>, AppError> {
    let detail = state.oss.bucket_info(&name).await?;
    Ok(ok(detail))
}

/// Request body for `POST /api/v1/cdn/presign`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignRequest {
    pub file_name: String,
    pub file_type: String,
    pub method: SignMethod,
    #[serde(flatten)]
    pub bucket: BucketIdentity,
    /// Validity window in seconds, default 1800.
    pub expires: Option<i64>,
    /// Image process pipeline, e.g. `image/resize,w_200`.
    pub process: Option<String>,
}

/// POST `/api/v1/cdn/presign` — presigned URL for a browser-side upload or
/// download.
pub async fn presign(
    State(state): State<AppState>,
    Json(body): Json<PresignRequest>,
) -> Result<Json<ApiResponse<String>>, AppError> {
    let options = SignatureOptions {
        method: body.method,
        expires: body.expires,
        content_type: match body.method {
            SignMethod::Put => Some(body.file_type.clone()),
            SignMethod::Get => None,
        },
        process: body.process,
    };
    let url = state
        .oss
        .signature_url(&body.bucket, &body.file_name, &options)?;
    Ok(ok(url))
}

/// Request body for `POST /api/v1/cdn/files/query`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesRequest {
    pub dir_id: Option<Uuid>,
    #[serde(flatten)]
    pub bucket: BucketIdentity,
    pub pagination: Option<Pager>,
}

/// POST `/api/v1/cdn/files/query` — directory context plus one page of
/// files.
pub async fn query_files(
    State(state): State<AppState>,
    Json(body): Json<ListFilesRequest>,
) -> Result<Json<ApiResponse<FileListing>>, AppError> {
    let listing = state
        .catalog
        .list_files(body.dir_id, &body.bucket, body.pagination.unwrap_or_default())
        .await?;
    Ok(ok(listing))
}

/// POST `/api/v1/cdn/files` — record an uploaded file.
pub async fn save_file(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<SaveFile>,
) -> Result<Json<ApiResponse<crate::models::file::BucketFile>>, AppError> {
    let file = state.catalog.save_file(body, user.id).await?;
    Ok(ok(file))
}

/// Request body for `POST /api/v1/cdn/files/delete`.
#[derive(Debug, Deserialize)]
pub struct DeleteFilesRequest {
    pub ids: Vec<Uuid>,
}

/// POST `/api/v1/cdn/files/delete` — delete objects remotely and reconcile
/// the local records against the outcome.
pub async fn delete_files(
    State(state): State<AppState>,
    Json(body): Json<DeleteFilesRequest>,
) -> Result<Json<ApiResponse<Vec<FileDeletion>>>, AppError> {
    let results = state.reconciler.delete_files(&body.ids).await?;
    Ok(ok(results))
}

/// POST `/api/v1/cdn/directories` — create a directory.
pub async fn create_directory(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<NewDirectory>,
) -> Result<Json<ApiResponse<crate::models::directory::BucketDir>>, AppError> {
    let dir = state.catalog.create_directory(body, user.id).await?;
    Ok(ok(dir))
}
