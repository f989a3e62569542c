use crate::services::{
    catalog_service::CatalogError, oss_client::OssError, reconcile_service::ReconcileError,
    tts_service::TtsError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for request-level errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "code": self.status.as_u16(),
            "msg": self.message,
            "data": null
        }));

        (self.status, body).into_response()
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::DirectoryNotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            CatalogError::BucketMismatch(_) => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            CatalogError::Sqlx(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::NotFound => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            // Remote state is gone but local rows remain: operators must
            // see this as divergence, not as a validation failure.
            ReconcileError::PartialFailure(_) => {
                tracing::error!(%err, "bucket file state diverged between OSS and local store");
                Self::internal(err.to_string())
            }
            ReconcileError::Sqlx(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<OssError> for AppError {
    fn from(err: OssError) -> Self {
        match err {
            OssError::Api { status, .. } if status == 404 => {
                Self::new(StatusCode::NOT_FOUND, err.to_string())
            }
            _ => Self::new(StatusCode::BAD_GATEWAY, err.to_string()),
        }
    }
}

impl From<TtsError> for AppError {
    fn from(err: TtsError) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
