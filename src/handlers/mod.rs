//! HTTP handlers and the JSON envelope the console expects.

pub mod cdn_handlers;
pub mod health_handlers;
pub mod tts_handlers;

use axum::Json;
use serde::Serialize;

/// Uniform response envelope: `{code, msg, data}`.
#[derive(Serialize, Debug)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub msg: String,
    pub data: T,
}

/// Wrap a payload in the success envelope.
pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: 200,
        msg: "ok".into(),
        data,
    })
}
