//! HTTP handlers for speech-synthesis tasks.

use crate::{
    errors::AppError,
    handlers::{ApiResponse, ok},
    services::tts_service::{StartTask, TaskSnapshot},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use uuid::Uuid;

/// Outcome of a start request. A connection failure is reported here, not
/// thrown: the task never existed.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StartTaskResponse {
    pub accepted: bool,
    pub task_id: Option<Uuid>,
}

/// POST `/api/v1/tts/tasks` — start a synthesis task.
///
/// Fire-and-forget: returns as soon as the task is registered. Progress is
/// polled via the task id.
pub async fn start_tts_task(
    State(state): State<AppState>,
    Json(body): Json<StartTask>,
) -> Result<Json<ApiResponse<StartTaskResponse>>, AppError> {
    match state.tts.start_task(body).await {
        Ok(task_id) => Ok(ok(StartTaskResponse {
            accepted: true,
            task_id: Some(task_id),
        })),
        Err(error) => {
            tracing::error!(%error, "could not start synthesis task");
            Ok(ok(StartTaskResponse {
                accepted: false,
                task_id: None,
            }))
        }
    }
}

/// GET `/api/v1/tts/tasks/{id}` — poll a task's state.
///
/// 404 once the task's registry entry has expired (or never existed).
pub async fn get_tts_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TaskSnapshot>>, AppError> {
    let snapshot = state
        .tts
        .task_snapshot(id)
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, format!("task `{id}` not found")))?;
    Ok(ok(snapshot))
}
