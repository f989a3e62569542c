//! Route table for the console gateway.
//!
//! ## Structure
//! - **Public probes** (no token)
//!   - `GET /healthz`, `GET /readyz`
//!
//! - **Token-guarded console API** under `/api/v1`
//!   - `GET  /cdn/buckets` — list buckets
//!   - `GET  /cdn/buckets/{name}` — bucket detail
//!   - `POST /cdn/presign` — presigned object URL
//!   - `POST /cdn/files/query` — directory context + paged files
//!   - `POST /cdn/files` — record an uploaded file
//!   - `POST /cdn/files/delete` — delete files and reconcile metadata
//!   - `POST /cdn/directories` — create a directory
//!   - `POST /tts/tasks` — start a speech-synthesis task
//!   - `GET  /tts/tasks/{id}` — poll a task

use crate::{
    auth::token_verifier,
    handlers::{
        cdn_handlers::{
            create_directory, delete_files, get_bucket_detail, get_buckets, presign, query_files,
            save_file,
        },
        health_handlers::{healthz, readyz},
        tts_handlers::{get_tts_task, start_tts_task},
    },
    state::AppState,
};
use axum::{
    Router, middleware,
    routing::{get, post},
};

/// Build the full router: public probes plus the guarded console API.
pub fn routes(state: AppState) -> Router {
    let api = Router::new()
        .route("/cdn/buckets", get(get_buckets))
        .route("/cdn/buckets/{name}", get(get_bucket_detail))
        .route("/cdn/presign", post(presign))
        .route("/cdn/files/query", post(query_files))
        .route("/cdn/files", post(save_file))
        .route("/cdn/files/delete", post(delete_files))
        .route("/cdn/directories", post(create_directory))
        .route("/tts/tasks", post(start_tts_task))
        .route("/tts/tasks/{id}", get(get_tts_task))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            token_verifier,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/api/v1", api)
        .with_state(state)
}
