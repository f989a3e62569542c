//! Shared application state handed to every handler.

use crate::services::{
    catalog_service::CatalogService, oss_client::ObjectStore,
    reconcile_service::DeletionReconciler, tts_service::TtsManager,
};
use jwt_compact::alg::Hs256Key;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub catalog: CatalogService,
    pub reconciler: DeletionReconciler,
    pub oss: Arc<dyn ObjectStore>,
    pub tts: Arc<TtsManager>,
    /// HS256 key verifying console tokens.
    pub token_key: Arc<Hs256Key>,
    /// Directory receiving synthesized audio; probed by readiness checks.
    pub tts_output_dir: std::path::PathBuf,
}
