//! src/services/reconcile_service.rs
//!
//! DeletionReconciler — deletes objects from the remote store, then brings
//! the local file records in line with what the store actually deleted.
//! Remote and local are not covered by one transaction; a local failure
//! after remote deletion is surfaced as its own error variant so operators
//! can tell state divergence apart from ordinary failures.

use crate::models::BucketIdentity;
use crate::models::file::BucketFile;
use crate::services::oss_client::ObjectStore;
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Per-file message for records whose stored object key is empty.
const ILLEGAL_FILENAME: &str = "未查询到合法文件名";

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// None of the requested ids matched a file record. Domain error, not
    /// a crash.
    #[error("文件不存在")]
    NotFound,
    /// Remote objects are gone but the local rows could not be removed.
    /// Local metadata is now stale; must reach operators distinctly.
    #[error("OSS 资源已删除，本地删除失败")]
    PartialFailure(#[source] sqlx::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Outcome for one requested file, in retrieval order.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FileDeletion {
    pub file_id: Uuid,
    pub full_url: String,
    pub bucket_key: String,
    pub success: bool,
    pub err_msg: String,
}

/// DeletionReconciler owns the delete-then-reconcile flow:
/// 1. load the requested file records,
/// 2. batch-delete their keys remotely, one batch per bucket identity,
/// 3. mark per-file success from the store's deleted-key list,
/// 4. drop local rows only for confirmed deletions.
#[derive(Clone)]
pub struct DeletionReconciler {
    db: Arc<SqlitePool>,
    store: Arc<dyn ObjectStore>,
}

impl DeletionReconciler {
    pub fn new(db: Arc<SqlitePool>, store: Arc<dyn ObjectStore>) -> Self {
        Self { db, store }
    }

    /// Delete the given files remotely and reconcile local records.
    ///
    /// Returns one [`FileDeletion`] per matched id, in the order the
    /// records were retrieved (record creation order). Ids that match no
    /// record are silently ignored; if nothing matches at all the call
    /// fails with [`ReconcileError::NotFound`].
    pub async fn delete_files(&self, ids: &[Uuid]) -> ReconcileResult<Vec<FileDeletion>> {
        let files = self.load_files(ids).await?;
        if files.is_empty() {
            return Err(ReconcileError::NotFound);
        }

        let mut results: Vec<FileDeletion> = files
            .iter()
            .map(|f| FileDeletion {
                file_id: f.id,
                full_url: f.file_url.clone(),
                bucket_key: f.object_key.clone(),
                success: false,
                err_msg: String::new(),
            })
            .collect();

        // Records without a usable key never reach the store.
        for result in results.iter_mut().filter(|r| r.bucket_key.is_empty()) {
            result.err_msg = ILLEGAL_FILENAME.to_string();
        }

        // One remote batch per bucket identity, in first-appearance order.
        // The request may legally mix buckets; each batch must go to its
        // own bucket client.
        let mut batches: Vec<(BucketIdentity, Vec<usize>)> = Vec::new();
        for (index, file) in files.iter().enumerate() {
            if file.object_key.is_empty() {
                continue;
            }
            let bucket =
                BucketIdentity::new(file.bucket_name.clone(), file.bucket_region.clone());
            match batches.iter_mut().find(|(b, _)| *b == bucket) {
                Some((_, indexes)) => indexes.push(index),
                None => batches.push((bucket, vec![index])),
            }
        }

        for (bucket, indexes) in batches {
            let keys: Vec<String> = indexes
                .iter()
                .map(|&i| files[i].object_key.clone())
                .collect();
            match self.store.delete_multi(&bucket, &keys).await {
                Ok(outcome) => {
                    let deleted: Vec<String> = outcome
                        .deleted
                        .iter()
                        .map(|d| urlencoding::encode(&d.key).into_owned())
                        .collect();
                    for &index in &indexes {
                        let result = &mut results[index];
                        let encoded = urlencoding::encode(&result.bucket_key).into_owned();
                        if deleted.iter().any(|d| d.starts_with(&encoded)) {
                            result.success = true;
                        } else {
                            result.err_msg = format!("OSS 删除失败: {}", outcome.status);
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        bucket = %bucket.bucket_name,
                        region = %bucket.bucket_region,
                        %error,
                        "batched object deletion failed"
                    );
                    for &index in &indexes {
                        results[index].err_msg = format!("OSS 删除失败: {error}");
                    }
                }
            }
        }

        let confirmed: Vec<Uuid> = results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.file_id)
            .collect();
        if !confirmed.is_empty() {
            self.delete_local(&confirmed)
                .await
                .map_err(ReconcileError::PartialFailure)?;
        }

        tracing::info!(
            requested = ids.len(),
            matched = results.len(),
            deleted = confirmed.len(),
            "reconciled bucket file deletion"
        );
        Ok(results)
    }

    async fn load_files(&self, ids: &[Uuid]) -> ReconcileResult<Vec<BucketFile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, bucket_name, bucket_region, file_name, file_type, file_url, \
             object_key, dir_id, size, cache_control, description, \
             created_by, created_at, updated_by, updated_at \
             FROM bucket_files WHERE id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY rowid");
        Ok(builder.build_query_as().fetch_all(&*self.db).await?)
    }

    async fn delete_local(&self, ids: &[Uuid]) -> Result<(), sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM bucket_files WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        builder.build().execute(&*self.db).await?;
        Ok(())
    }
}
