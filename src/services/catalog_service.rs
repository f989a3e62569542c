//! src/services/catalog_service.rs
//!
//! CatalogService — directory-tree and file metadata kept in SQLite as a
//! local mirror of a remote OSS bucket. Directories form a per-bucket tree
//! through `parent_dir_id`; files hang off a directory (or the root when
//! `dir_id` is NULL). This file never talks to the remote store; deletion
//! reconciliation lives in `reconcile_service`.

use crate::models::{
    BucketIdentity,
    directory::BucketDir,
    file::{BucketFile, derive_object_key},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

const DIR_COLUMNS: &str = "id, name, bucket_name, bucket_region, parent_dir_id, description, \
     created_by, created_at, updated_by, updated_at";

const FILE_COLUMNS: &str = "id, bucket_name, bucket_region, file_name, file_type, file_url, \
     object_key, dir_id, size, cache_control, description, \
     created_by, created_at, updated_by, updated_at";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("directory `{0}` not found")]
    DirectoryNotFound(Uuid),
    #[error("bucket identity does not match directory `{0}`")]
    BucketMismatch(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// A directory's surroundings: the directory itself (absent for the bucket
/// root), its ancestor chain nearest-first, and its immediate children.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryContext {
    pub current: Option<BucketDir>,
    pub parents: Vec<BucketDir>,
    pub children: Vec<BucketDir>,
}

/// Payload for creating a directory.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NewDirectory {
    pub name: String,
    #[serde(flatten)]
    pub bucket: BucketIdentity,
    pub parent_dir_id: Option<Uuid>,
    pub description: Option<String>,
}

/// Payload for recording an uploaded file.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SaveFile {
    pub dir_id: Option<Uuid>,
    #[serde(flatten)]
    pub bucket: BucketIdentity,
    pub file_name: String,
    pub file_type: String,
    pub file_url: String,
    pub size: Option<i64>,
    pub cache_control: Option<i64>,
    pub description: Option<String>,
}

/// Page window for file listings.
#[derive(Deserialize, Clone, Copy, Debug)]
pub struct Pager {
    pub page: i64,
    pub size: i64,
}

impl Default for Pager {
    fn default() -> Self {
        Self { page: 1, size: 20 }
    }
}

/// One page of files plus the resolved directory context they live in.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FileListing {
    pub directory: DirectoryContext,
    pub rows: Vec<BucketFile>,
    pub count: i64,
}

/// CatalogService provides the metadata operations behind the console:
/// - Resolve a directory's context (ancestors, children, bucket check)
/// - Create directories
/// - Record uploaded files (find-or-update-else-create)
/// - Page files per directory
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<SqlitePool>,
}

impl CatalogService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    async fn fetch_dir(&self, id: Uuid) -> CatalogResult<Option<BucketDir>> {
        let dir = sqlx::query_as::<_, BucketDir>(&format!(
            "SELECT {DIR_COLUMNS} FROM bucket_dirs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(dir)
    }

    /// Resolve a directory id (or the root, when `None`) into its context.
    ///
    /// Fails with [`CatalogError::DirectoryNotFound`] when `dir_id` names a
    /// missing directory and [`CatalogError::BucketMismatch`] when the
    /// directory belongs to a different bucket than the caller claims.
    ///
    /// The ancestor walk stops at a NULL parent or at the first lookup
    /// miss; a broken chain truncates silently rather than erroring.
    pub async fn resolve_context(
        &self,
        dir_id: Option<Uuid>,
        bucket: &BucketIdentity,
    ) -> CatalogResult<DirectoryContext> {
        let current = match dir_id {
            Some(id) => {
                let dir = self
                    .fetch_dir(id)
                    .await?
                    .ok_or(CatalogError::DirectoryNotFound(id))?;
                if dir.bucket_name != bucket.bucket_name
                    || dir.bucket_region != bucket.bucket_region
                {
                    return Err(CatalogError::BucketMismatch(id));
                }
                Some(dir)
            }
            None => None,
        };

        let children = sqlx::query_as::<_, BucketDir>(&format!(
            "SELECT {DIR_COLUMNS} FROM bucket_dirs \
             WHERE bucket_name = ? AND bucket_region = ? AND parent_dir_id IS ? \
             ORDER BY name ASC"
        ))
        .bind(&bucket.bucket_name)
        .bind(&bucket.bucket_region)
        .bind(current.as_ref().map(|d| d.id))
        .fetch_all(&*self.db)
        .await?;

        let mut parents = Vec::new();
        if let Some(dir) = &current {
            let mut parent_id = dir.parent_dir_id;
            while let Some(id) = parent_id {
                match self.fetch_dir(id).await? {
                    Some(parent) => {
                        parent_id = parent.parent_dir_id;
                        parents.push(parent);
                    }
                    // Broken chain: stop where the records do.
                    None => break,
                }
            }
        }

        Ok(DirectoryContext {
            current,
            parents,
            children,
        })
    }

    /// Create a directory after validating the parent reference.
    ///
    /// The parent, when given, must exist and share the new directory's
    /// bucket identity.
    pub async fn create_directory(
        &self,
        input: NewDirectory,
        user_id: i64,
    ) -> CatalogResult<BucketDir> {
        if let Some(parent_id) = input.parent_dir_id {
            let parent = self
                .fetch_dir(parent_id)
                .await?
                .ok_or(CatalogError::DirectoryNotFound(parent_id))?;
            if parent.bucket_name != input.bucket.bucket_name
                || parent.bucket_region != input.bucket.bucket_region
            {
                return Err(CatalogError::BucketMismatch(parent_id));
            }
        }

        let dir = sqlx::query_as::<_, BucketDir>(&format!(
            "INSERT INTO bucket_dirs \
             (id, name, bucket_name, bucket_region, parent_dir_id, description, \
              created_by, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {DIR_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(&input.bucket.bucket_name)
        .bind(&input.bucket.bucket_region)
        .bind(input.parent_dir_id)
        .bind(&input.description)
        .bind(user_id)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        tracing::debug!(dir = %dir.id, name = %dir.name, "created bucket directory");
        Ok(dir)
    }

    /// Record an uploaded file, updating the existing row when one matches
    /// the `(dir, name, type, bucket)` identity.
    ///
    /// The object key is derived from the URL here, at write time, so the
    /// deletion path never parses URLs.
    pub async fn save_file(&self, input: SaveFile, user_id: i64) -> CatalogResult<BucketFile> {
        let object_key = derive_object_key(&input.file_url);

        let existing = sqlx::query_as::<_, BucketFile>(&format!(
            "SELECT {FILE_COLUMNS} FROM bucket_files \
             WHERE dir_id IS ? AND file_name = ? AND file_type = ? \
               AND bucket_name = ? AND bucket_region = ?"
        ))
        .bind(input.dir_id)
        .bind(&input.file_name)
        .bind(&input.file_type)
        .bind(&input.bucket.bucket_name)
        .bind(&input.bucket.bucket_region)
        .fetch_optional(&*self.db)
        .await?;

        let file = match existing {
            Some(row) => {
                sqlx::query_as::<_, BucketFile>(&format!(
                    "UPDATE bucket_files \
                     SET file_url = ?, object_key = ?, size = ?, updated_by = ?, updated_at = ? \
                     WHERE id = ? \
                     RETURNING {FILE_COLUMNS}"
                ))
                .bind(&input.file_url)
                .bind(&object_key)
                .bind(input.size)
                .bind(user_id)
                .bind(Utc::now())
                .bind(row.id)
                .fetch_one(&*self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, BucketFile>(&format!(
                    "INSERT INTO bucket_files \
                     (id, bucket_name, bucket_region, file_name, file_type, file_url, \
                      object_key, dir_id, size, cache_control, description, \
                      created_by, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                     RETURNING {FILE_COLUMNS}"
                ))
                .bind(Uuid::new_v4())
                .bind(&input.bucket.bucket_name)
                .bind(&input.bucket.bucket_region)
                .bind(&input.file_name)
                .bind(&input.file_type)
                .bind(&input.file_url)
                .bind(&object_key)
                .bind(input.dir_id)
                .bind(input.size)
                .bind(input.cache_control)
                .bind(&input.description)
                .bind(user_id)
                .bind(Utc::now())
                .fetch_one(&*self.db)
                .await?
            }
        };
        Ok(file)
    }

    /// List one directory's files with the resolved context, newest first.
    pub async fn list_files(
        &self,
        dir_id: Option<Uuid>,
        bucket: &BucketIdentity,
        pager: Pager,
    ) -> CatalogResult<FileListing> {
        let directory = self.resolve_context(dir_id, bucket).await?;

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bucket_files \
             WHERE dir_id IS ? AND bucket_name = ? AND bucket_region = ?",
        )
        .bind(dir_id)
        .bind(&bucket.bucket_name)
        .bind(&bucket.bucket_region)
        .fetch_one(&*self.db)
        .await?;

        let size = pager.size.clamp(1, 200);
        let offset = (pager.page.max(1) - 1) * size;
        let rows = sqlx::query_as::<_, BucketFile>(&format!(
            "SELECT {FILE_COLUMNS} FROM bucket_files \
             WHERE dir_id IS ? AND bucket_name = ? AND bucket_region = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
        ))
        .bind(dir_id)
        .bind(&bucket.bucket_name)
        .bind(&bucket.bucket_region)
        .bind(size)
        .bind(offset)
        .fetch_all(&*self.db)
        .await?;

        Ok(FileListing {
            directory,
            rows,
            count,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    /// In-memory pool with the production schema applied.
    pub(crate) async fn test_pool() -> Arc<SqlitePool> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        for statement in include_str!("../../migrations/0001_init.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }
        Arc::new(pool)
    }

    fn bucket() -> BucketIdentity {
        BucketIdentity::new("assets", "oss-cn-hangzhou")
    }

    fn new_dir(name: &str, parent: Option<Uuid>) -> NewDirectory {
        NewDirectory {
            name: name.into(),
            bucket: bucket(),
            parent_dir_id: parent,
            description: None,
        }
    }

    fn save(name: &str, dir: Option<Uuid>, url: &str) -> SaveFile {
        SaveFile {
            dir_id: dir,
            bucket: bucket(),
            file_name: name.into(),
            file_type: "png".into(),
            file_url: url.into(),
            size: Some(1024),
            cache_control: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn resolving_a_nested_directory_yields_its_ancestors_nearest_first() {
        let svc = CatalogService::new(test_pool().await);
        let a = svc.create_directory(new_dir("a", None), 1).await.unwrap();
        let b = svc
            .create_directory(new_dir("b", Some(a.id)), 1)
            .await
            .unwrap();

        let ctx = svc.resolve_context(Some(b.id), &bucket()).await.unwrap();
        assert_eq!(ctx.current.as_ref().unwrap().id, b.id);
        assert_eq!(
            ctx.parents.iter().map(|d| d.id).collect::<Vec<_>>(),
            vec![a.id]
        );
        assert!(ctx.parents.last().unwrap().parent_dir_id.is_none());
    }

    #[tokio::test]
    async fn root_context_lists_only_root_children_of_the_same_bucket() {
        let svc = CatalogService::new(test_pool().await);
        let a = svc.create_directory(new_dir("a", None), 1).await.unwrap();
        svc.create_directory(new_dir("nested", Some(a.id)), 1)
            .await
            .unwrap();
        let mut other = new_dir("other", None);
        other.bucket = BucketIdentity::new("elsewhere", "oss-cn-shanghai");
        svc.create_directory(other, 1).await.unwrap();

        let ctx = svc.resolve_context(None, &bucket()).await.unwrap();
        assert!(ctx.current.is_none());
        assert!(ctx.parents.is_empty());
        assert_eq!(
            ctx.children.iter().map(|d| d.id).collect::<Vec<_>>(),
            vec![a.id]
        );
    }

    #[tokio::test]
    async fn missing_directory_is_a_not_found() {
        let svc = CatalogService::new(test_pool().await);
        let err = svc
            .resolve_context(Some(Uuid::new_v4()), &bucket())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::DirectoryNotFound(_)));
    }

    #[tokio::test]
    async fn foreign_bucket_identity_is_rejected() {
        let svc = CatalogService::new(test_pool().await);
        let a = svc.create_directory(new_dir("a", None), 1).await.unwrap();
        let err = svc
            .resolve_context(
                Some(a.id),
                &BucketIdentity::new("elsewhere", "oss-cn-shanghai"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::BucketMismatch(_)));
    }

    #[tokio::test]
    async fn broken_ancestor_chain_truncates_instead_of_erroring() {
        let pool = test_pool().await;
        let svc = CatalogService::new(pool.clone());
        // Orphan: its parent id points at nothing.
        let orphan = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO bucket_dirs \
             (id, name, bucket_name, bucket_region, parent_dir_id, created_by, created_at) \
             VALUES (?, 'orphan', 'assets', 'oss-cn-hangzhou', ?, 1, ?)",
        )
        .bind(orphan)
        .bind(Uuid::new_v4())
        .bind(Utc::now())
        .execute(&*pool)
        .await
        .unwrap();

        let ctx = svc.resolve_context(Some(orphan), &bucket()).await.unwrap();
        assert!(ctx.parents.is_empty());
    }

    #[tokio::test]
    async fn creating_under_a_missing_parent_fails() {
        let svc = CatalogService::new(test_pool().await);
        let err = svc
            .create_directory(new_dir("x", Some(Uuid::new_v4())), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::DirectoryNotFound(_)));
    }

    #[tokio::test]
    async fn saving_the_same_file_twice_updates_in_place() {
        let svc = CatalogService::new(test_pool().await);
        let first = svc
            .save_file(
                save("logo", None, "https://assets.oss.aliyuncs.com/fe/logo.png"),
                1,
            )
            .await
            .unwrap();
        let mut second = save("logo", None, "https://assets.oss.aliyuncs.com/fe/logo-v2.png");
        second.size = Some(2048);
        let updated = svc.save_file(second, 2).await.unwrap();

        assert_eq!(first.id, updated.id);
        assert_eq!(updated.file_url, "https://assets.oss.aliyuncs.com/fe/logo-v2.png");
        assert_eq!(updated.object_key, "fe/logo-v2.png");
        assert_eq!(updated.size, Some(2048));
        assert_eq!(updated.updated_by, Some(2));
        assert!(updated.updated_at.is_some());

        let listing = svc.list_files(None, &bucket(), Pager::default()).await.unwrap();
        assert_eq!(listing.count, 1);
    }

    #[tokio::test]
    async fn listing_pages_files_within_one_directory() {
        let svc = CatalogService::new(test_pool().await);
        let dir = svc.create_directory(new_dir("docs", None), 1).await.unwrap();
        for i in 0..3 {
            svc.save_file(
                save(
                    &format!("f{i}"),
                    Some(dir.id),
                    &format!("https://assets.oss.aliyuncs.com/docs/f{i}.png"),
                ),
                1,
            )
            .await
            .unwrap();
        }
        svc.save_file(save("root", None, "https://assets.oss.aliyuncs.com/root.png"), 1)
            .await
            .unwrap();

        let listing = svc
            .list_files(Some(dir.id), &bucket(), Pager { page: 1, size: 2 })
            .await
            .unwrap();
        assert_eq!(listing.count, 3);
        assert_eq!(listing.rows.len(), 2);
        assert_eq!(listing.directory.current.as_ref().unwrap().id, dir.id);
    }
}
