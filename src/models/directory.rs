//! Represents a logical directory inside a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A directory node in the per-bucket folder tree.
///
/// Directories exist only in local metadata; the remote object store is
/// flat. `parent_dir_id` is a weak reference — a missing parent does not
/// invalidate the row, it merely truncates ancestor walks.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BucketDir {
    /// Unique identifier for this directory (UUID for internal DB use).
    pub id: Uuid,

    /// Display name of the folder.
    pub name: String,

    /// Name of the bucket this directory belongs to.
    pub bucket_name: String,

    /// Region of the bucket this directory belongs to.
    ///
    /// Invariant: matches the parent's region, if a parent exists.
    pub bucket_region: String,

    /// Parent directory, `None` for a root-level directory.
    pub parent_dir_id: Option<Uuid>,

    /// Optional free-form description.
    pub description: Option<String>,

    /// User id that created the directory.
    pub created_by: i64,

    /// When this directory was created.
    pub created_at: DateTime<Utc>,

    /// User id of the last update, if any.
    pub updated_by: Option<i64>,

    /// When this directory was last updated, if ever.
    pub updated_at: Option<DateTime<Utc>>,
}
