//! Represents a file record mirroring one remote bucket object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Fixed host segment of provider object URLs. Everything after this
/// segment is the object key within the bucket.
pub const OSS_HOST_SEGMENT: &str = "aliyuncs.com/";

/// Local metadata for one object stored in a remote bucket.
///
/// The record does not hold the object bytes, only its addressing and
/// bookkeeping data. At most one row exists per
/// `(dir_id, file_name, file_type, bucket_name, bucket_region)` — enforced
/// by find-or-update-else-create at write time, not by a DB constraint.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BucketFile {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Name of the bucket holding the remote object.
    pub bucket_name: String,

    /// Region of the bucket holding the remote object.
    pub bucket_region: String,

    /// Display file name (without type suffix).
    pub file_name: String,

    /// File type suffix, e.g. `png`.
    pub file_type: String,

    /// Full public URL of the remote object.
    pub file_url: String,

    /// Object key within the bucket, derived from `file_url` when the
    /// record is written. Empty when the URL does not contain the provider
    /// host segment.
    pub object_key: String,

    /// Containing directory, `None` for the bucket root.
    pub dir_id: Option<Uuid>,

    /// Object size in bytes, as reported by the uploader.
    pub size: Option<i64>,

    /// Cache-control max-age in seconds, if set at upload time.
    pub cache_control: Option<i64>,

    /// Optional free-form description.
    pub description: Option<String>,

    /// User id that created the record.
    pub created_by: i64,

    /// When this record was created.
    pub created_at: DateTime<Utc>,

    /// User id of the last update, if any.
    pub updated_by: Option<i64>,

    /// When this record was last updated, if ever.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Derive the remote object key from a full object URL.
///
/// Returns everything after the first `aliyuncs.com/` segment, or an empty
/// string when the URL does not contain it. The key is stored on the row so
/// deletion never has to re-parse URLs.
pub fn derive_object_key(file_url: &str) -> String {
    match file_url.split_once(OSS_HOST_SEGMENT) {
        Some((_, key)) => key.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_the_path_after_the_host_segment() {
        assert_eq!(
            derive_object_key("https://bucket.oss.aliyuncs.com/docs/report.pdf"),
            "docs/report.pdf"
        );
    }

    #[test]
    fn nested_keys_keep_their_slashes() {
        assert_eq!(
            derive_object_key("https://b.oss-cn-hangzhou.aliyuncs.com/a/b/c.png"),
            "a/b/c.png"
        );
    }

    #[test]
    fn foreign_urls_yield_an_empty_key() {
        assert_eq!(derive_object_key("https://example.com/docs/report.pdf"), "");
        assert_eq!(derive_object_key(""), "");
    }
}
