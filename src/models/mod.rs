//! Core data models for the bucket file console.
//!
//! Directories and files are local metadata mirrors of objects living in a
//! remote OSS bucket. They map cleanly to database tables via
//! `sqlx::FromRow` and serialize naturally as JSON via `serde`.

pub mod directory;
pub mod file;

use serde::{Deserialize, Serialize};

/// The `(name, region)` pair identifying one remote bucket.
///
/// Every directory and file row carries this pair; cross-bucket references
/// are rejected at the service layer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct BucketIdentity {
    pub bucket_name: String,
    pub bucket_region: String,
}

impl BucketIdentity {
    pub fn new(bucket_name: impl Into<String>, bucket_region: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            bucket_region: bucket_region.into(),
        }
    }
}
