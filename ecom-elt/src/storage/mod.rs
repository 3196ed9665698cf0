//! Object storage for raw file drops.
//!
//! Objects live in buckets and are addressed by `gs://bucket/name` style
//! references. The pipeline only needs server-side copy, delete and a way for
//! the warehouse to read an object, so that is all the [`ObjectStore`] trait
//! exposes.
//!
//! ## Backends
//!
//! - [`LocalObjectStore`] - buckets are directories under a filesystem root

mod filesystem;

pub use filesystem::LocalObjectStore;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during object store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid bucket name '{0}'")]
    InvalidBucketName(String),

    #[error("Invalid object name '{name}': {reason}")]
    InvalidObjectName { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Maps an IO error on `uri` to the matching storage error.
    pub(crate) fn from_io(uri: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(uri.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::AccessDenied(uri.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// Result type for object store operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Reference to an object in a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub bucket: String,
    pub name: String,
}

impl ObjectRef {
    /// Creates a new object reference.
    #[must_use]
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }

    /// `gs://bucket/name`
    #[must_use]
    pub fn uri(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.name)
    }

    /// Checks bucket and object naming rules.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBucketName` or `InvalidObjectName`.
    pub fn validate(&self) -> Result<()> {
        validate_bucket(&self.bucket)?;
        validate_object_name(&self.name)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub bucket: String,
    pub name: String,
    pub size: u64,
    /// Base64-encoded MD5 of the content.
    pub md5_hash: String,
}

/// Object storage backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copies `source` to `destination`, replacing any existing destination.
    ///
    /// The destination is never observable in a partially written state.
    async fn copy_object(
        &self,
        source: &ObjectRef,
        destination: &ObjectRef,
    ) -> Result<ObjectMetadata>;

    /// Deletes an object.
    async fn delete_object(&self, object: &ObjectRef) -> Result<()>;

    /// Writes an object from bytes, replacing any existing one.
    async fn put_object(&self, object: &ObjectRef, content: &[u8]) -> Result<ObjectMetadata>;

    /// Returns object metadata.
    async fn stat(&self, object: &ObjectRef) -> Result<ObjectMetadata>;

    /// Returns true if the object exists.
    async fn exists(&self, object: &ObjectRef) -> Result<bool>;

    /// A location the warehouse can read the object from.
    fn read_uri(&self, object: &ObjectRef) -> Result<String>;
}

/// Base64 MD5 digest, the form object stores report checksums in.
#[must_use]
pub fn md5_base64(hasher: Md5) -> String {
    STANDARD.encode(hasher.finalize())
}

fn validate_bucket(bucket: &str) -> Result<()> {
    let valid_chars = bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));
    let valid_ends = bucket
        .chars()
        .next()
        .zip(bucket.chars().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());

    if (3..=63).contains(&bucket.len()) && valid_chars && valid_ends {
        Ok(())
    } else {
        Err(StorageError::InvalidBucketName(bucket.to_string()))
    }
}

fn validate_object_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(StorageError::InvalidObjectName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() {
        return invalid("empty");
    }
    if name.starts_with('/') {
        return invalid("leading '/'");
    }
    if name.contains(['\\', '\0', '\r', '\n']) {
        return invalid("forbidden character");
    }
    if name.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return invalid("empty or relative path segment");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_uri() {
        let obj = ObjectRef::new("gcs-elt-ecom-raw-euw1", "raw/a.csv");
        assert_eq!(obj.uri(), "gs://gcs-elt-ecom-raw-euw1/raw/a.csv");
        assert_eq!(obj.to_string(), obj.uri());
        assert!(obj.validate().is_ok());
    }

    #[test]
    fn test_bucket_rules() {
        assert!(validate_bucket("ab").is_err());
        assert!(validate_bucket("Upper-case").is_err());
        assert!(validate_bucket("-leading").is_err());
        assert!(validate_bucket("my_bucket.v2").is_ok());
    }

    #[test]
    fn test_object_name_rules() {
        for bad in ["", "/abs", "a//b", "a/../b", "a\\b", "trailing/"] {
            assert!(
                matches!(validate_object_name(bad), Err(StorageError::InvalidObjectName { .. })),
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_object_name("raw/online_retail/ingestion_dt=2026-01-01/f.csv").is_ok());
    }

    #[test]
    fn test_md5_base64() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(md5_base64(Md5::new()), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn test_io_error_mapping() {
        let err =
            StorageError::from_io("gs://b/x", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(matches!(err, StorageError::NotFound(ref u) if u == "gs://b/x"));

        let err = StorageError::from_io(
            "gs://b/x",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, StorageError::AccessDenied(_)));
    }
}
