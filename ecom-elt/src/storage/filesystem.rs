//! Filesystem-backed object store.
//!
//! Buckets are directories under a root:
//! ```text
//! {root}/
//!   {bucket}/
//!     {object name with '/' as directory separators}
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use md5::{Digest, Md5};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::{md5_base64, ObjectMetadata, ObjectRef, ObjectStore, Result, StorageError};

const CHUNK_SIZE: usize = 64 * 1024;

/// Copies `reader` to `writer` in chunks, returning the byte count and
/// base64 MD5 of what was copied.
async fn copy_hashed<R, W>(reader: &mut R, writer: &mut W) -> std::io::Result<(u64, String)>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).await?;
        size += n as u64;
    }
    writer.flush().await?;
    Ok((size, md5_base64(hasher)))
}

/// Object store that keeps buckets as local directories.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Creates a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the root cannot be created.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// A store rooted at `root` without touching the filesystem.
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The filesystem root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a bucket directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid bucket name or an IO failure.
    pub async fn create_bucket(&self, bucket: &str) -> Result<()> {
        ObjectRef::new(bucket, "object").validate()?;
        fs::create_dir_all(self.root.join(bucket)).await?;
        Ok(())
    }

    fn path_for(&self, object: &ObjectRef) -> Result<PathBuf> {
        object.validate()?;
        let mut path = self.root.join(&object.bucket);
        path.extend(object.name.split('/'));
        Ok(path)
    }

    async fn ensure_bucket(&self, object: &ObjectRef) -> Result<()> {
        let bucket_dir = self.root.join(&object.bucket);
        match fs::metadata(&bucket_dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::NotFound(format!("gs://{}", object.bucket))),
            Err(e) => Err(StorageError::from_io(&format!("gs://{}", object.bucket), e)),
        }
    }

    /// Streams `reader` into a temp file next to `path` and renames it into
    /// place, so readers never see a partial object.
    async fn write_atomic<R>(
        &self,
        object: &ObjectRef,
        path: &Path,
        reader: &mut R,
    ) -> Result<(u64, String)>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::from_io(&object.uri(), e))?;
        }

        let temp_path = path.with_file_name(format!(
            ".{}.{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("object"),
            uuid::Uuid::new_v4().simple()
        ));
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            let written = copy_hashed(reader, &mut file).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, path).await?;
            Ok::<_, std::io::Error>(written)
        }
        .await;

        match written {
            Ok(written) => Ok(written),
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(StorageError::from_io(&object.uri(), e))
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn copy_object(
        &self,
        source: &ObjectRef,
        destination: &ObjectRef,
    ) -> Result<ObjectMetadata> {
        let src_path = self.path_for(source)?;
        let dst_path = self.path_for(destination)?;
        self.ensure_bucket(destination).await?;

        let mut reader = fs::File::open(&src_path)
            .await
            .map_err(|e| StorageError::from_io(&source.uri(), e))?;
        let (size, md5_hash) = self.write_atomic(destination, &dst_path, &mut reader).await?;

        debug!(
            source = %source,
            destination = %destination,
            size,
            "Copied object"
        );

        Ok(ObjectMetadata {
            bucket: destination.bucket.clone(),
            name: destination.name.clone(),
            size,
            md5_hash,
        })
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<()> {
        let path = self.path_for(object)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| StorageError::from_io(&object.uri(), e))?;
        debug!(object = %object, "Deleted object");
        Ok(())
    }

    async fn put_object(&self, object: &ObjectRef, content: &[u8]) -> Result<ObjectMetadata> {
        let path = self.path_for(object)?;
        self.ensure_bucket(object).await?;
        let mut reader = content;
        let (size, md5_hash) = self.write_atomic(object, &path, &mut reader).await?;

        Ok(ObjectMetadata {
            bucket: object.bucket.clone(),
            name: object.name.clone(),
            size,
            md5_hash,
        })
    }

    async fn stat(&self, object: &ObjectRef) -> Result<ObjectMetadata> {
        let path = self.path_for(object)?;
        let mut reader = fs::File::open(&path)
            .await
            .map_err(|e| StorageError::from_io(&object.uri(), e))?;
        let (size, md5_hash) = copy_hashed(&mut reader, &mut tokio::io::sink())
            .await
            .map_err(|e| StorageError::from_io(&object.uri(), e))?;

        Ok(ObjectMetadata {
            bucket: object.bucket.clone(),
            name: object.name.clone(),
            size,
            md5_hash,
        })
    }

    async fn exists(&self, object: &ObjectRef) -> Result<bool> {
        let path = self.path_for(object)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io(&object.uri(), e)),
        }
    }

    fn read_uri(&self, object: &ObjectRef) -> Result<String> {
        Ok(self.path_for(object)?.to_string_lossy().into_owned())
    }
}
