//! Abstraction over the object storage APIs.
//!
//! Only S3 and S3-compatible endpoints are supported today, but everything above this module
//! works in terms of these traits so another backend with multipart-upload-and-part-copy
//! semantics could be added without touching the assemblers.
use crate::plan::ObjectRef;
use crate::{error, Config, Result};
use bytes::Bytes;
use dyn_clone::DynClone;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use url::Url;

#[cfg(test)]
pub(crate) mod memory;
mod s3;

/// An object storage system like S3.
#[async_trait::async_trait]
pub(crate) trait ObjectStorage: Sync + Send + 'static {
    /// Given a URL that contains a bucket (and possibly an object key), extract the bucket name,
    /// validate it against the underlying object storage system, and if it's valid then produce a
    /// [`Bucket`] for it.
    async fn extract_bucket_from_url(&self, url: &Url) -> Result<Box<dyn Bucket>>;

    /// Produce a [`Bucket`] for a bucket known only by name, without validating access.
    ///
    /// Manifest rows name arbitrary source buckets; validating each of potentially thousands of
    /// rows up front would be pure overhead, so access problems surface on first use instead.
    fn bucket_handle(&self, name: &str) -> Box<dyn Bucket>;

    /// Split a URL into a validated bucket and the object key or prefix within it.
    ///
    /// The key is everything after `s3://bucket/`, without the leading slash; `None` when the URL
    /// names only the bucket.
    async fn parse_url(&self, url: &Url) -> Result<(Box<dyn Bucket>, Option<String>)> {
        let bucket = self.extract_bucket_from_url(url).await?;

        let key = url.path().trim_start_matches('/');
        let key = if key.is_empty() {
            None
        } else {
            Some(key.to_string())
        };

        Ok((bucket, key))
    }
}

/// Constructs [`ObjectStorage`] implementations from URLs.
pub(crate) struct ObjectStorageFactory;

impl ObjectStorageFactory {
    /// Given the URL to an object storage bucket, prefix, or object, determine which
    /// implementation handles that particular object storage technology and return an instance
    /// of it.
    ///
    /// If the URL isn't a supported scheme, an error is returned.
    pub async fn from_url(config: Config, url: &Url) -> Result<Arc<dyn ObjectStorage>> {
        if url.scheme() == "s3" {
            Ok(Self::s3(config).await)
        } else {
            error::UnsupportedObjectStorageSnafu { url: url.clone() }.fail()
        }
    }

    /// Return an [`ObjectStorage`] implementation for S3 or an S3-compatible API.
    pub async fn s3(config: Config) -> Arc<dyn ObjectStorage> {
        Arc::new(s3::S3::new(config).await)
    }
}

/// Upload knobs that apply to the destination object.
#[derive(Clone, Debug, Default)]
pub(crate) struct UploadOptions {
    /// URL-encoded `key=value` pairs joined by `&`, applied as object tags.
    pub tagging: Option<String>,

    /// Storage class name for the destination object.
    pub storage_class: Option<String>,
}

/// One completed part of a multipart upload, as the store wants it echoed back on completion.
#[derive(Clone, Debug)]
pub(crate) struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// A single bucket in some object storage system, and every operation the archiver needs from
/// it.
///
/// All byte ranges are half-open `[start, end)` offsets; implementations translate to whatever
/// the wire format wants.
#[async_trait::async_trait]
pub(crate) trait Bucket: DynClone + std::fmt::Debug + Sync + Send + 'static {
    fn name(&self) -> &str;

    /// Size, timestamp, and etag of one object.
    async fn head_object(&self, key: &str) -> Result<ObjectRef>;

    /// The object's user metadata.
    async fn head_object_metadata(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Every object under the prefix (the whole bucket when empty), sorted by key.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectRef>>;

    /// Read an object, or a byte range of it.
    async fn get_object(&self, key: &str, range: Option<Range<u64>>) -> Result<Bytes>;

    /// Write a complete object in one request.  Returns the new object's etag.
    async fn put_object(&self, key: &str, data: Bytes, options: &UploadOptions) -> Result<String>;

    /// Start a multipart upload.  Returns the upload ID.
    async fn create_multipart_upload(&self, key: &str, options: &UploadOptions) -> Result<String>;

    /// Upload one part from local memory.  Returns the part's etag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<String>;

    /// Upload one part by server-side copy from an existing object, optionally a sub-range of
    /// it.  Returns the part's etag.
    async fn upload_part_copy(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source_bucket: &str,
        source_key: &str,
        range: Option<Range<u64>>,
    ) -> Result<String>;

    /// Complete a multipart upload from its parts.  Returns the assembled object's etag.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<String>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()>;

    async fn delete_object(&self, key: &str) -> Result<()>;
}

dyn_clone::clone_trait_object!(Bucket);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objstore::memory::MemoryObjectStore;
    use crate::TarLiftError;

    #[tokio::test]
    async fn urls_split_into_bucket_and_key() {
        let storage: Arc<dyn ObjectStorage> = Arc::new(MemoryObjectStore::new());

        // (url, bucket, key)
        let table = [
            ("s3://bucket/prefix", "bucket", Some("prefix")),
            ("s3://bucket/prefix/", "bucket", Some("prefix/")),
            ("s3://bucket/a/deep/key.bin", "bucket", Some("a/deep/key.bin")),
            ("s3://bucket", "bucket", None),
            ("s3://bucket/", "bucket", None),
        ];

        for (url, expected_bucket, expected_key) in table {
            let (bucket, key) = storage.parse_url(&url.parse().unwrap()).await.unwrap();
            assert_eq!(bucket.name(), expected_bucket, "{}", url);
            assert_eq!(key.as_deref(), expected_key, "{}", url);
        }
    }

    #[tokio::test]
    async fn non_s3_schemes_are_rejected() {
        let result = ObjectStorageFactory::from_url(
            crate::Config::default(),
            &"file:///home/user/archive.tar".parse().unwrap(),
        )
        .await;

        assert!(matches!(
            result.map(|_| ()).unwrap_err(),
            TarLiftError::UnsupportedObjectStorage { .. }
        ));
    }
}
