//! An in-process object store used by the tests.
//!
//! Implements the same contract the S3 backend does, including the store's multipart acceptance
//! rules: a non-terminal part smaller than the minimum part size is only accepted once the
//! upload already holds at least the minimum (which is what makes the leading zero-pad trick
//! work), and a part copy can read at most the maximum part size.  Completed uploads keep their
//! part sizes around so tests can assert on the shape of an upload, not just its bytes.
use super::{Bucket, CompletedPart, ObjectStorage, UploadOptions};
use crate::plan::{ObjectRef, PART_SIZE_MAX, PART_SIZE_MIN};
use crate::{error, Result};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use snafu::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;
use std::ops::Range;
use std::sync::{Arc, Mutex};
use url::Url;

#[derive(Default)]
struct State {
    objects: HashMap<String, HashMap<String, StoredObject>>,
    uploads: HashMap<String, Upload>,
    part_sizes: HashMap<(String, String), Vec<u64>>,
    next_upload_id: u64,
}

struct StoredObject {
    data: Bytes,
    mtime: DateTime<Utc>,
    etag: String,
    metadata: HashMap<String, String>,
}

struct Upload {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, Bytes>,
}

fn etag_of(data: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    hasher.write(data);
    format!("\"{:016x}\"", hasher.finish())
}

fn default_mtime() -> DateTime<Utc> {
    Utc.timestamp_opt(1_600_000_000, 0).unwrap()
}

/// The whole in-process store; cheap to clone, shared by every bucket handle it produces.
#[derive(Clone, Default)]
pub(crate) struct MemoryObjectStore {
    state: Arc<Mutex<State>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket(&self, name: &str) -> Box<dyn Bucket> {
        Box::new(MemoryBucket {
            name: name.to_string(),
            state: self.state.clone(),
        })
    }

    pub fn insert_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.insert_object_with_metadata(bucket, key, data, HashMap::new())
    }

    pub fn insert_object_with_metadata(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Bytes>,
        metadata: HashMap<String, String>,
    ) {
        let data = data.into();
        let mut state = self.state.lock().unwrap();
        let etag = etag_of(&data);
        state.objects.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                data,
                mtime: default_mtime(),
                etag,
                metadata,
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.data.clone())
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut keys: Vec<String> = state
            .objects
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// The sizes of the parts the object was completed from, in part-number order.
    pub fn part_sizes(&self, bucket: &str, key: &str) -> Option<Vec<u64>> {
        let state = self.state.lock().unwrap();
        state
            .part_sizes
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Multipart uploads that were started but neither completed nor aborted.
    pub fn open_upload_count(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }
}

#[async_trait::async_trait]
impl ObjectStorage for MemoryObjectStore {
    async fn extract_bucket_from_url(&self, url: &Url) -> Result<Box<dyn Bucket>> {
        let bucket = url
            .host_str()
            .ok_or_else(|| error::MissingBucketSnafu { url: url.clone() }.build())?;

        Ok(self.bucket(bucket))
    }

    fn bucket_handle(&self, name: &str) -> Box<dyn Bucket> {
        self.bucket(name)
    }
}

#[derive(Clone)]
struct MemoryBucket {
    name: String,
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MemoryBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBucket")
            .field("name", &self.name)
            .finish()
    }
}

impl MemoryBucket {
    fn with_object<T>(
        &self,
        key: &str,
        f: impl FnOnce(&StoredObject) -> T,
    ) -> Result<T> {
        let state = self.state.lock().unwrap();
        let object = state
            .objects
            .get(&self.name)
            .and_then(|objects| objects.get(key))
            .ok_or_else(|| {
                error::IncompleteResponseSnafu {
                    bucket: self.name.clone(),
                    key: key.to_string(),
                }
                .build()
            })?;
        Ok(f(object))
    }
}

#[async_trait::async_trait]
impl Bucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn head_object(&self, key: &str) -> Result<ObjectRef> {
        self.with_object(key, |object| {
            ObjectRef::remote(
                &self.name,
                key,
                object.data.len() as u64,
                object.mtime,
                object.etag.clone(),
            )
        })
    }

    async fn head_object_metadata(&self, key: &str) -> Result<HashMap<String, String>> {
        self.with_object(key, |object| object.metadata.clone())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectRef>> {
        let state = self.state.lock().unwrap();
        let mut objects: Vec<ObjectRef> = state
            .objects
            .get(&self.name)
            .map(|objects| {
                objects
                    .iter()
                    .filter(|(key, _)| key.starts_with(prefix))
                    .map(|(key, object)| {
                        ObjectRef::remote(
                            &self.name,
                            key,
                            object.data.len() as u64,
                            object.mtime,
                            object.etag.clone(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        objects.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn get_object(&self, key: &str, range: Option<Range<u64>>) -> Result<Bytes> {
        self.with_object(key, |object| match &range {
            Some(range) => {
                assert!(
                    range.end <= object.data.len() as u64,
                    "range {:?} reads past the end of '{}' ({} bytes)",
                    range,
                    key,
                    object.data.len()
                );
                object
                    .data
                    .slice(range.start as usize..range.end as usize)
            }
            None => object.data.clone(),
        })
    }

    async fn put_object(&self, key: &str, data: Bytes, _options: &UploadOptions) -> Result<String> {
        let etag = etag_of(&data);
        let mut state = self.state.lock().unwrap();
        state
            .objects
            .entry(self.name.clone())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    data,
                    mtime: default_mtime(),
                    etag: etag.clone(),
                    metadata: HashMap::new(),
                },
            );
        Ok(etag)
    }

    async fn create_multipart_upload(&self, key: &str, _options: &UploadOptions) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.next_upload_id += 1;
        let upload_id = format!("upload-{:04}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            Upload {
                bucket: self.name.clone(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<String> {
        assert!(data.len() as u64 <= PART_SIZE_MAX, "part too large");
        let etag = etag_of(&data);
        let mut state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .unwrap_or_else(|| panic!("no such upload '{}'", upload_id));
        assert_eq!(upload.bucket, self.name);
        assert_eq!(upload.key, key);
        upload.parts.insert(part_number, data);
        Ok(etag)
    }

    async fn upload_part_copy(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source_bucket: &str,
        source_key: &str,
        range: Option<Range<u64>>,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();

        let source = state
            .objects
            .get(source_bucket)
            .and_then(|objects| objects.get(source_key))
            .ok_or_else(|| {
                error::IncompleteResponseSnafu {
                    bucket: source_bucket.to_string(),
                    key: source_key.to_string(),
                }
                .build()
            })?;

        let data = match &range {
            Some(range) => {
                assert!(
                    range.end <= source.data.len() as u64,
                    "copy range {:?} reads past the end of '{}'",
                    range,
                    source_key
                );
                source
                    .data
                    .slice(range.start as usize..range.end as usize)
            }
            None => source.data.clone(),
        };
        assert!(
            data.len() as u64 <= PART_SIZE_MAX,
            "a part copy can read at most the maximum part size"
        );

        let etag = etag_of(&data);
        let upload = state
            .uploads
            .get_mut(upload_id)
            .unwrap_or_else(|| panic!("no such upload '{}'", upload_id));
        assert_eq!(upload.bucket, self.name);
        assert_eq!(upload.key, key);
        upload.parts.insert(part_number, data);
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .remove(upload_id)
            .unwrap_or_else(|| panic!("no such upload '{}'", upload_id));
        assert_eq!(upload.bucket, self.name);
        assert_eq!(upload.key, key);

        let mut expected: Vec<i32> = upload.parts.keys().copied().collect();
        expected.sort_unstable();
        let mut listed: Vec<i32> = parts.iter().map(|part| part.part_number).collect();
        listed.sort_unstable();
        assert_eq!(expected, listed, "completion must list every uploaded part");

        // A short part is only legal as the terminal part, or behind enough preceding bytes
        // that the upload as a whole has already cleared the minimum part size.
        let sizes: Vec<u64> = upload.parts.values().map(|data| data.len() as u64).collect();
        let mut preceding = 0u64;
        for (index, size) in sizes.iter().enumerate() {
            let terminal = index == sizes.len() - 1;
            assert!(
                terminal || *size >= PART_SIZE_MIN || preceding >= PART_SIZE_MIN,
                "part {} of '{}' is {} bytes, below the minimum part size",
                index + 1,
                key,
                size
            );
            preceding += size;
        }

        let mut data = BytesMut::with_capacity(preceding as usize);
        for part in upload.parts.values() {
            data.extend_from_slice(part);
        }
        let data = data.freeze();
        let etag = etag_of(&data);

        state
            .part_sizes
            .insert((self.name.clone(), key.to_string()), sizes);
        state
            .objects
            .entry(self.name.clone())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    data,
                    mtime: default_mtime(),
                    etag: etag.clone(),
                    metadata: HashMap::new(),
                },
            );

        Ok(etag)
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(upload) = state.uploads.remove(upload_id) {
            assert_eq!(upload.key, key);
        }
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        ensure!(
            state
                .objects
                .get_mut(&self.name)
                .map(|objects| objects.remove(key).is_some())
                .unwrap_or(false),
            error::IncompleteResponseSnafu {
                bucket: self.name.clone(),
                key: key.to_string(),
            }
        );
        Ok(())
    }
}
