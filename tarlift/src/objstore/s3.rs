//! Implementation of [`ObjectStorage`] for S3 and S3-compatible APIs.
use super::{Bucket, CompletedPart, ObjectStorage, UploadOptions};
use crate::plan::ObjectRef;
use crate::{error, Config, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::model::{CompletedMultipartUpload, CompletedPart as S3CompletedPart, StorageClass};
use aws_sdk_s3::types::ByteStream;
use aws_sdk_s3::Region;
use aws_smithy_http::endpoint::Endpoint;
use aws_smithy_types::retry::RetryConfig;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use snafu::prelude::*;
use std::collections::HashMap;
use std::ops::Range;
use tracing::debug;
use url::Url;

/// How many times the SDK retries a failed request before the error reaches the assemblers.
const MAX_RETRY_ATTEMPTS: u32 = 10;

pub(super) struct S3 {
    client: aws_sdk_s3::Client,
}

impl S3 {
    pub(super) async fn new(config: Config) -> Self {
        let region_provider = match &config.aws_region {
            Some(region) => {
                RegionProviderChain::first_try(Region::new(region.clone())).or_else("us-east-1")
            }
            None => RegionProviderChain::default_provider().or_else("us-east-1"),
        };

        let mut loader = aws_config::from_env()
            .region(region_provider)
            .retry_config(RetryConfig::standard().with_max_attempts(MAX_RETRY_ATTEMPTS));

        if let (Some(key_id), Some(secret)) = (
            &config.aws_access_key_id,
            &config.aws_secret_access_key,
        ) {
            loader = loader.credentials_provider(aws_sdk_s3::Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "tarlift-config",
            ));
        }

        let aws_config = loader.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if let Some(s3_endpoint) = &config.s3_endpoint {
            // AWS SDK uses the `Uri` type in `http`.  There doesn't seem to be an easy way to
            // convert between the two...
            let uri: http::Uri = s3_endpoint.to_string().parse().unwrap_or_else(|e| {
                panic!(
                    "BUG: URL '{}' could not be converted into Uri: {}",
                    s3_endpoint, e
                )
            });

            s3_config_builder = s3_config_builder.endpoint_resolver(Endpoint::immutable(uri));
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config_builder.build()),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStorage for S3 {
    async fn extract_bucket_from_url(&self, url: &Url) -> Result<Box<dyn Bucket>> {
        // S3 URLs are of the form:
        // s3://bucket/path
        // In URL terms, the `bucket` part is considered the host name.
        let bucket = url
            .host_str()
            .ok_or_else(|| error::MissingBucketSnafu { url: url.clone() }.build())?;

        debug!(bucket, "Validating access to bucket");

        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .with_context(|_| error::BucketInvalidOrNotAccessibleSnafu {
                bucket: bucket.to_string(),
            })?;

        debug!(bucket, "Access to bucket is confirmed");

        Ok(self.bucket_handle(bucket))
    }

    fn bucket_handle(&self, name: &str) -> Box<dyn Bucket> {
        Box::new(S3Bucket {
            name: name.to_string(),
            client: self.client.clone(),
        })
    }
}

#[derive(Clone)]
struct S3Bucket {
    name: String,
    client: aws_sdk_s3::Client,
}

impl std::fmt::Debug for S3Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Bucket").field("name", &self.name).finish()
    }
}

/// Half-open offsets to the inclusive `bytes=first-last` form S3 range headers use.
fn range_header(range: &Range<u64>) -> String {
    format!("bytes={}-{}", range.start, range.end - 1)
}

/// `CopySource` is `bucket/key`; the key portion must be URL-encoded.
fn copy_source(bucket: &str, key: &str) -> String {
    // keys are almost always plain enough that encoding everything except the path separators
    // is sufficient
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'/' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{:02X}", other)),
        }
    }

    format!("{}/{}", bucket, encoded)
}

fn timestamp(datetime: Option<&aws_smithy_types::DateTime>) -> DateTime<Utc> {
    datetime
        .and_then(|dt| Utc.timestamp_opt(dt.secs(), dt.subsec_nanos()).single())
        .unwrap_or_else(Utc::now)
}

#[async_trait::async_trait]
impl Bucket for S3Bucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn head_object(&self, key: &str) -> Result<ObjectRef> {
        let response = self
            .client
            .head_object()
            .bucket(&self.name)
            .key(key)
            .send()
            .await
            .with_context(|_| error::HeadObjectSnafu {
                bucket: self.name.clone(),
                key: key.to_string(),
            })?;

        Ok(ObjectRef::remote(
            &self.name,
            key,
            response.content_length() as u64,
            timestamp(response.last_modified()),
            response.e_tag().unwrap_or_default(),
        ))
    }

    async fn head_object_metadata(&self, key: &str) -> Result<HashMap<String, String>> {
        let response = self
            .client
            .head_object()
            .bucket(&self.name)
            .key(key)
            .send()
            .await
            .with_context(|_| error::HeadObjectSnafu {
                bucket: self.name.clone(),
                key: key.to_string(),
            })?;

        Ok(response
            .metadata()
            .map(|metadata| {
                metadata
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectRef>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.name);
            if !prefix.is_empty() {
                request = request.prefix(prefix);
            }
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response =
                request
                    .send()
                    .await
                    .with_context(|_| error::ListObjectsSnafu {
                        bucket: self.name.clone(),
                        prefix: prefix.to_string(),
                    })?;

            for object in response.contents().unwrap_or_default() {
                let key = object.key().unwrap_or_default().to_string();
                objects.push(ObjectRef::remote(
                    &self.name,
                    key,
                    object.size() as u64,
                    timestamp(object.last_modified()),
                    object.e_tag().unwrap_or_default(),
                ));
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated() => {
                    continuation_token = Some(token.to_string())
                }
                _ => break,
            }
        }

        debug!(
            bucket = %self.name,
            prefix,
            count = objects.len(),
            "Listed objects under prefix"
        );

        // The S3 API returns keys in lexicographic order already; keep that a guarantee of this
        // method rather than an accident of the backend
        objects.sort_unstable_by(|a, b| a.key.cmp(&b.key));

        Ok(objects)
    }

    async fn get_object(&self, key: &str, range: Option<Range<u64>>) -> Result<Bytes> {
        let mut request = self.client.get_object().bucket(&self.name).key(key);
        if let Some(range) = &range {
            request = request.range(range_header(range));
        }

        let response = request
            .send()
            .await
            .with_context(|_| error::GetObjectSnafu {
                bucket: self.name.clone(),
                key: key.to_string(),
            })?;

        let data = response
            .body
            .collect()
            .await
            .with_context(|_| error::ReadObjectBodySnafu {
                bucket: self.name.clone(),
                key: key.to_string(),
            })?;

        Ok(data.into_bytes())
    }

    async fn put_object(&self, key: &str, data: Bytes, options: &UploadOptions) -> Result<String> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.name)
            .key(key)
            .body(ByteStream::from(data));
        if let Some(tagging) = &options.tagging {
            request = request.tagging(tagging);
        }
        if let Some(storage_class) = &options.storage_class {
            request = request.storage_class(StorageClass::from(storage_class.as_str()));
        }

        let response = request
            .send()
            .await
            .with_context(|_| error::PutObjectSnafu {
                bucket: self.name.clone(),
                key: key.to_string(),
            })?;

        Ok(response.e_tag().unwrap_or_default().to_string())
    }

    async fn create_multipart_upload(&self, key: &str, options: &UploadOptions) -> Result<String> {
        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(&self.name)
            .key(key);
        if let Some(tagging) = &options.tagging {
            request = request.tagging(tagging);
        }
        if let Some(storage_class) = &options.storage_class {
            request = request.storage_class(StorageClass::from(storage_class.as_str()));
        }

        let response =
            request
                .send()
                .await
                .with_context(|_| error::CreateMultipartUploadSnafu {
                    bucket: self.name.clone(),
                    key: key.to_string(),
                })?;

        response
            .upload_id()
            .map(|id| id.to_string())
            .ok_or_else(|| {
                error::IncompleteResponseSnafu {
                    bucket: self.name.clone(),
                    key: key.to_string(),
                }
                .build()
            })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<String> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.name)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|_| error::UploadPartSnafu {
                bucket: self.name.clone(),
                key: key.to_string(),
                part_number,
            })?;

        Ok(response.e_tag().unwrap_or_default().to_string())
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
        let mut request = self
            .client
            .upload_part_copy()
            .bucket(&self.name)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .copy_source(copy_source(source_bucket, source_key));
        if let Some(range) = &range {
            request = request.copy_source_range(range_header(range));
        }

        let response = request.send().await.with_context(|_| {
            error::UploadPartCopySnafu {
                bucket: self.name.clone(),
                key: key.to_string(),
                part_number,
                source_bucket: source_bucket.to_string(),
                source_key: source_key.to_string(),
            }
        })?;

        response
            .copy_part_result()
            .and_then(|result| result.e_tag())
            .map(|etag| etag.to_string())
            .ok_or_else(|| {
                error::IncompleteResponseSnafu {
                    bucket: self.name.clone(),
                    key: key.to_string(),
                }
                .build()
            })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<String> {
        let parts = parts
            .into_iter()
            .map(|part| {
                S3CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.etag)
                    .build()
            })
            .collect::<Vec<_>>();

        let response = self
            .client
            .complete_multipart_upload()
            .bucket(&self.name)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .with_context(|_| error::CompleteMultipartUploadSnafu {
                bucket: self.name.clone(),
                key: key.to_string(),
            })?;

        Ok(response.e_tag().unwrap_or_default().to_string())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.name)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .with_context(|_| error::AbortMultipartUploadSnafu {
                bucket: self.name.clone(),
                key: key.to_string(),
            })?;

        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.name)
            .key(key)
            .send()
            .await
            .with_context(|_| error::DeleteObjectSnafu {
                bucket: self.name.clone(),
                key: key.to_string(),
            })?;

        Ok(())
    }
}
