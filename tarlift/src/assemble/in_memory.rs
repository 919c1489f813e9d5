//! The download-and-assemble path: payloads are fetched and concatenated with their synthesized
//! headers in memory, one buffer per multipart part.
//!
//! This costs payload bandwidth but only one GET per object, which beats a part-copy round trip
//! when the objects are tiny, and it is the only path for archives below the minimum multipart
//! part size (a single PutObject carries those).
use super::AssembledArchive;
use crate::create::CreateProgressCallback;
use crate::objstore::{Bucket, CompletedPart, ObjectStorage, UploadOptions};
use crate::plan::{ArchivePlan, ObjectRef, PART_SIZE_MIN};
use crate::{error, plan, Result};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};
use snafu::prelude::*;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

pub(crate) struct InMemoryAssembler {
    pub store: Arc<dyn ObjectStorage>,
    pub dest_bucket: Box<dyn Bucket>,
    pub dest_key: String,
    pub options: UploadOptions,
    pub target_part_size: u64,
    pub max_concurrent_requests: usize,
    pub cancel: CancellationToken,
    pub semaphore: Arc<Semaphore>,
    pub progress: Arc<dyn CreateProgressCallback>,
}

impl InMemoryAssembler {
    #[instrument(skip(self, archive_plan), fields(bucket = self.dest_bucket.name(), key = %self.dest_key))]
    pub async fn assemble(&self, archive_plan: &ArchivePlan) -> Result<AssembledArchive> {
        // Below the minimum part size multipart is off the table; the whole archive goes up as
        // one object.
        if archive_plan.total_size() < PART_SIZE_MIN {
            debug!(
                size = archive_plan.total_size(),
                "Archive fits below the minimum part size; writing it with a single PutObject"
            );

            let entries: Vec<ObjectRef> = archive_plan.entries().cloned().collect();
            let data = self.materialize(&entries).await?;
            let etag = self
                .dest_bucket
                .put_object(&self.dest_key, data, &self.options)
                .await?;

            return Ok(AssembledArchive {
                size: archive_plan.total_size(),
                etag,
            });
        }

        let ceiling = plan::group_ceiling(self.target_part_size);
        let groups = archive_plan.split_into_groups(ceiling)?;

        debug!(
            total_size = archive_plan.total_size(),
            groups = groups.len(),
            "Assembling archive from downloaded payloads"
        );

        let upload_id = self
            .dest_bucket
            .create_multipart_upload(&self.dest_key, &self.options)
            .await?;

        let part_futs = groups.into_iter().enumerate().map(|(index, group)| {
            let part_number = index as i32 + 1;
            let upload_id = upload_id.as_str();
            async move {
                ensure!(!self.cancel.is_cancelled(), error::CanceledSnafu);

                let data = self.materialize(&group.entries).await?;
                debug_assert_eq!(data.len() as u64, group.size);

                let etag = self
                    .dest_bucket
                    .upload_part(&self.dest_key, upload_id, part_number, data)
                    .await?;

                self.progress.part_uploaded(part_number, group.size);

                Ok(CompletedPart { part_number, etag })
            }
        });

        // Each buffered group costs up to the part ceiling in memory, so the request bound also
        // bounds peak memory.
        let result: Result<Vec<CompletedPart>> = futures::stream::iter(part_futs)
            .buffer_unordered(self.max_concurrent_requests)
            .try_collect()
            .await;

        let result = match result {
            Ok(mut parts) => {
                parts.sort_unstable_by_key(|part| part.part_number);
                self.dest_bucket
                    .complete_multipart_upload(&self.dest_key, &upload_id, parts)
                    .await
            }
            Err(error) => Err(error),
        };

        match result {
            Ok(etag) => Ok(AssembledArchive {
                size: archive_plan.total_size(),
                etag,
            }),
            Err(error) => {
                let _ = self
                    .dest_bucket
                    .abort_multipart_upload(&self.dest_key, &upload_id)
                    .await;
                Err(error)
            }
        }
    }

    /// Concatenate a run of plan entries into one buffer, downloading the payloads.
    async fn materialize(&self, entries: &[ObjectRef]) -> Result<Bytes> {
        let total: u64 = entries.iter().map(|entry| entry.size).sum();
        let mut data = BytesMut::with_capacity(total as usize);

        for entry in entries {
            match &entry.inline {
                Some(inline) => data.extend_from_slice(inline),
                None => {
                    let payload = {
                        let _permit = self.semaphore.acquire().await.expect("semaphore closed");
                        ensure!(!self.cancel.is_cancelled(), error::CanceledSnafu);

                        self.store
                            .bucket_handle(&entry.bucket)
                            .get_object(&entry.key, None)
                            .await?
                    };

                    // a source object resized since listing would silently corrupt the layout
                    ensure!(
                        payload.len() as u64 == entry.size,
                        error::SourceSizeChangedSnafu {
                            bucket: entry.bucket.clone(),
                            key: entry.key.clone(),
                            expected: entry.size,
                            actual: payload.len() as u64,
                        }
                    );

                    self.progress
                        .payload_downloaded(&entry.bucket, &entry.key, entry.size);
                    data.extend_from_slice(&payload);
                }
            }
        }

        Ok(data.freeze())
    }
}
