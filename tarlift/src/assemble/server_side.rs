//! The backend-mode assembler: composes the archive entirely out of server-side operations, so
//! payload bytes never transit the machine running the tool.
//!
//! The store's minimum-part-size rule is the whole difficulty: a tar header is 512 bytes and can
//! never stand as a non-terminal part on its own.  Every group of adjacent plan entries is
//! therefore staged as a temporary object whose upload starts with a minimum-part-size zero pad;
//! behind that pad, the short header parts and the payload part-copies are all acceptable.  The
//! final archive upload then copies each staged group back out with a range that starts past the
//! pad, discarding it, and deletes the staging objects once the archive is complete.
use super::{copy_ranges, AssembledArchive};
use crate::create::CreateProgressCallback;
use crate::objstore::{Bucket, CompletedPart, UploadOptions};
use crate::plan::{ArchivePlan, PlanGroup, MAX_PART_COUNT, PART_SIZE_MIN};
use crate::{error, plan, tar, Result};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};
use rand::prelude::*;
use snafu::prelude::*;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

pub(crate) struct ServerSideAssembler {
    pub dest_bucket: Box<dyn Bucket>,
    pub dest_key: String,
    pub options: UploadOptions,
    pub target_part_size: u64,
    pub max_concurrent_requests: usize,
    pub cancel: CancellationToken,
    pub semaphore: Arc<Semaphore>,
    pub progress: Arc<dyn CreateProgressCallback>,
}

/// One part of a staging upload, in part-number order.  Adjacent inline plan entries (padding,
/// headers, the trailer) coalesce into a single part; each payload is one part copy.
enum StagePart {
    Inline(Bytes),
    Copy { bucket: String, key: String, len: u64 },
}

/// One part of the final archive upload: a ranged copy out of a staged group.
struct OuterPart {
    part_number: i32,
    group_index: usize,
    range: Range<u64>,
}

impl ServerSideAssembler {
    #[instrument(skip(self, archive_plan), fields(bucket = self.dest_bucket.name(), key = %self.dest_key))]
    pub async fn assemble(&self, archive_plan: &ArchivePlan) -> Result<AssembledArchive> {
        ensure!(
            archive_plan.total_size() >= PART_SIZE_MIN,
            error::ArchiveTooSmallSnafu {
                size: archive_plan.total_size()
            }
        );

        let ceiling = plan::group_ceiling(self.target_part_size);
        let groups = archive_plan.split_into_groups(ceiling)?;

        // Lay out the staging uploads before any request is made, so part-budget problems fail
        // the run while it is still free of side effects.
        let stage_parts: Vec<Vec<StagePart>> = groups.iter().map(Self::stage_parts).collect();
        for parts in &stage_parts {
            ensure!(
                parts.len() <= MAX_PART_COUNT,
                error::PartBudgetExceededSnafu { parts: parts.len() }
            );
        }

        // Outer part numbers are pre-assigned from plan order; completion order never affects
        // the final byte layout.  A staged group longer than the maximum copyable range becomes
        // two adjacent parts.
        let mut outer_parts = Vec::with_capacity(groups.len());
        let mut next_part_number = 1i32;
        for (group_index, group) in groups.iter().enumerate() {
            let staged_end = PART_SIZE_MIN + group.size;
            for range in copy_ranges(PART_SIZE_MIN..staged_end) {
                outer_parts.push(OuterPart {
                    part_number: next_part_number,
                    group_index,
                    range,
                });
                next_part_number += 1;
            }
        }
        ensure!(
            outer_parts.len() <= MAX_PART_COUNT,
            error::PartBudgetExceededSnafu {
                parts: outer_parts.len()
            }
        );

        let staging_keys: Vec<String> = {
            // enough entropy that concurrent runs against the same destination never collide
            let run_id: u64 = rand::thread_rng().gen();
            (0..groups.len())
                .map(|index| {
                    format!("{}.staging/{:016x}/group-{:05}", self.dest_key, run_id, index)
                })
                .collect()
        };

        debug!(
            total_size = archive_plan.total_size(),
            groups = groups.len(),
            parts = outer_parts.len(),
            "Assembling archive from staged groups"
        );

        let upload_id = self
            .dest_bucket
            .create_multipart_upload(&self.dest_key, &self.options)
            .await?;

        let result = self
            .upload_archive(&upload_id, groups, stage_parts, &staging_keys, outer_parts)
            .await;

        match result {
            Ok(archive) => {
                self.sweep_staging(&staging_keys).await;
                Ok(archive)
            }
            Err(error) => {
                // The aborted upload's parts and any leftover staging objects are reclaimable by
                // a lifecycle policy even if these cleanup requests fail too.
                if let Err(abort_error) = self
                    .dest_bucket
                    .abort_multipart_upload(&self.dest_key, &upload_id)
                    .await
                {
                    warn!(?abort_error, "failed to abort the archive upload");
                }
                self.sweep_staging(&staging_keys).await;
                Err(error)
            }
        }
    }

    async fn upload_archive(
        &self,
        upload_id: &str,
        groups: Vec<PlanGroup>,
        stage_parts: Vec<Vec<StagePart>>,
        staging_keys: &[String],
        outer_parts: Vec<OuterPart>,
    ) -> Result<AssembledArchive> {
        let total_size: u64 = groups.iter().map(|group| group.size).sum();

        // Stage every group, in parallel.  No outer part copy is issued until all staging
        // objects exist in full.
        let staging_futs = groups
            .into_iter()
            .zip(stage_parts)
            .enumerate()
            .map(|(index, (group, parts))| {
                let staging_key = &staging_keys[index];
                async move {
                    self.stage_group(index, staging_key, &group, parts).await
                }
            });

        futures::stream::iter(staging_futs)
            .buffer_unordered(self.max_concurrent_requests)
            .try_collect::<Vec<()>>()
            .await?;

        debug!("All groups staged; concatenating into the final archive");

        let copy_futs = outer_parts.into_iter().map(|part| {
            let staging_key = &staging_keys[part.group_index];
            async move {
                let _permit = self.semaphore.acquire().await.expect("semaphore closed");
                ensure!(!self.cancel.is_cancelled(), error::CanceledSnafu);

                let len = part.range.end - part.range.start;
                let etag = self
                    .dest_bucket
                    .upload_part_copy(
                        &self.dest_key,
                        upload_id,
                        part.part_number,
                        self.dest_bucket.name(),
                        staging_key,
                        Some(part.range),
                    )
                    .await?;

                self.progress.part_uploaded(part.part_number, len);

                Ok(CompletedPart {
                    part_number: part.part_number,
                    etag,
                })
            }
        });

        let mut parts: Vec<CompletedPart> = futures::stream::iter(copy_futs)
            .buffer_unordered(self.max_concurrent_requests)
            .try_collect()
            .await?;
        parts.sort_unstable_by_key(|part| part.part_number);

        let etag = self
            .dest_bucket
            .complete_multipart_upload(&self.dest_key, upload_id, parts)
            .await?;

        Ok(AssembledArchive {
            size: total_size,
            etag,
        })
    }

    /// Break a group into staging-upload parts: the leading zero pad, then coalesced inline
    /// runs interleaved with payload copies.
    fn stage_parts(group: &PlanGroup) -> Vec<StagePart> {
        let mut parts = vec![StagePart::Inline(tar::zeroes(PART_SIZE_MIN as usize))];
        let mut inline_run = BytesMut::new();

        for entry in &group.entries {
            match &entry.inline {
                Some(data) => inline_run.extend_from_slice(data),
                None => {
                    if !inline_run.is_empty() {
                        parts.push(StagePart::Inline(inline_run.split().freeze()));
                    }
                    parts.push(StagePart::Copy {
                        bucket: entry.bucket.clone(),
                        key: entry.key.clone(),
                        len: entry.size,
                    });
                }
            }
        }
        if !inline_run.is_empty() {
            parts.push(StagePart::Inline(inline_run.freeze()));
        }

        parts
    }

    /// Build one staging object: a nested multipart upload whose first part is the zero pad,
    /// with the group's header bytes and payload copies behind it.
    #[instrument(skip(self, group, parts), fields(size = group.size))]
    async fn stage_group(
        &self,
        index: usize,
        staging_key: &str,
        group: &PlanGroup,
        parts: Vec<StagePart>,
    ) -> Result<()> {
        ensure!(!self.cancel.is_cancelled(), error::CanceledSnafu);

        let upload_id = self
            .dest_bucket
            .create_multipart_upload(staging_key, &UploadOptions::default())
            .await?;

        let part_futs = parts.into_iter().enumerate().map(|(offset, part)| {
            let part_number = offset as i32 + 1;
            let upload_id = upload_id.as_str();
            async move {
                let _permit = self.semaphore.acquire().await.expect("semaphore closed");
                ensure!(!self.cancel.is_cancelled(), error::CanceledSnafu);

                let etag = match part {
                    StagePart::Inline(data) => {
                        self.dest_bucket
                            .upload_part(staging_key, upload_id, part_number, data)
                            .await?
                    }
                    StagePart::Copy { bucket, key, len } => {
                        debug!(source_bucket = %bucket, source_key = %key, len, "copying payload into staging object");
                        self.dest_bucket
                            .upload_part_copy(
                                staging_key,
                                upload_id,
                                part_number,
                                &bucket,
                                &key,
                                None,
                            )
                            .await?
                    }
                };

                Ok(CompletedPart { part_number, etag })
            }
        });

        let result: Result<Vec<CompletedPart>> = futures::stream::iter(part_futs)
            .buffer_unordered(self.max_concurrent_requests)
            .try_collect()
            .await;

        let result = match result {
            Ok(mut parts) => {
                parts.sort_unstable_by_key(|part| part.part_number);
                self.dest_bucket
                    .complete_multipart_upload(staging_key, &upload_id, parts)
                    .await
                    .map(|_| ())
            }
            Err(error) => Err(error),
        };

        if let Err(error) = result {
            if let Err(abort_error) = self
                .dest_bucket
                .abort_multipart_upload(staging_key, &upload_id)
                .await
            {
                warn!(?abort_error, staging_key, "failed to abort a staging upload");
            }
            return Err(error);
        }

        self.progress.group_staged(index, group.size);

        Ok(())
    }

    /// Best-effort deletion of the staging objects; anything that survives is left for the
    /// bucket's lifecycle policy.
    async fn sweep_staging(&self, staging_keys: &[String]) {
        let delete_futs = staging_keys.iter().map(|key| async move {
            let _permit = self.semaphore.acquire().await.expect("semaphore closed");
            if let Err(error) = self.dest_bucket.delete_object(key).await {
                warn!(?error, key = %key, "failed to delete a staging object");
                false
            } else {
                true
            }
        });

        let deleted = futures::stream::iter(delete_futs)
            .buffer_unordered(self.max_concurrent_requests)
            .filter(|deleted| futures::future::ready(*deleted))
            .count()
            .await;

        self.progress.staging_cleaned(deleted);
    }
}
