//! Implementation of the extract operation, which restores members of an archive to object
//! storage without the payload bytes transiting this machine.
//!
//! Extraction is driven entirely by a table of contents: an external one supplied by the
//! caller, the archive's embedded one, or one rebuilt by scanning the archive's headers with
//! ranged reads.  Every selected member then becomes one object at the target prefix, produced
//! by a server-side ranged copy out of the archive object.  Member names are written verbatim;
//! no name transform is applied on the way out.
use crate::objstore::{Bucket, CompletedPart, ObjectStorage, ObjectStorageFactory, UploadOptions};
use crate::toc::{self, TocEntry};
use crate::{assemble, error, Config, Result};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use snafu::prelude::*;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use url::Url;

/// A trait which callers can implement to get detailed progress updates as the extract
/// operation is progressing.
#[allow(unused_variables)]
pub trait ExtractProgressCallback: Sync + Send {
    /// The table of contents is loaded and the members to extract are known.
    fn extract_starting(&self, objects: usize, total_bytes: u64) {}

    /// One member was copied out into its own object.
    fn object_extracted(&self, name: &str, size: u64) {}

    /// Every selected member has been extracted.
    fn extract_finished(&self, objects: usize, total_bytes: u64) {}
}

/// A parsed filter which selects a subset of the archive's members by name.
///
/// Use the [`FromStr`] impl to parse one: a string ending in `/` selects everything under that
/// prefix, anything else selects the member with exactly that name.
#[derive(Clone, Debug)]
pub enum ExtractFilter {
    Object { key: String },
    Prefix { prefix: String },
}

impl FromStr for ExtractFilter {
    type Err = crate::TarLiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ensure!(
            !s.is_empty() && s != "/",
            error::InvalidFilterSnafu {
                filter: s.to_string()
            }
        );

        if s.ends_with('/') {
            Ok(Self::Prefix {
                prefix: s.to_string(),
            })
        } else {
            Ok(Self::Object { key: s.to_string() })
        }
    }
}

impl ExtractFilter {
    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Object { key } => name == key,
            Self::Prefix { prefix } => name.starts_with(prefix.as_str()),
        }
    }
}

pub struct ExtractArchiveJobBuilder {
    config: Config,
    store: Option<Arc<dyn ObjectStorage>>,
    archive: Url,
    target: Url,
    filters: Vec<ExtractFilter>,
    external_toc: Option<String>,
}

impl std::fmt::Debug for ExtractArchiveJobBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractArchiveJobBuilder")
            .field("archive", &self.archive)
            .field("target", &self.target)
            .field("filters", &self.filters)
            .finish()
    }
}

impl ExtractArchiveJobBuilder {
    pub fn new(config: Config, archive: Url, target: Url) -> Self {
        Self {
            config,
            store: None,
            archive,
            target,
            filters: Vec::new(),
            external_toc: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_store(
        config: Config,
        archive: Url,
        target: Url,
        store: Arc<dyn ObjectStorage>,
    ) -> Self {
        let mut builder = Self::new(config, archive, target);
        builder.store = Some(store);
        builder
    }

    /// Extract only members selected by this filter (repeatable).  With no filters, everything
    /// is extracted.
    pub fn add_filter(&mut self, filter: impl AsRef<str>) -> Result<()> {
        self.filters.push(filter.as_ref().parse()?);
        Ok(())
    }

    /// Use a caller-supplied table of contents (the exchange text form) instead of the
    /// archive's embedded TOC or a header scan.
    pub fn external_toc(&mut self, toc_text: impl Into<String>) {
        self.external_toc = Some(toc_text.into());
    }

    /// Locate the table of contents and construct the job (but don't run it yet).
    pub async fn build(mut self) -> Result<ExtractArchiveJob> {
        let store = match &self.store {
            Some(store) => store.clone(),
            None => {
                let store =
                    ObjectStorageFactory::from_url(self.config.clone(), &self.archive).await?;
                self.store = Some(store.clone());
                store
            }
        };

        let (archive_bucket, archive_key) = store.parse_url(&self.archive).await?;
        let archive_key = archive_key.ok_or_else(|| {
            error::ArchiveUrlInvalidSnafu {
                url: self.archive.clone(),
            }
            .build()
        })?;

        let (target_bucket, target_prefix) = store.parse_url(&self.target).await?;
        let target_prefix = target_prefix.unwrap_or_default();

        let archive_size = archive_bucket.head_object(&archive_key).await?.size;

        // TOC precedence: caller-supplied, then embedded, then a full header scan.
        let entries = match &self.external_toc {
            Some(text) => toc::parse_toc_text(text)?,
            None => {
                match toc::read_embedded_toc(archive_bucket.as_ref(), &archive_key, archive_size)
                    .await?
                {
                    Some(entries) => entries,
                    None => {
                        debug!("Archive has no embedded table of contents; scanning headers");
                        toc::scan_archive(archive_bucket.as_ref(), &archive_key, archive_size)
                            .await?
                    }
                }
            }
        };

        let entries: Vec<TocEntry> = if self.filters.is_empty() {
            entries
        } else {
            entries
                .into_iter()
                .filter(|entry| self.filters.iter().any(|filter| filter.matches(&entry.name)))
                .collect()
        };

        Ok(ExtractArchiveJob {
            config: self.config,
            archive_bucket,
            archive_key,
            archive_size,
            target_bucket,
            target_prefix,
            entries,
        })
    }
}

pub struct ExtractArchiveJob {
    config: Config,
    archive_bucket: Box<dyn Bucket>,
    archive_key: String,
    archive_size: u64,
    target_bucket: Box<dyn Bucket>,
    target_prefix: String,
    entries: Vec<TocEntry>,
}

impl std::fmt::Debug for ExtractArchiveJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractArchiveJob")
            .field("archive_bucket", &self.archive_bucket.name())
            .field("archive_key", &self.archive_key)
            .field("target_bucket", &self.target_bucket.name())
            .field("target_prefix", &self.target_prefix)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ExtractArchiveJob {
    /// Number of members that will be extracted, after filters.
    pub fn total_objects(&self) -> usize {
        self.entries.len()
    }

    /// Number of payload bytes that will be extracted, after filters.
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|entry| entry.length).sum()
    }

    /// Alternative to [`Self::run`] for callers that do not care about progress information.
    pub async fn run_without_progress(self, abort: impl Future<Output = ()>) -> Result<()> {
        struct NoProgress {}
        impl ExtractProgressCallback for NoProgress {}

        self.run(abort, NoProgress {}).await
    }

    /// Run the job, returning only when every selected member has been extracted (or the job
    /// failed or was aborted).
    pub async fn run<Abort, Progress>(self, abort: Abort, progress: Progress) -> Result<()>
    where
        Abort: Future<Output = ()>,
        Progress: ExtractProgressCallback + 'static,
    {
        let span = info_span!("extract_archive",
            archive_bucket = self.archive_bucket.name(),
            archive_key = %self.archive_key,
            target_bucket = self.target_bucket.name(),
            target_prefix = %self.target_prefix);

        async move {
            let progress: Arc<dyn ExtractProgressCallback> = Arc::new(progress);

            let total_objects = self.total_objects();
            let total_bytes = self.total_bytes();
            progress.extract_starting(total_objects, total_bytes);

            info!(total_objects, total_bytes, "Starting extract archive job");

            let cancel = CancellationToken::new();
            let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_requests));

            let work = async {
                let extract_futs = self.entries.iter().map(|entry| {
                    self.extract_entry(entry, &cancel, &semaphore, &progress)
                });

                futures::stream::iter(extract_futs)
                    .buffer_unordered(self.config.max_concurrent_requests)
                    .try_collect::<Vec<()>>()
                    .await?;

                progress.extract_finished(total_objects, total_bytes);
                info!("Finished extract job");

                Ok(())
            };

            let watch = async {
                abort.await;
                cancel.cancel();
                futures::future::pending::<()>().await
            };

            tokio::select! {
                biased;
                _ = watch => unreachable!("the abort watcher never completes"),
                result = work => result,
            }
        }
        .instrument(span)
        .await
    }

    /// Copy one member's payload range out of the archive into its own object.
    async fn extract_entry(
        &self,
        entry: &TocEntry,
        cancel: &CancellationToken,
        semaphore: &Semaphore,
        progress: &Arc<dyn ExtractProgressCallback>,
    ) -> Result<()> {
        ensure!(
            entry.offset + entry.length <= self.archive_size,
            error::TruncatedArchiveSnafu {
                offset: entry.offset
            }
        );

        let key = format!("{}{}", self.target_prefix, entry.name);

        // An empty member has no range to copy; write the empty object directly.
        if entry.length == 0 {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            ensure!(!cancel.is_cancelled(), error::CanceledSnafu);
            self.target_bucket
                .put_object(&key, Bytes::new(), &UploadOptions::default())
                .await?;
            progress.object_extracted(&entry.name, 0);
            return Ok(());
        }

        let upload_id = {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            ensure!(!cancel.is_cancelled(), error::CanceledSnafu);
            self.target_bucket
                .create_multipart_upload(&key, &UploadOptions::default())
                .await?
        };

        let result = self
            .copy_entry_parts(entry, &key, &upload_id, cancel, semaphore)
            .await;

        match result {
            Ok(()) => {
                debug!(name = %entry.name, len = entry.length, %key, "Extracted archive member");
                progress.object_extracted(&entry.name, entry.length);
                Ok(())
            }
            Err(error) => {
                let _ = self
                    .target_bucket
                    .abort_multipart_upload(&key, &upload_id)
                    .await;
                Err(error)
            }
        }
    }

    async fn copy_entry_parts(
        &self,
        entry: &TocEntry,
        key: &str,
        upload_id: &str,
        cancel: &CancellationToken,
        semaphore: &Semaphore,
    ) -> Result<()> {
        // Archives this tool creates bound members by the maximum copyable range, but a scanned
        // foreign archive can hold bigger ones; they just take more than one part.
        let ranges = assemble::copy_ranges(entry.offset..entry.offset + entry.length);

        let part_futs = ranges.into_iter().enumerate().map(|(index, range)| {
            let part_number = index as i32 + 1;
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                ensure!(!cancel.is_cancelled(), error::CanceledSnafu);

                let etag = self
                    .target_bucket
                    .upload_part_copy(
                        key,
                        upload_id,
                        part_number,
                        self.archive_bucket.name(),
                        &self.archive_key,
                        Some(range),
                    )
                    .await?;

                Ok(CompletedPart { part_number, etag })
            }
        });

        let mut parts: Vec<CompletedPart> = futures::stream::iter(part_futs)
            .buffer_unordered(self.config.max_concurrent_requests)
            .try_collect()
            .await?;
        parts.sort_unstable_by_key(|part| part.part_number);

        self.target_bucket
            .complete_multipart_upload(key, upload_id, parts)
            .await?;

        Ok(())
    }
}

/// Load an archive's table of contents: the embedded one when present, otherwise rebuilt by
/// scanning the archive's tar headers with ranged reads.
///
/// This is what `list` and TOC-generation front-ends call; it never reads payload bytes.
pub async fn read_archive_toc(config: Config, archive: &Url) -> Result<Vec<TocEntry>> {
    let store = ObjectStorageFactory::from_url(config, archive).await?;
    let (bucket, key) = store.parse_url(archive).await?;
    let key = key.ok_or_else(|| {
        error::ArchiveUrlInvalidSnafu {
            url: archive.clone(),
        }
        .build()
    })?;

    let archive_size = bucket.head_object(&key).await?.size;

    match toc::read_embedded_toc(bucket.as_ref(), &key, archive_size).await? {
        Some(entries) => Ok(entries),
        None => toc::scan_archive(bucket.as_ref(), &key, archive_size).await,
    }
}
