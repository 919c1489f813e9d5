//! Implementation of the operation which creates a tar archive from objects already stored in
//! object storage.
//!
//! The caller starts with [`CreateArchiveJobBuilder`], adds inputs (prefix URLs and/or
//! manifests) and options, then calls [`CreateArchiveJobBuilder::build`] to resolve the input
//! set and obtain a [`CreateArchiveJob`].  A call to [`CreateArchiveJob::run`] performs the job;
//! progress is reported through a caller-provided [`CreateProgressCallback`].
use crate::assemble::{in_memory::InMemoryAssembler, server_side::ServerSideAssembler};
use crate::manifest::{self, ExcludePatterns, ManifestLocation, NameTransforms};
use crate::objstore::{Bucket, ObjectStorage, ObjectStorageFactory, UploadOptions};
use crate::plan::{ArchivePlan, ObjectRef, PlanOptions, PART_SIZE_MIN};
use crate::{error, Config, Result};
use futures::{StreamExt, TryStreamExt};
use snafu::prelude::*;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use url::Url;

/// A trait which callers can implement to get detailed progress updates as archive creation is
/// progressing.
#[allow(unused_variables)]
pub trait CreateProgressCallback: Sync + Send {
    /// The input sources have been expanded into the final object set.
    fn objects_resolved(&self, count: usize, total_bytes: u64) {}

    /// A payload was downloaded (in-memory assembly only).
    fn payload_downloaded(&self, bucket: &str, key: &str, size: u64) {}

    /// A group of adjacent members was staged as a temporary object (server-side assembly
    /// only).
    fn group_staged(&self, index: usize, size: u64) {}

    /// One part of the destination archive was uploaded or copied into place.
    fn part_uploaded(&self, part_number: i32, size: u64) {}

    /// Staging objects were deleted after the archive completed or failed.
    fn staging_cleaned(&self, count: usize) {}

    /// The destination archive object exists in full.
    fn archive_completed(&self, size: u64, etag: &str) {}
}

pub struct CreateArchiveJobBuilder {
    config: Config,
    target: Url,
    store: Option<Arc<dyn ObjectStorage>>,
    inputs: Vec<Url>,
    manifests: Vec<ManifestLocation>,
    exclude: Option<ExcludePatterns>,
    transforms: Option<NameTransforms>,
    embed_toc: bool,
    tags: Vec<(String, String)>,
    storage_class: Option<String>,
}

impl std::fmt::Debug for CreateArchiveJobBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateArchiveJobBuilder")
            .field("target", &self.target)
            .field("inputs", &self.inputs)
            .field("manifests", &self.manifests)
            .finish()
    }
}

impl CreateArchiveJobBuilder {
    /// Initialize a new create archive job builder, but don't yet start the job.
    ///
    /// `target` is the `s3://bucket/key` URL the archive will be written to.
    pub fn new(config: Config, target: Url) -> Self {
        Self {
            config,
            target,
            store: None,
            inputs: Vec::new(),
            manifests: Vec::new(),
            exclude: None,
            transforms: None,
            embed_toc: false,
            tags: Vec::new(),
            storage_class: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_store(
        config: Config,
        target: Url,
        store: Arc<dyn ObjectStorage>,
    ) -> Self {
        let mut builder = Self::new(config, target);
        builder.store = Some(store);
        builder
    }

    async fn store(&mut self) -> Result<Arc<dyn ObjectStorage>> {
        if self.store.is_none() {
            self.store =
                Some(ObjectStorageFactory::from_url(self.config.clone(), &self.target).await?);
        }
        Ok(self.store.clone().unwrap())
    }

    /// Add one input URL to the job, validating bucket access as part of the process.
    ///
    /// The URL may name a whole bucket (`s3://bucket/`), a prefix (`s3://bucket/prefix/`), or a
    /// single object.
    pub async fn add_input(&mut self, input: &Url) -> Result<()> {
        debug!(url = %input, "Adding archive input");

        ensure!(
            input.scheme() == "s3",
            error::UnsupportedObjectStorageSnafu { url: input.clone() }
        );

        let store = self.store().await?;
        store.extract_bucket_from_url(input).await?;

        self.inputs.push(input.clone());
        Ok(())
    }

    /// Add a delimited-text manifest of objects to include, local or remote.
    pub fn add_manifest(&mut self, manifest: ManifestLocation) {
        self.manifests.push(manifest);
    }

    /// Exclude objects whose keys match this pattern: `|`-separated glob alternatives, where `*`
    /// matches anything and `?` one character.
    pub fn exclude(&mut self, pattern: &str) -> Result<()> {
        self.exclude = Some(ExcludePatterns::parse(pattern)?);
        Ok(())
    }

    /// Rewrite member names with `;`-separated `s|pattern|replacement|flags` substitutions.
    /// Source keys are unaffected; only the names recorded in the archive change.
    pub fn name_transform(&mut self, expressions: &str) -> Result<()> {
        self.transforms = Some(NameTransforms::parse(expressions)?);
        Ok(())
    }

    /// Embed a table of contents as the archive's first member, enabling random-access
    /// extraction without scanning.
    pub fn embed_toc(&mut self, embed: bool) {
        self.embed_toc = embed;
    }

    /// Tag the destination archive object.
    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.push((key.into(), value.into()));
    }

    /// Storage class for the destination archive object.
    pub fn storage_class(&mut self, class: impl Into<String>) {
        self.storage_class = Some(class.into());
    }

    /// Resolve the inputs into the concrete object set and construct the job (but don't run it
    /// yet).
    ///
    /// This can be a long-running operation when a prefix holds a very large number of objects.
    pub async fn build(mut self) -> Result<CreateArchiveJob> {
        let store = self.store().await?;

        let (dest_bucket, dest_key) = store.parse_url(&self.target).await?;
        let dest_key = dest_key.ok_or_else(|| {
            error::ArchiveUrlInvalidSnafu {
                url: self.target.clone(),
            }
            .build()
        })?;

        let mut objects = manifest::resolve_inputs(
            &store,
            &self.inputs,
            &self.manifests,
            self.exclude.as_ref(),
        )
        .await?;
        ensure!(!objects.is_empty(), error::NoInputObjectsSnafu);

        if self.config.preserve_metadata {
            objects = Self::fetch_metadata(&store, objects, &self.config).await?;
        }

        debug!(
            object_count = objects.len(),
            dest_key = %dest_key,
            "Resolved all archive inputs"
        );

        Ok(CreateArchiveJob {
            config: self.config,
            store,
            dest_bucket,
            dest_key,
            objects,
            transforms: self.transforms,
            embed_toc: self.embed_toc,
            options: UploadOptions {
                tagging: tags_to_query(&self.tags),
                storage_class: self.storage_class,
            },
        })
    }

    async fn fetch_metadata(
        store: &Arc<dyn ObjectStorage>,
        objects: Vec<ObjectRef>,
        config: &Config,
    ) -> Result<Vec<ObjectRef>> {
        let metadata_futs = objects.into_iter().map(|mut object| async move {
            let bucket = store.bucket_handle(&object.bucket);
            object.metadata = Some(bucket.head_object_metadata(&object.key).await?);
            Ok(object)
        });

        // buffered, not buffer_unordered: the object order is the archive order
        futures::stream::iter(metadata_futs)
            .buffered(config.max_concurrent_requests)
            .try_collect()
            .await
    }
}

/// `key=value&...` with both sides percent-encoded, as the store's tagging header wants it.
fn tags_to_query(tags: &[(String, String)]) -> Option<String> {
    fn encode(value: &str) -> String {
        let mut encoded = String::with_capacity(value.len());
        for byte in value.bytes() {
            match byte {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    encoded.push(byte as char)
                }
                other => encoded.push_str(&format!("%{:02X}", other)),
            }
        }
        encoded
    }

    if tags.is_empty() {
        return None;
    }

    Some(
        tags.iter()
            .map(|(key, value)| format!("{}={}", encode(key), encode(value)))
            .collect::<Vec<_>>()
            .join("&"),
    )
}

/// A job which will create a new tar archive from object store inputs.
pub struct CreateArchiveJob {
    config: Config,
    store: Arc<dyn ObjectStorage>,
    dest_bucket: Box<dyn Bucket>,
    dest_key: String,
    objects: Vec<ObjectRef>,
    transforms: Option<NameTransforms>,
    embed_toc: bool,
    options: UploadOptions,
}

impl std::fmt::Debug for CreateArchiveJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateArchiveJob")
            .field("dest_bucket", &self.dest_bucket.name())
            .field("dest_key", &self.dest_key)
            .field("objects", &self.objects.len())
            .finish()
    }
}

impl CreateArchiveJob {
    /// The total number of payload bytes to be archived.
    pub fn total_bytes(&self) -> u64 {
        self.objects.iter().map(|object| object.size).sum()
    }

    /// The total number of objects included in this archive.
    pub fn total_objects(&self) -> usize {
        self.objects.len()
    }

    /// Alternative to [`Self::run`] which doesn't require a [`CreateProgressCallback`]
    /// implementation, for callers that do not care about progress information.
    pub async fn run_without_progress(self, abort: impl Future<Output = ()>) -> Result<()> {
        // A dummy impl of the progress callback that doesn't do anything with any of the
        // progress updates
        struct NoProgress {}
        impl CreateProgressCallback for NoProgress {}

        self.run(abort, NoProgress {}).await
    }

    /// Run the job, returning only when the job has run to completion (or failed).
    ///
    /// If the `abort` future completes, the job is canceled: in-flight requests are abandoned,
    /// the destination upload is aborted, and the job returns a cancellation error.
    pub async fn run<Abort, Progress>(self, abort: Abort, progress: Progress) -> Result<()>
    where
        Abort: Future<Output = ()>,
        Progress: CreateProgressCallback + 'static,
    {
        let span = info_span!("create_archive",
            dest_bucket = self.dest_bucket.name(),
            dest_key = %self.dest_key);

        async move {
            let progress: Arc<dyn CreateProgressCallback> = Arc::new(progress);
            progress.objects_resolved(self.total_objects(), self.total_bytes());

            info!(
                objects = self.total_objects(),
                bytes = self.total_bytes(),
                "Starting create archive job"
            );

            let archive_plan = ArchivePlan::new(
                self.objects,
                PlanOptions {
                    header_format: self.config.header_format,
                    embed_toc: self.embed_toc,
                    preserve_metadata: self.config.preserve_metadata,
                    transforms: self.transforms.as_ref(),
                },
            )?;

            let cancel = CancellationToken::new();
            let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_requests));

            let work = async {
                // Archives below the minimum part size can't be assembled server-side at all,
                // and the caller can force the download path for corpora of tiny objects.
                let archive = if archive_plan.total_size() < PART_SIZE_MIN
                    || self.config.in_memory
                {
                    InMemoryAssembler {
                        store: self.store.clone(),
                        dest_bucket: self.dest_bucket.clone(),
                        dest_key: self.dest_key.clone(),
                        options: self.options.clone(),
                        target_part_size: self.config.target_part_size.get_bytes() as u64,
                        max_concurrent_requests: self.config.max_concurrent_requests,
                        cancel: cancel.clone(),
                        semaphore: semaphore.clone(),
                        progress: progress.clone(),
                    }
                    .assemble(&archive_plan)
                    .await?
                } else {
                    ServerSideAssembler {
                        dest_bucket: self.dest_bucket.clone(),
                        dest_key: self.dest_key.clone(),
                        options: self.options.clone(),
                        target_part_size: self.config.target_part_size.get_bytes() as u64,
                        max_concurrent_requests: self.config.max_concurrent_requests,
                        cancel: cancel.clone(),
                        semaphore: semaphore.clone(),
                        progress: progress.clone(),
                    }
                    .assemble(&archive_plan)
                    .await?
                };

                info!(size = archive.size, etag = %archive.etag, "Archive created");
                progress.archive_completed(archive.size, &archive.etag);

                Ok(())
            };

            // The abort future trips the cancellation token; the workers notice it between
            // requests and the assembler aborts its upload on the way out, so the work future
            // itself always runs to a conclusion.  The watcher is polled first so an
            // already-completed abort cancels before the first request goes out.
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objstore::memory::MemoryObjectStore;
    use crate::plan::{PART_SIZE_MAX, PART_SIZE_MIN};
    use crate::TarLiftError;
    use chrono::TimeZone;
    use rand::RngCore;

    const KIB: usize = 1024;
    const MIB: usize = 1024 * 1024;

    fn config() -> Config {
        Config::default()
    }

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut data);
        data
    }

    async fn build_job(
        store: &MemoryObjectStore,
        config: Config,
        inputs: &[&str],
        configure: impl FnOnce(&mut CreateArchiveJobBuilder),
    ) -> CreateArchiveJob {
        let storage: Arc<dyn ObjectStorage> = Arc::new(store.clone());
        let mut builder = CreateArchiveJobBuilder::with_store(
            config,
            "s3://dest/archive.tar".parse().unwrap(),
            storage,
        );
        for input in inputs {
            builder.add_input(&input.parse().unwrap()).await.unwrap();
        }
        configure(&mut builder);
        builder.build().await.unwrap()
    }

    async fn run_job(job: CreateArchiveJob) -> Result<()> {
        job.run_without_progress(futures::future::pending()).await
    }

    /// The reference layout: headers, payloads, and padding concatenated in plan order followed
    /// by the trailer, exactly what a local tar writer would produce for the same inputs.
    fn reference_archive(job_objects: &[(&str, Vec<u8>)]) -> Vec<u8> {
        // the in-process store stamps every object with this fixed timestamp
        let mtime = chrono::Utc.timestamp_opt(1_600_000_000, 0).unwrap();

        let mut expected = Vec::new();
        for (key, data) in job_objects {
            let header = crate::tar::member_header(
                key,
                data.len() as u64,
                &mtime,
                crate::tar::HeaderAttributes::default(),
                crate::config::HeaderFormat::Pax,
            )
            .unwrap();
            expected.extend_from_slice(&header);
            expected.extend_from_slice(data);
            expected.extend_from_slice(&crate::tar::zeroes(
                crate::tar::padding_after(data.len() as u64) as usize,
            ));
        }
        expected.extend_from_slice(&crate::tar::trailer());
        expected
    }

    #[tokio::test]
    async fn small_archive_is_a_single_put_object() {
        let store = MemoryObjectStore::new();
        let data = random_bytes(4 * MIB);
        store.insert_object("src", "one.bin", data.clone());

        let job = build_job(&store, config(), &["s3://src/one.bin"], |_| {}).await;
        run_job(job).await.unwrap();

        let archive = store.object("dest", "archive.tar").unwrap();
        // 4 MiB payload + one header block + the trailer
        assert_eq!(archive.len(), 4 * MIB + 512 + 1024);
        // no multipart upload happened at all
        assert!(store.part_sizes("dest", "archive.tar").is_none());
        assert_eq!(archive, reference_archive(&[("one.bin", data)]));
    }

    #[tokio::test]
    async fn both_assemblers_produce_identical_bytes() {
        tarlift_testing::logging::init();

        let objects: Vec<(String, Vec<u8>)> = vec![
            ("data/a-small.bin".to_string(), random_bytes(300 * KIB)),
            ("data/b-large.bin".to_string(), random_bytes(7 * MIB)),
            ("data/c-odd.bin".to_string(), random_bytes(1000)),
            ("data/d-exact.bin".to_string(), random_bytes(512 * KIB)),
        ];

        let mut archives = Vec::new();
        for in_memory in [false, true] {
            let store = MemoryObjectStore::new();
            for (key, data) in &objects {
                store.insert_object("src", key, data.clone());
            }

            let mut config = config();
            config.in_memory = in_memory;
            let job = build_job(&store, config, &["s3://src/data/"], |_| {}).await;
            run_job(job).await.unwrap();

            let archive = store.object("dest", "archive.tar").unwrap();
            assert_eq!(store.open_upload_count(), 0, "no upload leaked");
            archives.push(archive);
        }

        assert_eq!(archives[0], archives[1]);

        // and both match the reference concatenation (listing order is lexicographic)
        let expected = reference_archive(
            &objects
                .iter()
                .map(|(key, data)| (key.as_str(), data.clone()))
                .collect::<Vec<_>>(),
        );
        assert_eq!(archives[0], expected);

        // a real tar reader agrees about the contents
        let expected_contents: std::collections::HashMap<String, Vec<u8>> =
            objects.iter().cloned().collect();
        tarlift_testing::tar::validate_archive_contents(&archives[0], &expected_contents)
            .unwrap();
    }

    #[tokio::test]
    async fn server_side_assembly_leaves_no_staging_objects() {
        let store = MemoryObjectStore::new();
        store.insert_object("src", "big.bin", random_bytes(12 * MIB));

        let job = build_job(&store, config(), &["s3://src/big.bin"], |_| {}).await;
        run_job(job).await.unwrap();

        let keys = store.keys("dest");
        assert_eq!(keys, vec!["archive.tar"]);
        assert_eq!(store.open_upload_count(), 0);
    }

    #[tokio::test]
    async fn exactly_minimum_sized_member_archives_cleanly() {
        let store = MemoryObjectStore::new();
        let data = random_bytes(PART_SIZE_MIN as usize);
        store.insert_object("src", "five.bin", data.clone());

        let job = build_job(&store, config(), &["s3://src/five.bin"], |_| {}).await;
        run_job(job).await.unwrap();

        let archive = store.object("dest", "archive.tar").unwrap();
        // 5 MiB payload needs no padding: header + payload + trailer
        assert_eq!(archive.len() as u64, PART_SIZE_MIN + 512 + 1024);
        assert_eq!(
            archive,
            reference_archive(&[("five.bin", data)])
        );
    }

    #[tokio::test]
    async fn two_large_members_become_two_header_carrying_parts() {
        let store = MemoryObjectStore::new();
        store.insert_object("src", "a.bin", random_bytes(10 * MIB));
        store.insert_object("src", "b.bin", random_bytes(10 * MIB));

        let mut config = config();
        config.target_part_size = byte_unit::Byte::from_bytes(5 * 1024 * 1024);
        let job = build_job(&store, config, &["s3://src/"], |_| {}).await;
        run_job(job).await.unwrap();

        let archive = store.object("dest", "archive.tar").unwrap();
        assert_eq!(archive.len() as u64, 20 * MIB as u64 + 512 + 512 + 1024);

        // one part per member, each holding its own header
        let parts = store.part_sizes("dest", "archive.tar").unwrap();
        assert_eq!(
            parts,
            vec![10 * MIB as u64 + 512, 10 * MIB as u64 + 512 + 1024]
        );
        for part in &parts[..parts.len() - 1] {
            assert!(*part >= PART_SIZE_MIN);
        }
    }

    #[tokio::test]
    async fn embedded_toc_archives_are_self_describing() {
        let store = MemoryObjectStore::new();
        let payloads: Vec<(String, Vec<u8>)> = (0..5)
            .map(|i| (format!("logs/part-{:02}.bin", i), random_bytes(2 * MIB + i)))
            .collect();
        for (key, data) in &payloads {
            store.insert_object("src", key, data.clone());
        }

        let job = build_job(&store, config(), &["s3://src/logs/"], |builder| {
            builder.embed_toc(true);
        })
        .await;
        run_job(job).await.unwrap();

        let archive = store.object("dest", "archive.tar").unwrap();

        // the embedded TOC is discoverable from the first header block alone
        let bucket = store.bucket("dest");
        let toc = crate::toc::read_embedded_toc(bucket.as_ref(), "archive.tar", archive.len() as u64)
            .await
            .unwrap()
            .expect("archive has an embedded TOC");

        assert_eq!(toc.len(), payloads.len());
        for (entry, (key, data)) in toc.iter().zip(&payloads) {
            assert_eq!(&entry.name, key);
            assert_eq!(entry.length as usize, data.len());
            let payload =
                &archive[entry.offset as usize..(entry.offset + entry.length) as usize];
            assert_eq!(payload, &data[..], "TOC offset addresses the payload bytes");
        }

        // scanning the same archive reproduces the embedded TOC (etags aside)
        let scanned = crate::toc::scan_archive(bucket.as_ref(), "archive.tar", archive.len() as u64)
            .await
            .unwrap();
        assert_eq!(scanned.len(), toc.len());
        for (scanned, embedded) in scanned.iter().zip(&toc) {
            assert_eq!(scanned.name, embedded.name);
            assert_eq!(scanned.offset, embedded.offset);
            assert_eq!(scanned.length, embedded.length);
        }
    }

    #[tokio::test]
    async fn excludes_and_transforms_shape_the_member_list() {
        let store = MemoryObjectStore::new();
        store.insert_object("src", "raw/keep.dat", random_bytes(KIB));
        store.insert_object("src", "raw/skip.tmp", random_bytes(KIB));

        let job = build_job(&store, config(), &["s3://src/raw/"], |builder| {
            builder.exclude("*.tmp").unwrap();
            builder.name_transform("s|^raw/|archived/|").unwrap();
        })
        .await;
        assert_eq!(job.total_objects(), 1);
        run_job(job).await.unwrap();

        let archive = store.object("dest", "archive.tar").unwrap();
        let bucket = store.bucket("dest");
        let entries = crate::toc::scan_archive(bucket.as_ref(), "archive.tar", archive.len() as u64)
            .await
            .unwrap();

        let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["archived/keep.dat"]);
    }

    #[tokio::test]
    async fn oversized_member_fails_the_job() {
        let store = MemoryObjectStore::new();
        store.insert_object("src", "small.bin", random_bytes(KIB));

        let storage: Arc<dyn ObjectStorage> = Arc::new(store.clone());
        let mut builder = CreateArchiveJobBuilder::with_store(
            config(),
            "s3://dest/archive.tar".parse().unwrap(),
            storage,
        );
        // a manifest row can claim any size without the store holding the bytes
        let manifest = format!("src,huge.bin,{}\n", PART_SIZE_MAX + 1);
        store.insert_object("meta", "manifest.csv", manifest);
        builder.add_manifest(ManifestLocation::Url(
            "s3://meta/manifest.csv".parse().unwrap(),
        ));

        let job = builder.build().await.unwrap();
        let err = run_job(job).await.unwrap_err();
        assert!(matches!(err, TarLiftError::SourceTooLarge { .. }));
    }

    #[tokio::test]
    async fn empty_input_set_fails_at_build() {
        let store = MemoryObjectStore::new();
        store.insert_object("src", "empty-object", Vec::<u8>::new());

        let storage: Arc<dyn ObjectStorage> = Arc::new(store.clone());
        let mut builder = CreateArchiveJobBuilder::with_store(
            config(),
            "s3://dest/archive.tar".parse().unwrap(),
            storage,
        );
        builder
            .add_input(&"s3://src/".parse().unwrap())
            .await
            .unwrap();

        let err = builder.build().await.unwrap_err();
        assert!(matches!(err, TarLiftError::NoInputObjects));
    }

    #[tokio::test]
    async fn aborting_the_job_cancels_it() {
        let store = MemoryObjectStore::new();
        store.insert_object("src", "big.bin", random_bytes(8 * MIB));

        let job = build_job(&store, config(), &["s3://src/big.bin"], |_| {}).await;
        // an abort signal that is already complete cancels before the first request
        let err = job
            .run_without_progress(futures::future::ready(()))
            .await
            .unwrap_err();
        assert!(matches!(err, TarLiftError::Canceled));
        assert_eq!(store.open_upload_count(), 0, "the upload was aborted");
        assert!(store.object("dest", "archive.tar").is_none());
    }

    #[test]
    fn tags_encode_as_a_query_string() {
        assert_eq!(tags_to_query(&[]), None);
        assert_eq!(
            tags_to_query(&[
                ("team".to_string(), "data eng".to_string()),
                ("kind".to_string(), "archive".to_string()),
            ])
            .unwrap(),
            "team=data%20eng&kind=archive"
        );
    }
}
