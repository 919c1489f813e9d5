//! The archive plan: the exact byte layout of the archive to be assembled, expressed as an
//! ordered sequence of object references in wire order.
//!
//! Synthesized bytes (member headers, the optional table-of-contents member, padding, the
//! trailer) are inline references; payloads are references to existing remote objects.  Both
//! assemblers consume the same plan, which is what makes their output byte-identical.
use crate::config::HeaderFormat;
use crate::manifest::NameTransforms;
use crate::tar;
use crate::toc::{self, TocEntry};
use crate::{error, Result};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use snafu::prelude::*;
use std::collections::HashMap;

/// Minimum size of a multipart part, except the terminal one.
pub(crate) const PART_SIZE_MIN: u64 = 5 * 1024 * 1024;

/// Maximum size of a single part, and of a single range a part copy can read.
pub(crate) const PART_SIZE_MAX: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum size of one object in the store.
pub(crate) const ARCHIVE_SIZE_MAX: u64 = 5 * 1024 * 1024 * 1024 * 1024;

/// Maximum number of parts in one multipart upload.
pub(crate) const MAX_PART_COUNT: usize = 10_000;

/// A reference to bytes that will appear in the archive: either an existing remote object, or a
/// locally synthesized blob (header blocks, padding, the trailer, the table of contents).
#[derive(Clone, Debug)]
pub(crate) struct ObjectRef {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub etag: String,
    /// Synthesized content carried in memory.  When set, `bucket` is empty and `size` equals the
    /// buffer length.
    pub inline: Option<Bytes>,
    /// Source-object user metadata, fetched only when POSIX bits are being preserved.
    pub metadata: Option<HashMap<String, String>>,
}

impl ObjectRef {
    pub fn remote(
        bucket: impl Into<String>,
        key: impl Into<String>,
        size: u64,
        mtime: DateTime<Utc>,
        etag: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            size,
            mtime,
            etag: etag.into(),
            inline: None,
            metadata: None,
        }
    }

    pub fn inline(label: impl Into<String>, data: Bytes) -> Self {
        Self {
            bucket: String::new(),
            key: label.into(),
            size: data.len() as u64,
            mtime: Utc
                .timestamp_opt(0, 0)
                .single()
                .expect("BUG: the epoch is always representable"),
            etag: String::new(),
            inline: Some(data),
            metadata: None,
        }
    }

    pub fn is_inline(&self) -> bool {
        self.inline.is_some()
    }
}

/// One archive member's worth of plan entries: the synthesized header blocks, the payload, and
/// its padding.  The trailer rides with the final member so groups always break on member
/// boundaries.
#[derive(Clone, Debug)]
struct PlanMember {
    entries: Vec<ObjectRef>,
    size: u64,
}

/// Knobs that shape the plan.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PlanOptions<'a> {
    pub header_format: HeaderFormat,
    pub embed_toc: bool,
    pub preserve_metadata: bool,
    pub transforms: Option<&'a NameTransforms>,
}

/// The full archive layout, built once from the resolved input set and immutable afterwards.
#[derive(Clone, Debug)]
pub(crate) struct ArchivePlan {
    members: Vec<PlanMember>,
    layout: Vec<TocEntry>,
    total_size: u64,
}

impl ArchivePlan {
    /// Lay out the archive for the given input objects, in order.
    pub fn new(objects: Vec<ObjectRef>, opts: PlanOptions<'_>) -> Result<Self> {
        ensure!(!objects.is_empty(), error::NoInputObjectsSnafu);

        for object in &objects {
            ensure!(
                object.size <= PART_SIZE_MAX,
                error::SourceTooLargeSnafu {
                    bucket: object.bucket.clone(),
                    key: object.key.clone(),
                    size: object.size,
                }
            );
        }

        // Synthesize every member's header blocks first; their lengths feed the offset walk.
        let mut members = Vec::with_capacity(objects.len() + 1);
        for object in objects {
            let name = match opts.transforms {
                Some(transforms) => transforms.apply(&object.key),
                None => object.key.clone(),
            };

            let attrs = if opts.preserve_metadata {
                tar::HeaderAttributes::from_metadata(object.metadata.as_ref())
            } else {
                tar::HeaderAttributes::default()
            };

            let header =
                tar::member_header(&name, object.size, &object.mtime, attrs, opts.header_format)?;
            let pad = tar::padding_after(object.size);
            let size = header.len() as u64 + object.size + pad;

            let mut entries = Vec::with_capacity(3);
            entries.push(ObjectRef::inline(name, header));
            entries.push(object);
            if pad > 0 {
                entries.push(ObjectRef::inline("", tar::zeroes(pad as usize)));
            }

            members.push(PlanMember { entries, size });
        }

        // When a table of contents is embedded, every downstream offset shifts by the TOC
        // member's size.  The body length is pre-declared (offsets printed at maximum width) so
        // one pass suffices; the real body is space-padded up to the declared length.
        let toc_body_len = if opts.embed_toc {
            Some(toc::padded_body_len(members.iter().map(|member| {
                let payload = &member.entries[1];
                (member.entries[0].key.as_str(), payload.size, payload.etag.as_str())
            })))
        } else {
            None
        };

        let mut offset = match toc_body_len {
            Some(body_len) => tar::BLOCK_SIZE + body_len + tar::padding_after(body_len),
            None => 0,
        };

        let mut layout = Vec::with_capacity(members.len());
        let mut plan_members = Vec::with_capacity(members.len() + 1);
        for member in members {
            let header_len = member.entries[0].size;
            let payload = &member.entries[1];
            layout.push(TocEntry {
                name: member.entries[0].key.clone(),
                offset: offset + header_len,
                length: payload.size,
                etag: payload.etag.clone(),
            });

            offset += member.size;
            plan_members.push(member);
        }

        if let Some(body_len) = toc_body_len {
            let body = toc::render_padded_body(&layout, body_len);

            // The TOC header's timestamp is truncated to whole seconds so the member never grows
            // an extended-header block that the offset walk didn't account for.
            let now = Utc
                .timestamp_opt(Utc::now().timestamp(), 0)
                .single()
                .expect("BUG: whole-second timestamps are always representable");
            let header = tar::member_header(
                toc::TOC_MEMBER_NAME,
                body_len,
                &now,
                tar::HeaderAttributes::default(),
                opts.header_format,
            )?;
            debug_assert_eq!(header.len() as u64, tar::BLOCK_SIZE);

            let pad = tar::padding_after(body_len);
            let mut entries = vec![
                ObjectRef::inline(toc::TOC_MEMBER_NAME, header),
                ObjectRef::inline(toc::TOC_MEMBER_NAME, body),
            ];
            if pad > 0 {
                entries.push(ObjectRef::inline("", tar::zeroes(pad as usize)));
            }

            plan_members.insert(
                0,
                PlanMember {
                    size: tar::BLOCK_SIZE + body_len + pad,
                    entries,
                },
            );
        }

        // The trailer travels with the final member
        let last = plan_members
            .last_mut()
            .expect("plan always has at least one member");
        last.entries.push(ObjectRef::inline("", tar::trailer()));
        last.size += tar::TRAILER_SIZE;

        let total_size = offset + tar::TRAILER_SIZE;
        ensure!(
            total_size <= ARCHIVE_SIZE_MAX,
            error::ArchiveTooLargeSnafu { size: total_size }
        );

        Ok(Self {
            members: plan_members,
            layout,
            total_size,
        })
    }

    /// Total number of bytes the finished archive will hold.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// The payload location of every user member, in archive order.  This is both the embedded
    /// TOC's content and the index tests verify offsets against.
    pub fn layout(&self) -> &[TocEntry] {
        &self.layout
    }

    /// All plan entries in wire order.
    pub fn entries(&self) -> impl Iterator<Item = &ObjectRef> {
        self.members.iter().flat_map(|member| member.entries.iter())
    }

    /// Pack adjacent members into groups no smaller than the minimum part size, closing a group
    /// once it exceeds `ceiling`.  A trailing group below the minimum is merged into its
    /// predecessor so every non-terminal part of the final upload clears the minimum.
    pub fn split_into_groups(&self, ceiling: u64) -> Result<Vec<PlanGroup>> {
        let mut groups: Vec<PlanGroup> = Vec::new();
        let mut current = PlanGroup::default();

        for member in &self.members {
            current.entries.extend(member.entries.iter().cloned());
            current.size += member.size;

            if current.size > ceiling {
                groups.push(std::mem::take(&mut current));
            }
        }

        if !current.entries.is_empty() {
            if current.size < PART_SIZE_MIN && !groups.is_empty() {
                let previous = groups.last_mut().unwrap();
                previous.entries.append(&mut current.entries);
                previous.size += current.size;
            } else {
                groups.push(current);
            }
        }

        ensure!(
            groups.len() <= MAX_PART_COUNT,
            error::PartBudgetExceededSnafu {
                parts: groups.len()
            }
        );

        Ok(groups)
    }
}

/// A run of adjacent plan entries that will be staged and become (at least) one part of the
/// final upload.
#[derive(Clone, Debug, Default)]
pub(crate) struct PlanGroup {
    pub entries: Vec<ObjectRef>,
    pub size: u64,
}

/// The group ceiling: the user's target part size held inside the store's part-size bounds.
pub(crate) fn group_ceiling(target_part_size: u64) -> u64 {
    target_part_size.clamp(PART_SIZE_MIN, PART_SIZE_MAX)
}
