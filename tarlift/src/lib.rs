//! `tarlift` creates standards-conformant uncompressed tar archives whose payloads already live
//! in S3-compatible object storage, and extracts such archives back into object storage, without
//! the payload bytes ever transiting the machine running it.
//!
//! Archives are composed server-side: member headers are synthesized locally as 512-byte tar
//! blocks, payloads are spliced in with multipart part copies, and the store's minimum-part-size
//! rule is worked around by staging groups of members behind a disposable leading pad.  An
//! optional table-of-contents member makes archives randomly accessible, so extraction is one
//! ranged copy per member; archives without one are indexed by scanning their headers with
//! ranged reads.
//!
//! The entry points are [`CreateArchiveJobBuilder`] and [`ExtractArchiveJobBuilder`], both
//! following the same shape: construct a builder, add inputs and options, `build()` a job, and
//! `run()` it with an optional progress callback.

mod assemble;
mod config;
mod create;
mod error;
mod extract;
mod manifest;
mod objstore;
mod plan;
mod tar;
mod toc;

pub use config::{Config, HeaderFormat};
pub use create::{CreateArchiveJob, CreateArchiveJobBuilder, CreateProgressCallback};
pub use error::{Result, TarLiftError};
pub use extract::{
    read_archive_toc, ExtractArchiveJob, ExtractArchiveJobBuilder, ExtractFilter,
    ExtractProgressCallback,
};
pub use manifest::ManifestLocation;
pub use toc::{render_toc, TocEntry, TOC_MEMBER_NAME};
