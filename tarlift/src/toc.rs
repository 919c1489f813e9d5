//! The archive's table of contents: a directory of member payload locations that makes
//! random-access extraction possible without reading the archive body.
//!
//! The TOC can be embedded as the archive's first member, exchanged as a standalone text file,
//! or rebuilt from any uncompressed tar by scanning its headers with ranged reads.
use crate::objstore::Bucket;
use crate::plan::ARCHIVE_SIZE_MAX;
use crate::tar::{self, MemberKind};
use crate::{error, Result};
use bytes::Bytes;
use snafu::prelude::*;
use tracing::debug;

/// Name of the member carrying the embedded table of contents, always at member index 0.
pub const TOC_MEMBER_NAME: &str = ".toc.csv";

/// The location of one member's payload within the archive.
///
/// `offset` addresses the first payload byte (directly after the member's header blocks);
/// `length` is the payload length, excluding tar padding.  `etag` is the source object's content
/// hash as the store reported it, and is empty when unknown (entries rebuilt by scanning).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TocEntry {
    pub name: String,
    pub offset: u64,
    pub length: u64,
    pub etag: String,
}

impl TocEntry {
    fn to_line(&self) -> String {
        format!("{},{},{},{}\n", self.name, self.offset, self.length, self.etag)
    }

    fn parse_line(line: &str, line_number: usize) -> Result<Self> {
        // member names may themselves contain commas, so split the three numeric/hash columns
        // off the right-hand side
        let mut columns = line.rsplitn(4, ',');

        let err = || {
            error::TocLineSnafu {
                line: line_number,
                content: line.to_string(),
            }
            .build()
        };

        let etag = columns.next().ok_or_else(err)?.to_string();
        let length = columns
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(err)?;
        let offset = columns
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(err)?;
        let name = columns.next().ok_or_else(err)?.to_string();
        ensure!(
            !name.is_empty(),
            error::TocLineSnafu {
                line: line_number,
                content: line.to_string(),
            }
        );

        Ok(Self {
            name,
            offset,
            length,
            etag,
        })
    }
}

/// Parse a TOC body (embedded or external).  Blank and padding lines are ignored.
pub(crate) fn parse_toc_text(text: &str) -> Result<Vec<TocEntry>> {
    let mut entries = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        entries.push(TocEntry::parse_line(line, index + 1)?);
    }

    Ok(entries)
}

/// Render the entries back to the exchange text form.
pub fn render_toc(entries: &[TocEntry]) -> String {
    let mut body = String::new();
    for entry in entries {
        body.push_str(&entry.to_line());
    }
    body
}

/// The pre-declared length of an embedded TOC body.
///
/// Every offset in the body depends on the body's own length, so the length is fixed before any
/// offset is known by pricing each offset column at the widest it could ever be.  The rendered
/// body is then space-padded up to this length, and offsets are final on the first pass.
pub(crate) fn padded_body_len<'a>(
    members: impl Iterator<Item = (&'a str, u64, &'a str)>,
) -> u64 {
    let max_offset_digits = decimal_digits(ARCHIVE_SIZE_MAX);

    members
        .map(|(name, length, etag)| {
            (name.len()
                + 1
                + max_offset_digits
                + 1
                + decimal_digits(length)
                + 1
                + etag.len()
                + 1) as u64
        })
        .sum()
}

fn decimal_digits(mut n: u64) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Render the body at exactly the pre-declared length.
pub(crate) fn render_padded_body(entries: &[TocEntry], body_len: u64) -> Bytes {
    let mut body = render_toc(entries);
    assert!(
        body.len() as u64 <= body_len,
        "TOC body overran its declared length"
    );

    body.extend(std::iter::repeat(' ').take(body_len as usize - body.len()));
    Bytes::from(body)
}

/// Fetch the embedded TOC of an archive, if it has one.
///
/// One 512-byte ranged read decides: if the first member is `.toc.csv`, a second ranged read
/// fetches the body.
pub(crate) async fn read_embedded_toc(
    bucket: &dyn Bucket,
    key: &str,
    archive_size: u64,
) -> Result<Option<Vec<TocEntry>>> {
    if archive_size < tar::BLOCK_SIZE {
        return Ok(None);
    }

    let block = bucket.get_object(key, Some(0..tar::BLOCK_SIZE)).await?;
    let header = match tar::parse_header(&block, 0)? {
        Some(header) => header,
        None => return Ok(None),
    };

    if header.kind != MemberKind::Regular || header.name != TOC_MEMBER_NAME {
        return Ok(None);
    }

    ensure!(
        tar::BLOCK_SIZE + header.size <= archive_size,
        error::TruncatedArchiveSnafu {
            offset: tar::BLOCK_SIZE
        }
    );

    debug!(key, toc_len = header.size, "Archive has an embedded table of contents");

    let body = bucket
        .get_object(key, Some(tar::BLOCK_SIZE..tar::BLOCK_SIZE + header.size))
        .await?;

    parse_toc_text(&String::from_utf8_lossy(&body)).map(Some)
}

/// Rebuild a TOC by walking an archive's headers with 512-byte ranged reads.
///
/// Long-name extension members are followed, non-file members are skipped, and the walk ends at
/// the two zero blocks of the trailer.  An embedded TOC member is not reported as an entry, so
/// scanning an archive reproduces its embedded TOC (minus etags, which headers don't carry).
pub(crate) async fn scan_archive(
    bucket: &dyn Bucket,
    key: &str,
    archive_size: u64,
) -> Result<Vec<TocEntry>> {
    let mut entries = Vec::new();
    let mut offset = 0u64;
    let mut pending_name: Option<String> = None;

    loop {
        ensure!(
            offset + tar::BLOCK_SIZE <= archive_size,
            error::TruncatedArchiveSnafu { offset }
        );

        let block = bucket
            .get_object(key, Some(offset..offset + tar::BLOCK_SIZE))
            .await?;

        let header = match tar::parse_header(&block, offset)? {
            Some(header) => header,
            None => {
                // first trailer block; the second must follow
                let second_offset = offset + tar::BLOCK_SIZE;
                ensure!(
                    second_offset + tar::BLOCK_SIZE <= archive_size,
                    error::TruncatedArchiveSnafu {
                        offset: second_offset
                    }
                );
                let second = bucket
                    .get_object(key, Some(second_offset..second_offset + tar::BLOCK_SIZE))
                    .await?;
                ensure!(
                    tar::parse_header(&second, second_offset)?.is_none(),
                    error::MalformedArchiveSnafu {
                        offset: second_offset
                    }
                );
                break;
            }
        };

        let payload_offset = offset + tar::BLOCK_SIZE;
        let next_offset = payload_offset + header.size + tar::padding_after(header.size);
        ensure!(
            next_offset <= archive_size,
            error::TruncatedArchiveSnafu { offset }
        );

        match header.kind {
            MemberKind::PaxExtended => {
                let body = bucket
                    .get_object(key, Some(payload_offset..payload_offset + header.size))
                    .await?;
                if let Some(path) = tar::parse_pax_records(&body).remove("path") {
                    pending_name = Some(path);
                }
            }
            MemberKind::GnuLongName => {
                let body = bucket
                    .get_object(key, Some(payload_offset..payload_offset + header.size))
                    .await?;
                pending_name = Some(tar::parse_gnu_long_name(&body));
            }
            MemberKind::Regular => {
                let name = pending_name.take().unwrap_or(header.name);

                // the embedded TOC describes the archive, it isn't part of its contents
                if !(offset == 0 && name == TOC_MEMBER_NAME) {
                    entries.push(TocEntry {
                        name,
                        offset: payload_offset,
                        length: header.size,
                        etag: String::new(),
                    });
                }
            }
            MemberKind::Other => {
                pending_name = None;
            }
        }

        offset = next_offset;
    }

    debug!(key, members = entries.len(), "Rebuilt table of contents by scanning headers");

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeaderFormat;
    use crate::objstore::memory::MemoryObjectStore;
    use crate::tar::HeaderAttributes;
    use chrono::{TimeZone, Utc};

    #[test]
    fn entries_round_trip_through_text() {
        let entries = vec![
            TocEntry {
                name: "a/b/c.txt".to_string(),
                offset: 512,
                length: 1000,
                etag: "\"abc123\"".to_string(),
            },
            TocEntry {
                name: "name,with,commas".to_string(),
                offset: 2048,
                length: 0,
                etag: String::new(),
            },
        ];

        let body = render_toc(&entries);
        assert_eq!(parse_toc_text(&body).unwrap(), entries);
    }

    #[test]
    fn padding_lines_are_ignored() {
        let text = "a,512,10,\"e\"\n    \n";
        let entries = parse_toc_text(text).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a");
    }

    #[test]
    fn bad_lines_are_rejected() {
        let err = parse_toc_text("only-a-name\n").unwrap_err();
        assert!(matches!(err, crate::TarLiftError::TocLine { line: 1, .. }));

        let err = parse_toc_text("name,not-a-number,10,\"e\"\n").unwrap_err();
        assert!(matches!(err, crate::TarLiftError::TocLine { .. }));
    }

    #[test]
    fn declared_length_covers_any_real_offsets() {
        let members = [
            ("short".to_string(), 123u64, "\"e1\"".to_string()),
            ("a/much/longer/member/name.bin".to_string(), 0u64, String::new()),
        ];

        let declared = padded_body_len(
            members
                .iter()
                .map(|(name, len, etag)| (name.as_str(), *len, etag.as_str())),
        );

        // worst case: every offset at its maximum width
        let entries: Vec<TocEntry> = members
            .iter()
            .map(|(name, len, etag)| TocEntry {
                name: name.clone(),
                offset: ARCHIVE_SIZE_MAX,
                length: *len,
                etag: etag.clone(),
            })
            .collect();

        let body = render_padded_body(&entries, declared);
        assert_eq!(body.len() as u64, declared);
        assert_eq!(parse_toc_text(&String::from_utf8_lossy(&body)).unwrap(), entries);
    }

    /// Hand-assemble a small archive in the store and return its bytes length
    fn build_archive(
        store: &MemoryObjectStore,
        format: HeaderFormat,
        members: &[(&str, &[u8])],
    ) -> u64 {
        let mtime = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut archive = Vec::new();
        for (name, payload) in members {
            let header = crate::tar::member_header(
                name,
                payload.len() as u64,
                &mtime,
                HeaderAttributes::default(),
                format,
            )
            .unwrap();
            archive.extend_from_slice(&header);
            archive.extend_from_slice(payload);
            archive.extend_from_slice(&crate::tar::zeroes(
                crate::tar::padding_after(payload.len() as u64) as usize,
            ));
        }
        archive.extend_from_slice(&crate::tar::trailer());

        let len = archive.len() as u64;
        store.insert_object("archive", "test.tar", archive);
        len
    }

    #[tokio::test]
    async fn scanner_walks_both_header_formats() {
        let long_name = format!("{}/tail.bin", "nested/".repeat(30));

        for format in [HeaderFormat::Pax, HeaderFormat::Gnu] {
            let store = MemoryObjectStore::new();
            let members: Vec<(&str, &[u8])> = vec![
                ("plain.txt", b"hello world"),
                (long_name.as_str(), &[7u8; 700]),
                ("empty.bin", b""),
            ];
            let len = build_archive(&store, format, &members);

            let bucket = store.bucket("archive");
            let entries = scan_archive(bucket.as_ref(), "test.tar", len).await.unwrap();

            assert_eq!(entries.len(), 3, "{:?}", format);
            assert_eq!(entries[0].name, "plain.txt");
            assert_eq!(entries[0].length, 11);
            assert_eq!(entries[1].name, long_name);
            assert_eq!(entries[1].length, 700);
            assert_eq!(entries[2].name, "empty.bin");
            assert_eq!(entries[2].length, 0);

            // offsets address the payload bytes
            let archive = store.object("archive", "test.tar").unwrap();
            let hello = &archive
                [entries[0].offset as usize..(entries[0].offset + entries[0].length) as usize];
            assert_eq!(hello, b"hello world");

            // cumulative accounting: last payload end plus padding is the archive minus trailer
            let last = entries.last().unwrap();
            assert_eq!(
                last.offset + last.length + crate::tar::padding_after(last.length),
                len - 1024
            );
        }
    }

    #[tokio::test]
    async fn scanner_rejects_corrupt_headers() {
        let store = MemoryObjectStore::new();
        let len = build_archive(&store, HeaderFormat::Pax, &[("a", b"data")]);

        let mut corrupted = store.object("archive", "test.tar").unwrap().to_vec();
        corrupted[700] ^= 0x55; // inside the payload, harmless
        corrupted[8] ^= 0x55; // inside the first header, fatal
        store.insert_object("archive", "bad.tar", corrupted);

        let bucket = store.bucket("archive");
        let err = scan_archive(bucket.as_ref(), "bad.tar", len).await.unwrap_err();
        assert!(matches!(err, crate::TarLiftError::MalformedArchive { offset: 0 }));
    }

    #[tokio::test]
    async fn scanner_rejects_truncated_archives() {
        let store = MemoryObjectStore::new();
        let len = build_archive(&store, HeaderFormat::Pax, &[("a", b"data")]);

        // drop the trailer entirely
        let truncated = store.object("archive", "test.tar").unwrap().slice(0..(len as usize - 1024));
        store.insert_object("archive", "cut.tar", truncated);

        let bucket = store.bucket("archive");
        let err = scan_archive(bucket.as_ref(), "cut.tar", len - 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::TarLiftError::TruncatedArchive { .. }));
    }

    #[tokio::test]
    async fn archives_without_a_toc_have_none() {
        let store = MemoryObjectStore::new();
        let len = build_archive(&store, HeaderFormat::Pax, &[("a", b"data")]);

        let bucket = store.bucket("archive");
        let toc = read_embedded_toc(bucket.as_ref(), "test.tar", len).await.unwrap();
        assert!(toc.is_none());
    }
}
