//! Synthesis and parsing of raw tar member headers.
//!
//! The assemblers never feed payload bytes through a `tar::Builder`; instead they synthesize each
//! member's header blocks locally and splice the payload in by server-side copy.  This module
//! produces those 512-byte blocks (including the pax/gnu long-name extension members) and parses
//! them back for the archive scanner.
use crate::config::HeaderFormat;
use crate::{error, Result};
use bytes::Bytes;
use chrono::{DateTime, Timelike, Utc};
use once_cell::sync::Lazy;
use snafu::prelude::*;
use std::collections::HashMap;

/// Size of one tar block; headers are one block and payloads are padded to a block boundary.
pub(crate) const BLOCK_SIZE: u64 = 512;

/// An archive ends with two zero-filled blocks.
pub(crate) const TRAILER_SIZE: u64 = BLOCK_SIZE * 2;

/// One reusable slab of zeroes big enough for the largest zero run we ever emit: the leading
/// minimum-part-size pad of a staging upload.  Slicing `Bytes` is refcounted, so padding and pad
/// parts all share this allocation.
static ZEROES: Lazy<Bytes> = Lazy::new(|| Bytes::from(vec![0u8; 5 * 1024 * 1024]));

/// A run of `len` zero bytes, sliced out of the shared slab.
pub(crate) fn zeroes(len: usize) -> Bytes {
    assert!(len <= ZEROES.len());
    ZEROES.slice(0..len)
}

/// Number of zero bytes that follow a payload of length `len` to reach the next block boundary.
pub(crate) fn padding_after(len: u64) -> u64 {
    (BLOCK_SIZE - len % BLOCK_SIZE) % BLOCK_SIZE
}

/// The two zero blocks that terminate an archive.
pub(crate) fn trailer() -> Bytes {
    zeroes(TRAILER_SIZE as usize)
}

/// POSIX bits carried in a member header.
///
/// Objects don't have these natively; when metadata preservation is enabled they're recovered
/// from the source object's user metadata, otherwise everything gets the fixed defaults.
#[derive(Clone, Copy, Debug)]
pub(crate) struct HeaderAttributes {
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
}

impl Default for HeaderAttributes {
    fn default() -> Self {
        Self {
            mode: 0o600,
            uid: 0,
            gid: 0,
        }
    }
}

impl HeaderAttributes {
    /// Read `mode` (octal), `uid` and `gid` (decimal) keys from object user metadata, keeping the
    /// defaults for anything absent or unparseable.
    pub fn from_metadata(metadata: Option<&HashMap<String, String>>) -> Self {
        let mut attrs = Self::default();

        if let Some(metadata) = metadata {
            if let Some(mode) = metadata
                .get("mode")
                .and_then(|v| u32::from_str_radix(v.trim_start_matches("0o"), 8).ok())
            {
                attrs.mode = mode;
            }
            if let Some(uid) = metadata.get("uid").and_then(|v| v.parse().ok()) {
                attrs.uid = uid;
            }
            if let Some(gid) = metadata.get("gid").and_then(|v| v.parse().ok()) {
                attrs.gid = gid;
            }
        }

        attrs
    }
}

/// Synthesize the header block(s) for one regular-file member.
///
/// The result is a multiple of 512 bytes: the member's ustar or gnu header block, preceded when
/// necessary by a long-name extension member (`x` record member for pax, `L` member for gnu).
/// The payload itself and its padding are not included.
pub(crate) fn member_header(
    name: &str,
    size: u64,
    mtime: &DateTime<Utc>,
    attrs: HeaderAttributes,
    format: HeaderFormat,
) -> Result<Bytes> {
    let mtime_secs = mtime.timestamp().max(0) as u64;
    let mut out = Vec::with_capacity(BLOCK_SIZE as usize);

    match format {
        HeaderFormat::Pax => {
            let mut records = Vec::new();
            if name.len() > MAX_PLAIN_NAME_LEN {
                records.extend_from_slice(&pax_record("path", name));
            }
            if mtime.nanosecond() != 0 {
                let value = format!("{}.{:09}", mtime_secs, mtime.nanosecond());
                records.extend_from_slice(&pax_record("mtime", &value));
            }

            if !records.is_empty() {
                let mut ext = tar::Header::new_ustar();
                set_header_path(&mut ext, &pax_member_name(name), name)?;
                ext.set_entry_type(tar::EntryType::XHeader);
                ext.set_size(records.len() as u64);
                ext.set_mode(0o644);
                ext.set_uid(0);
                ext.set_gid(0);
                ext.set_mtime(mtime_secs);
                ext.set_cksum();

                out.extend_from_slice(ext.as_bytes());
                out.extend_from_slice(&records);
                out.extend_from_slice(&zeroes(padding_after(records.len() as u64) as usize));
            }

            let mut header = tar::Header::new_ustar();
            set_header_path(&mut header, truncated_name(name, MAX_PLAIN_NAME_LEN), name)?;
            fill_regular(&mut header, size, mtime_secs, attrs);
            out.extend_from_slice(header.as_bytes());
        }
        HeaderFormat::Gnu => {
            if name.len() > MAX_PLAIN_NAME_LEN {
                // GNU long-name member: a `L` entry named `././@LongLink` whose payload is the
                // null-terminated real name
                let mut long = tar::Header::new_gnu();
                let long_name = b"././@LongLink";
                long.as_gnu_mut().unwrap().name[..long_name.len()].clone_from_slice(long_name);
                long.set_entry_type(tar::EntryType::GNULongName);
                long.set_size(name.len() as u64 + 1);
                long.set_mode(0o644);
                long.set_uid(0);
                long.set_gid(0);
                long.set_mtime(0);
                long.set_cksum();

                out.extend_from_slice(long.as_bytes());
                out.extend_from_slice(name.as_bytes());
                out.push(0);
                out.extend_from_slice(&zeroes(padding_after(name.len() as u64 + 1) as usize));
            }

            let mut header = tar::Header::new_gnu();
            set_header_path(&mut header, truncated_name(name, MAX_PLAIN_NAME_LEN), name)?;
            fill_regular(&mut header, size, mtime_secs, attrs);
            out.extend_from_slice(header.as_bytes());
        }
    }

    Ok(Bytes::from(out))
}

/// Longest name that fits in the fixed name field of a header block.
const MAX_PLAIN_NAME_LEN: usize = 100;

fn fill_regular(header: &mut tar::Header, size: u64, mtime_secs: u64, attrs: HeaderAttributes) {
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(size);
    header.set_mode(attrs.mode);
    header.set_uid(attrs.uid);
    header.set_gid(attrs.gid);
    header.set_mtime(mtime_secs);
    header.set_cksum();
}

fn set_header_path(header: &mut tar::Header, path: &str, full_name: &str) -> Result<()> {
    header.set_path(path).with_context(|_| error::InvalidMemberNameSnafu {
        name: full_name.to_string(),
    })
}

/// Truncate a name to at most `max` bytes without splitting a UTF-8 character.
fn truncated_name(name: &str, max: usize) -> &str {
    if name.len() <= max {
        name
    } else {
        match std::str::from_utf8(&name.as_bytes()[..max]) {
            Ok(s) => s,
            Err(e) => std::str::from_utf8(&name.as_bytes()[..e.valid_up_to()]).unwrap(),
        }
    }
}

/// Conventional name for the extended-header member that precedes `name`.
fn pax_member_name(name: &str) -> String {
    format!("PaxHeaders.0/{}", truncated_name(name, MAX_PLAIN_NAME_LEN - "PaxHeaders.0/".len()))
}

/// One `"<len> <key>=<value>\n"` extended-attribute record, where `<len>` counts the whole record
/// including its own digits.
fn pax_record(key: &str, value: &str) -> Vec<u8> {
    let tail = key.len() + value.len() + 3;

    let mut len = tail + decimal_digits(tail);
    if decimal_digits(len) + tail != len {
        // the length field itself pushed the record across a digit boundary
        len = tail + decimal_digits(len);
    }

    format!("{} {}={}\n", len, key, value).into_bytes()
}

fn decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// What kind of member a parsed header introduces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MemberKind {
    /// A regular file; the interesting case.
    Regular,
    /// A pax extended-header member whose records may override the following member's name.
    PaxExtended,
    /// A GNU long-name member whose payload is the following member's real name.
    GnuLongName,
    /// Anything else (directories, links, global pax headers); skipped over during scans.
    Other,
}

/// The fields of one parsed header block that the scanner cares about.
#[derive(Clone, Debug)]
pub(crate) struct ParsedHeader {
    pub name: String,
    pub size: u64,
    pub kind: MemberKind,
}

/// Parse one 512-byte header block read from `offset` in an archive.
///
/// Returns `None` for an all-zero block (the start of the archive trailer).  A block that is
/// neither zero nor carries a valid checksum fails with `MalformedArchive`.
pub(crate) fn parse_header(block: &[u8], offset: u64) -> Result<Option<ParsedHeader>> {
    assert_eq!(block.len(), BLOCK_SIZE as usize);

    if block.iter().all(|b| *b == 0) {
        return Ok(None);
    }

    let stored = parse_octal(&block[148..156])
        .ok_or_else(|| error::MalformedArchiveSnafu { offset }.build())?;
    ensure!(
        stored == header_checksum(block),
        error::MalformedArchiveSnafu { offset }
    );

    let mut header = tar::Header::new_old();
    header.as_mut_bytes().copy_from_slice(block);

    let size = header
        .entry_size()
        .ok()
        .ok_or_else(|| error::MalformedArchiveSnafu { offset }.build())?;
    let name = String::from_utf8_lossy(&header.path_bytes()).into_owned();

    let kind = match header.entry_type() {
        tar::EntryType::Regular | tar::EntryType::Continuous => MemberKind::Regular,
        tar::EntryType::XHeader => MemberKind::PaxExtended,
        tar::EntryType::GNULongName => MemberKind::GnuLongName,
        _ => MemberKind::Other,
    };

    Ok(Some(ParsedHeader { name, size, kind }))
}

/// The header checksum: the unsigned byte sum of the block with the checksum field read as
/// spaces.
fn header_checksum(block: &[u8]) -> u64 {
    block
        .iter()
        .enumerate()
        .map(|(i, b)| {
            if (148..156).contains(&i) {
                b' ' as u64
            } else {
                *b as u64
            }
        })
        .sum()
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    let digits: Vec<u8> = field
        .iter()
        .copied()
        .skip_while(|b| *b == b' ' || *b == 0)
        .take_while(|b| (b'0'..=b'7').contains(b))
        .collect();

    if digits.is_empty() {
        return None;
    }

    let mut value = 0u64;
    for d in digits {
        value = value.checked_mul(8)?.checked_add((d - b'0') as u64)?;
    }
    Some(value)
}

/// Decode the records of a pax extended-header member into a key/value map.
///
/// Records the member carries that are malformed are ignored rather than failing the whole scan;
/// pax consumers are expected to skip what they don't understand.
pub(crate) fn parse_pax_records(body: &[u8]) -> HashMap<String, String> {
    let mut records = HashMap::new();
    let mut rest = body;

    while !rest.is_empty() {
        let space = match rest.iter().position(|b| *b == b' ') {
            Some(i) => i,
            None => break,
        };
        let len: usize = match std::str::from_utf8(&rest[..space])
            .ok()
            .and_then(|s| s.parse().ok())
        {
            Some(len) if len > space && len <= rest.len() => len,
            _ => break,
        };

        // strip "<len> " and the trailing newline to get "key=value"
        let record = &rest[space + 1..len - 1];
        if let Some(eq) = record.iter().position(|b| *b == b'=') {
            records.insert(
                String::from_utf8_lossy(&record[..eq]).into_owned(),
                String::from_utf8_lossy(&record[eq + 1..]).into_owned(),
            );
        }

        rest = &rest[len..];
    }

    records
}

/// Recover the real member name from a GNU long-name member's payload.
pub(crate) fn parse_gnu_long_name(body: &[u8]) -> String {
    let end = body
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(body.len());
    String::from_utf8_lossy(&body[..end]).into_owned()
}
