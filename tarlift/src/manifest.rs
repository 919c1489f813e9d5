//! Resolution of the archive's input set: prefix listings and delimited-text manifests, with
//! exclusion filters and name rewrites.
use crate::objstore::ObjectStorage;
use crate::plan::ObjectRef;
use crate::{error, Result};
use chrono::Utc;
use itertools::Itertools;
use regex::Regex;
use snafu::prelude::*;
use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Where a delimited-text manifest lives.
#[derive(Clone, Debug)]
pub enum ManifestLocation {
    /// A file on the local filesystem.
    File(PathBuf),

    /// An `s3://bucket/key` URL of a manifest object.
    Url(Url),
}

/// A disjunction of glob-like exclusion patterns, `|`-separated, applied to raw object keys.
#[derive(Clone, Debug)]
pub(crate) struct ExcludePatterns {
    patterns: Vec<Regex>,
}

impl ExcludePatterns {
    /// Translate `a|b|c` into one anchored regex per alternative.
    ///
    /// Repetition and grouping metacharacters are escaped, `*` becomes `.*` and `?` becomes `.`.
    /// Bracket expressions pass through as regex character classes, so an unbalanced bracket is
    /// an invalid pattern.
    pub fn parse(pattern: &str) -> Result<Self> {
        let patterns = pattern
            .split('|')
            .filter(|alternative| !alternative.is_empty())
            .map(|alternative| {
                let mut translated = String::with_capacity(alternative.len() + 8);
                translated.push('^');
                for c in alternative.chars() {
                    match c {
                        '*' => translated.push_str(".*"),
                        '?' => translated.push('.'),
                        '.' | '+' | '(' | ')' | '{' | '}' | '^' | '$' | '\\' => {
                            translated.push('\\');
                            translated.push(c);
                        }
                        other => translated.push(other),
                    }
                }
                translated.push('$');

                Regex::new(&translated).with_context(|_| error::InvalidExcludePatternSnafu {
                    pattern: alternative.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    pub fn is_match(&self, key: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(key))
    }
}

/// A `;`-separated sequence of sed-style substitutions applied, in order, to member names as
/// they are written into the archive.  Source keys are untouched; only the tar header name
/// changes.
#[derive(Clone, Debug)]
pub(crate) struct NameTransforms {
    substitutions: Vec<Substitution>,
}

#[derive(Clone, Debug)]
struct Substitution {
    pattern: Regex,
    replacement: String,
    global: bool,
}

impl NameTransforms {
    /// Parse expressions of the form `s<delim>pattern<delim>replacement<delim>flags`, where the
    /// delimiter is whatever character follows the `s` (conventionally `|` or `/`) and the only
    /// recognized flag is `g`.
    pub fn parse(expressions: &str) -> Result<Self> {
        let substitutions = expressions
            .split(';')
            .filter(|expression| !expression.is_empty())
            .map(Self::parse_one)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { substitutions })
    }

    fn parse_one(expression: &str) -> Result<Substitution> {
        let err = || {
            error::InvalidNameTransformSnafu {
                expression: expression.to_string(),
            }
            .build()
        };

        let mut chars = expression.chars();
        ensure!(
            chars.next() == Some('s'),
            error::InvalidNameTransformSnafu {
                expression: expression.to_string(),
            }
        );
        let delimiter = chars.next().ok_or_else(err)?;

        let rest: &str = &expression[1 + delimiter.len_utf8()..];
        let parts: Vec<&str> = rest.split(delimiter).collect();
        let (pattern, replacement, flags) = match parts.as_slice() {
            [pattern, replacement] => (*pattern, *replacement, ""),
            [pattern, replacement, flags] => (*pattern, *replacement, *flags),
            _ => return Err(err()),
        };
        ensure!(
            flags.chars().all(|flag| flag == 'g'),
            error::InvalidNameTransformSnafu {
                expression: expression.to_string(),
            }
        );

        let pattern =
            Regex::new(pattern).with_context(|_| error::InvalidNameTransformPatternSnafu {
                expression: expression.to_string(),
            })?;

        Ok(Substitution {
            pattern,
            replacement: replacement.to_string(),
            global: flags.contains('g'),
        })
    }

    pub fn apply(&self, name: &str) -> String {
        let mut name = Cow::Borrowed(name);
        for substitution in &self.substitutions {
            let replaced = if substitution.global {
                substitution
                    .pattern
                    .replace_all(&name, substitution.replacement.as_str())
            } else {
                substitution
                    .pattern
                    .replace(&name, substitution.replacement.as_str())
            };
            name = Cow::Owned(replaced.into_owned());
        }
        name.into_owned()
    }
}

/// Parse one manifest body: one object per line as `bucket,key,size[,etag]`, `#` comments and
/// blank lines ignored.  Keys may contain commas, so the numeric columns bind from the right.
pub(crate) fn parse_manifest_text(text: &str) -> Result<Vec<ObjectRef>> {
    let mut objects = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let err = || {
            error::ManifestLineSnafu {
                line: index + 1,
                content: line.to_string(),
            }
            .build()
        };

        let (bucket, rest) = line.split_once(',').ok_or_else(err)?;
        ensure!(
            !bucket.is_empty(),
            error::ManifestLineSnafu {
                line: index + 1,
                content: line.to_string(),
            }
        );

        let (key, size, etag) = {
            let (head, tail) = rest.rsplit_once(',').ok_or_else(err)?;
            match tail.parse::<u64>() {
                // bucket,key,size
                Ok(size) => (head, size, ""),
                // bucket,key,size,etag
                Err(_) => {
                    let (key, size) = head.rsplit_once(',').ok_or_else(err)?;
                    (key, size.parse().ok().ok_or_else(err)?, tail)
                }
            }
        };
        ensure!(
            !key.is_empty(),
            error::ManifestLineSnafu {
                line: index + 1,
                content: line.to_string(),
            }
        );

        // A manifest doesn't carry timestamps; members get the archiving time instead.
        objects.push(ObjectRef::remote(bucket, key, size, Utc::now(), etag));
    }

    Ok(objects)
}

/// Expand every input source into a flat, ordered sequence of object references, applying the
/// exclusion filter and dropping empty objects and directory markers.
pub(crate) async fn resolve_inputs(
    store: &Arc<dyn ObjectStorage>,
    inputs: &[Url],
    manifests: &[ManifestLocation],
    exclude: Option<&ExcludePatterns>,
) -> Result<Vec<ObjectRef>> {
    let mut objects = Vec::new();

    for input in inputs {
        let (bucket, key) = store.parse_url(input).await?;

        match key {
            None => objects.extend(bucket.list_objects("").await?),
            Some(key) if key.ends_with('/') => {
                objects.extend(bucket.list_objects(&key).await?)
            }
            Some(key) => objects.push(bucket.head_object(&key).await?),
        }
    }

    for manifest in manifests {
        let text = match manifest {
            ManifestLocation::File(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|_| error::ManifestReadSnafu { path: path.clone() })?,
            ManifestLocation::Url(url) => {
                let (bucket, key) = store.parse_url(url).await?;
                let key = key.ok_or_else(|| {
                    error::ArchiveUrlInvalidSnafu { url: url.clone() }.build()
                })?;
                String::from_utf8_lossy(&bucket.get_object(&key, None).await?).into_owned()
            }
        };

        objects.extend(parse_manifest_text(&text)?);
    }

    let before = objects.len();
    let objects: Vec<ObjectRef> = objects
        .into_iter()
        .filter(|object| object.size > 0)
        .filter(|object| match exclude {
            Some(exclude) => !exclude.is_match(&object.key),
            None => true,
        })
        .unique_by(|object| (object.bucket.clone(), object.key.clone()))
        .collect();

    debug!(
        resolved = objects.len(),
        dropped = before - objects.len(),
        "Resolved archive input objects"
    );

    Ok(objects)
}
