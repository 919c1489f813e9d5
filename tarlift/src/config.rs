use std::str::FromStr;
use url::Url;

/// The tar header flavor used for synthesized archive members.
///
/// `Pax` carries long names and sub-second timestamps in extended-attribute
/// members and is what modern tar implementations produce by default.  `Gnu`
/// uses the older GNU extension records instead, for consumers that don't
/// understand pax members.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum HeaderFormat {
    Pax,
    Gnu,
}

impl Default for HeaderFormat {
    fn default() -> Self {
        Self::Pax
    }
}

impl FromStr for HeaderFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pax" => Ok(Self::Pax),
            "gnu" => Ok(Self::Gnu),
            other => Err(format!(
                "'{}' is not a recognized tar header format; expected 'pax' or 'gnu'",
                other
            )),
        }
    }
}

impl std::fmt::Display for HeaderFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pax => write!(f, "pax"),
            Self::Gnu => write!(f, "gnu"),
        }
    }
}

/// The configuration settings that control the behavior of archive creation and extraction.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
pub struct Config {
    /// Use a custom S3 endpoint instead of AWS.
    ///
    /// Use this to operate on a non-Amazon S3-compatible service.  If this is set, the AWS region
    /// is ignored.
    #[cfg_attr(feature = "clap", clap(long, global = true, value_name = "URL"))]
    pub s3_endpoint: Option<Url>,

    /// The AWS region the buckets are located in.
    ///
    /// If not set, the region is taken from the environment and AWS config files, falling back to
    /// us-east-1.
    #[cfg_attr(feature = "clap", clap(long, global = true, value_name = "REGION"))]
    pub aws_region: Option<String>,

    /// Access key ID to authenticate with instead of the default credential chain.
    ///
    /// Mostly useful with `--s3-endpoint` when talking to a non-AWS service.
    #[cfg_attr(feature = "clap", clap(long, global = true, value_name = "KEY_ID"))]
    pub aws_access_key_id: Option<String>,

    /// Secret access key that goes with `--aws-access-key-id`.
    #[cfg_attr(feature = "clap", clap(long, global = true, value_name = "SECRET"))]
    pub aws_secret_access_key: Option<String>,

    /// The target size of one multipart part of the destination archive.
    ///
    /// Adjacent archive members are packed together until a part reaches this size.  The store
    /// bounds parts between 5MiB and 5GiB, and an upload can hold at most 10,000 parts, so very
    /// large archives need a proportionally larger part size.
    ///
    /// Can be specified as an integer, ie "1000000", or with a suffix ie "25MiB".
    #[cfg_attr(feature = "clap", clap(long, default_value = "25MiB", global = true))]
    pub target_part_size: byte_unit::Byte,

    /// The maximum number of concurrent requests to the object store.
    ///
    /// Part uploads, part copies, and staging operations all count against this bound, across all
    /// archive parts being assembled at the same time.
    #[cfg_attr(feature = "clap", clap(long, default_value = "100", global = true))]
    pub max_concurrent_requests: usize,

    /// The tar header flavor written for archive members: "pax" or "gnu".
    #[cfg_attr(feature = "clap", clap(long, default_value = "pax", global = true))]
    pub header_format: HeaderFormat,

    /// Download member payloads and assemble the archive in memory instead of copying them
    /// server-side.
    ///
    /// For corpora of very small objects a ranged download is cheaper than a server-side part
    /// copy per object, and this is the only mode that can pack thousands of sub-block objects
    /// into one part.
    #[cfg_attr(feature = "clap", clap(long, global = true))]
    pub in_memory: bool,

    /// Carry POSIX owner, group, and permission bits from object metadata into the tar headers.
    ///
    /// Looks for `uid`, `gid`, and `mode` keys in each source object's user metadata.
    #[cfg_attr(feature = "clap", clap(long, global = true))]
    pub preserve_metadata: bool,
}

impl Default for Config {
    fn default() -> Self {
        // XXX: these values are duplicated here and in the `clap` attributes; there's no better
        // way without unconditionally taking a clap dependency in the lib crate
        Self {
            s3_endpoint: None,
            aws_region: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            target_part_size: byte_unit::Byte::from_bytes(25 * 1024 * 1024),
            max_concurrent_requests: 100,
            header_format: HeaderFormat::Pax,
            in_memory: false,
            preserve_metadata: false,
        }
    }
}
