use snafu::prelude::*;
use std::path::PathBuf;
use url::Url;

pub type Result<T, E = TarLiftError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TarLiftError {
    #[snafu(display("The URL '{url}' doesn't correspond to any supported object storage technology.  Supported URL schemes are: s3"))]
    UnsupportedObjectStorage { url: Url },

    #[snafu(display("The S3 URL '{url}' is missing the bucket name"))]
    MissingBucket { url: Url },

    #[snafu(display("The URL '{url}' must name both a bucket and an object key"))]
    ArchiveUrlInvalid { url: Url },

    #[snafu(display(
        "The S3 bucket '{bucket}' either doesn't exist, or your IAM identity is not granted access"
    ))]
    BucketInvalidOrNotAccessible {
        bucket: String,
        source: aws_sdk_s3::types::SdkError<aws_sdk_s3::error::HeadBucketError>,
    },

    #[snafu(display("Error listing objects in S3 bucket '{bucket}' with prefix '{prefix}'"))]
    ListObjects {
        bucket: String,
        prefix: String,
        source: aws_sdk_s3::types::SdkError<aws_sdk_s3::error::ListObjectsV2Error>,
    },

    #[snafu(display("Error getting metadata about object '{key}' in S3 bucket '{bucket}'"))]
    HeadObject {
        bucket: String,
        key: String,
        source: aws_sdk_s3::types::SdkError<aws_sdk_s3::error::HeadObjectError>,
    },

    #[snafu(display("Error reading object '{key}' in S3 bucket '{bucket}'"))]
    GetObject {
        bucket: String,
        key: String,
        source: aws_sdk_s3::types::SdkError<aws_sdk_s3::error::GetObjectError>,
    },

    #[snafu(display("Error reading the body of object '{key}' in S3 bucket '{bucket}'"))]
    ReadObjectBody {
        bucket: String,
        key: String,
        source: aws_smithy_http::byte_stream::Error,
    },

    #[snafu(display("Error writing object '{key}' to S3 bucket '{bucket}'"))]
    PutObject {
        bucket: String,
        key: String,
        source: aws_sdk_s3::types::SdkError<aws_sdk_s3::error::PutObjectError>,
    },

    #[snafu(display("Error starting multipart upload of object '{key}' to S3 bucket '{bucket}'"))]
    CreateMultipartUpload {
        bucket: String,
        key: String,
        source: aws_sdk_s3::types::SdkError<aws_sdk_s3::error::CreateMultipartUploadError>,
    },

    #[snafu(display(
        "Error uploading part {part_number} of object '{key}' to S3 bucket '{bucket}'"
    ))]
    UploadPart {
        bucket: String,
        key: String,
        part_number: i32,
        source: aws_sdk_s3::types::SdkError<aws_sdk_s3::error::UploadPartError>,
    },

    #[snafu(display(
        "Error copying part {part_number} of object '{key}' in S3 bucket '{bucket}' from '{source_bucket}/{source_key}'"
    ))]
    UploadPartCopy {
        bucket: String,
        key: String,
        part_number: i32,
        source_bucket: String,
        source_key: String,
        source: aws_sdk_s3::types::SdkError<aws_sdk_s3::error::UploadPartCopyError>,
    },

    #[snafu(display("Error completing multipart upload of object '{key}' to S3 bucket '{bucket}'"))]
    CompleteMultipartUpload {
        bucket: String,
        key: String,
        source: aws_sdk_s3::types::SdkError<aws_sdk_s3::error::CompleteMultipartUploadError>,
    },

    #[snafu(display("Error aborting multipart upload of object '{key}' in S3 bucket '{bucket}'"))]
    AbortMultipartUpload {
        bucket: String,
        key: String,
        source: aws_sdk_s3::types::SdkError<aws_sdk_s3::error::AbortMultipartUploadError>,
    },

    #[snafu(display("Error deleting object '{key}' in S3 bucket '{bucket}'"))]
    DeleteObject {
        bucket: String,
        key: String,
        source: aws_sdk_s3::types::SdkError<aws_sdk_s3::error::DeleteObjectError>,
    },

    #[snafu(display(
        "The S3 API response for object '{key}' in bucket '{bucket}' is missing a required field; this is probably a bug in the S3-compatible endpoint"
    ))]
    IncompleteResponse { bucket: String, key: String },

    #[snafu(display(
        "Object '{key}' in bucket '{bucket}' is {size} bytes, which is larger than the maximum size a single part copy can read"
    ))]
    SourceTooLarge {
        bucket: String,
        key: String,
        size: u64,
    },

    #[snafu(display(
        "Object '{key}' in bucket '{bucket}' is {actual} bytes but was {expected} bytes when the archive was planned; it was probably overwritten while the archive was being created"
    ))]
    SourceSizeChanged {
        bucket: String,
        key: String,
        expected: u64,
        actual: u64,
    },

    #[snafu(display(
        "The planned archive is only {size} bytes, which is below the minimum multipart part size; it must be written with a single PutObject instead"
    ))]
    ArchiveTooSmall { size: u64 },

    #[snafu(display(
        "The planned archive is {size} bytes, which is larger than the maximum object size the store supports"
    ))]
    ArchiveTooLarge { size: u64 },

    #[snafu(display(
        "The archive needs {parts} multipart parts, which exceeds the 10,000 part limit; retry with a larger part size, or assemble in memory if the inputs are tiny"
    ))]
    PartBudgetExceeded { parts: usize },

    #[snafu(display("There are no objects to archive after applying the exclusion filters"))]
    NoInputObjects,

    #[snafu(display(
        "The tar header at offset {offset} has an invalid checksum; this doesn't look like an uncompressed tar archive"
    ))]
    MalformedArchive { offset: u64 },

    #[snafu(display("The archive ends in the middle of the tar member at offset {offset}"))]
    TruncatedArchive { offset: u64 },

    #[snafu(display("The operation was canceled before it could finish"))]
    Canceled,

    #[snafu(display("Error reading manifest file '{}'", path.display()))]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Manifest line {line} is not of the form 'bucket,key,size[,etag]': {content}"))]
    ManifestLine { line: usize, content: String },

    #[snafu(display(
        "Table of contents line {line} is not of the form 'name,offset,length,etag': {content}"
    ))]
    TocLine { line: usize, content: String },

    #[snafu(display("'{filter}' is not a valid extract filter; pass a member name, or a prefix ending in '/'"))]
    InvalidFilter { filter: String },

    #[snafu(display("The exclusion pattern '{pattern}' is not a valid pattern"))]
    InvalidExcludePattern {
        pattern: String,
        source: regex::Error,
    },

    #[snafu(display(
        "The name transform '{expression}' is not of the form 's|pattern|replacement|flags'"
    ))]
    InvalidNameTransform { expression: String },

    #[snafu(display("The pattern in name transform '{expression}' is not a valid regex"))]
    InvalidNameTransformPattern {
        expression: String,
        source: regex::Error,
    },

    #[snafu(display("The object key '{name}' can't be represented in a tar header"))]
    InvalidMemberName {
        name: String,
        source: std::io::Error,
    },
}
