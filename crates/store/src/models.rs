use crate::error::{Error, ErrorKind, Result};
use blobdir_codec::CodecFlags;
use exn::ResultExt;
use std::time::SystemTime;
use time::{OffsetDateTime, UtcDateTime};

const NANOS_PER_MILLI: i128 = 1_000_000;

/// Everything about a stored file except its content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMeta {
    pub filename: String,
    /// Length of the original content, before compression and encryption.
    pub content_length: u64,
    /// Millisecond precision.
    pub last_modified: UtcDateTime,
    pub flags: CodecFlags,
    /// Lowercase hex SHA-256 of the original content.
    pub sha256_hex: Option<String>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct FileRow {
    filename: String,
    content_length: i64,
    last_modified: i64,
    compressed: bool,
    encrypted: bool,
    sha256_hex: Option<String>,
}

impl TryFrom<FileRow> for FileMeta {
    type Error = Error;
    fn try_from(row: FileRow) -> Result<Self> {
        Ok(Self {
            content_length: u64::try_from(row.content_length).or_raise(|| ErrorKind::CorruptContent)?,
            last_modified: from_unix_millis(row.last_modified)?,
            flags: CodecFlags {
                compressed: row.compressed,
                encrypted: row.encrypted,
            },
            sha256_hex: row.sha256_hex,
            filename: row.filename,
        })
    }
}

pub(crate) fn to_unix_millis(at: UtcDateTime) -> Result<i64> {
    i64::try_from(at.unix_timestamp_nanos().div_euclid(NANOS_PER_MILLI))
        .or_raise(|| ErrorKind::InvalidArgument("timestamp out of range".to_string()))
}

pub(crate) fn from_unix_millis(millis: i64) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp_nanos(i128::from(millis) * NANOS_PER_MILLI).or_raise(|| ErrorKind::CorruptContent)
}

/// Drop sub-millisecond precision, matching what the table can hold.
pub(crate) fn truncate_to_millis(at: UtcDateTime) -> UtcDateTime {
    let nanos = at.unix_timestamp_nanos();
    UtcDateTime::from_unix_timestamp_nanos(nanos - nanos.rem_euclid(NANOS_PER_MILLI)).unwrap_or(at)
}

pub(crate) fn from_system_time(at: SystemTime) -> Result<UtcDateTime> {
    let offset = OffsetDateTime::from(at);
    UtcDateTime::from_unix_timestamp_nanos(offset.unix_timestamp_nanos())
        .or_raise(|| ErrorKind::InvalidArgument("timestamp out of range".to_string()))
}
