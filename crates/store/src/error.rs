//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Codec failures keep their own frame
//! as a child of the store error that wraps them.

use blobdir_codec::error::{Error as CodecError, ErrorKind as CodecErrorKind};
use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied something unusable (empty filename, empty secret,
    /// a stream that can't be rewound, ...).
    #[display("invalid argument: {_0}")]
    InvalidArgument(#[error(not(source))] String),
    #[display("file not found: {_0}")]
    NotFound(#[error(not(source))] String),
    #[display("file already exists: {_0}")]
    AlreadyExists(#[error(not(source))] String),
    /// Stored content failed to decode: tampered, truncated, written in an
    /// unknown format, or encrypted under a different secret.
    #[display("stored content is corrupt or unreadable")]
    CorruptContent,
    /// The database or a temporary file failed underneath us.
    #[display("storage error")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage)
    }

    /// Convert a codec error into a store error, preserving the codec
    /// crate's `Exn` frame as a child in its own error tree.
    #[track_caller]
    pub fn codec(err: CodecError) -> Error {
        let kind = Self::from_codec(&err);
        err.raise(kind)
    }

    /// Convert an io error coming out of a content stream, recognising codec
    /// failures carried inside it.
    #[track_caller]
    pub fn io(err: IoError) -> Error {
        let kind = CodecErrorKind::from_io(&err).map_or(Self::Storage, Self::from_codec);
        exn::Exn::from(err).raise(kind)
    }

    fn from_codec(kind: &CodecErrorKind) -> Self {
        match kind {
            CodecErrorKind::InvalidData
            | CodecErrorKind::UnsupportedFormat(_)
            | CodecErrorKind::DisabledFormat(_)
            | CodecErrorKind::Authentication => Self::CorruptContent,
            CodecErrorKind::MissingSecret => Self::InvalidArgument("encrypted content requires a secret".to_string()),
            CodecErrorKind::InvalidSecret(reason) => Self::InvalidArgument(format!("invalid secret: {reason}")),
            CodecErrorKind::Encoder | CodecErrorKind::Io => Self::Storage,
        }
    }

    /// Map a database error, turning UNIQUE constraint violations into
    /// [`AlreadyExists`](Self::AlreadyExists) for `filename`.
    #[track_caller]
    pub(crate) fn database(err: sqlx::Error, filename: &str) -> Error {
        let kind = match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::AlreadyExists(filename.to_string()),
            _ => Self::Storage,
        };
        exn::Exn::from(err).raise(kind)
    }
}
