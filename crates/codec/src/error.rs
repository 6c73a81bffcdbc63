//! Codec Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Decoding happens inside [`Read`](std::io::Read) implementations, which can
//! only return [`std::io::Error`]. Codec failures raised there are carried as
//! the io error's inner value; [`ErrorKind::from_io`] recovers them.

use derive_more::{Display, Error};
use std::io::{Error as IoError, ErrorKind as IoErrorKind};

/// A codec error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Failed to initialize an encoder/decoder for the requested format.
    Encoder,
    /// Data is corrupt or malformed. Don't retry with the same input.
    #[display("invalid or corrupted data")]
    InvalidData,
    /// The header names a format, version or option this crate doesn't know.
    #[display("unsupported format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
    /// The header names a format that is supported but not enabled.
    #[display("disabled format: {_0}")]
    DisabledFormat(#[error(not(source))] String),
    /// Authenticated decryption failed: the content was altered, truncated,
    /// or the secret is wrong.
    #[display("authentication failed")]
    Authentication,
    /// Content is encrypted but no secret was supplied.
    #[display("encrypted content requires a secret")]
    MissingSecret,
    #[display("invalid secret: {_0}")]
    InvalidSecret(#[error(not(source))] &'static str),
    /// An I/O operation failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }

    /// Returns `true` if the stored bytes themselves are at fault.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidData
                | ErrorKind::UnsupportedFormat(_)
                | ErrorKind::DisabledFormat(_)
                | ErrorKind::Authentication
        )
    }

    /// Recover the codec error carried by an [`IoError`] returned from one of
    /// this crate's readers or writers.
    pub fn from_io(err: &IoError) -> Option<&ErrorKind> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<ErrorKind>())
    }

    pub(crate) fn into_io(self) -> IoError {
        let kind = match self {
            ErrorKind::Io => IoErrorKind::Other,
            _ => IoErrorKind::InvalidData,
        };
        IoError::new(kind, self)
    }
}
