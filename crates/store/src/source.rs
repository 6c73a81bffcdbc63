//! Where content to be stored comes from.

use crate::error::{ErrorKind, Result};
use crate::models::{from_system_time, truncate_to_millis};
use async_trait::async_trait;
use bytes::Bytes;
use exn::{OptionExt, ResultExt};
use std::io::{Cursor, ErrorKind as IoErrorKind, Read};
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::sync::Mutex;

/// Blocking reader handed to the encoder on a blocking thread.
pub type BoxSyncRead = Box<dyn Read + Send + 'static>;

/// Something a [`FileStore`](crate::FileStore) can read content from.
///
/// Metadata is gathered asynchronously; the content itself is a blocking
/// [`Read`]er because it is consumed on a blocking thread by the encoder.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Human-readable origin, for logs and error messages.
    fn description(&self) -> String;

    /// Length of the content, if known up front.
    async fn content_length(&self) -> Result<Option<u64>>;

    /// Recorded as the stored file's last-modified time.
    async fn last_modified(&self) -> Result<UtcDateTime>;

    async fn exists(&self) -> Result<bool>;

    async fn open(&self) -> Result<BoxSyncRead>;
}

/// In-memory content.
#[derive(Clone, Debug)]
pub struct BytesSource {
    bytes: Bytes,
    last_modified: UtcDateTime,
}

impl BytesSource {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            last_modified: UtcDateTime::now(),
        }
    }

    pub fn with_last_modified(mut self, last_modified: UtcDateTime) -> Self {
        self.last_modified = last_modified;
        self
    }
}

#[async_trait]
impl ContentSource for BytesSource {
    fn description(&self) -> String {
        format!("{} in-memory bytes", self.bytes.len())
    }

    async fn content_length(&self) -> Result<Option<u64>> {
        Ok(Some(self.bytes.len() as u64))
    }

    async fn last_modified(&self) -> Result<UtcDateTime> {
        Ok(self.last_modified)
    }

    async fn exists(&self) -> Result<bool> {
        Ok(true)
    }

    async fn open(&self) -> Result<BoxSyncRead> {
        Ok(Box::new(Cursor::new(self.bytes.clone())))
    }
}

/// A file on the local filesystem. Its modification time is preserved.
#[derive(Clone, Debug)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn raise(&self, err: std::io::Error) -> crate::error::Error {
        let kind = match err.kind() {
            IoErrorKind::NotFound => ErrorKind::NotFound(self.path.display().to_string()),
            _ => ErrorKind::Storage,
        };
        exn::Exn::from(err).raise(kind)
    }
}

#[async_trait]
impl ContentSource for FileSource {
    fn description(&self) -> String {
        self.path.display().to_string()
    }

    async fn content_length(&self) -> Result<Option<u64>> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(|err| self.raise(err))?;
        Ok(Some(metadata.len()))
    }

    async fn last_modified(&self) -> Result<UtcDateTime> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(|err| self.raise(err))?;
        let modified = metadata.modified().map_err(|err| self.raise(err))?;
        Ok(truncate_to_millis(from_system_time(modified)?))
    }

    async fn exists(&self) -> Result<bool> {
        tokio::fs::try_exists(&self.path).await.or_raise(|| ErrorKind::Storage)
    }

    async fn open(&self) -> Result<BoxSyncRead> {
        let file = tokio::fs::File::open(&self.path).await.map_err(|err| self.raise(err))?;
        Ok(Box::new(file.into_std().await))
    }
}

/// A reader that can be consumed exactly once.
pub struct ReaderSource {
    reader: Mutex<Option<BoxSyncRead>>,
    content_length: Option<u64>,
    last_modified: UtcDateTime,
}

impl ReaderSource {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
            content_length: None,
            last_modified: UtcDateTime::now(),
        }
    }

    pub fn with_content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub fn with_last_modified(mut self, last_modified: UtcDateTime) -> Self {
        self.last_modified = last_modified;
        self
    }
}

impl std::fmt::Debug for ReaderSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderSource")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ContentSource for ReaderSource {
    fn description(&self) -> String {
        "one-shot reader".to_string()
    }

    async fn content_length(&self) -> Result<Option<u64>> {
        Ok(self.content_length)
    }

    async fn last_modified(&self) -> Result<UtcDateTime> {
        Ok(self.last_modified)
    }

    /// `false` once the reader has been handed out.
    async fn exists(&self) -> Result<bool> {
        Ok(self.reader.lock().await.is_some())
    }

    async fn open(&self) -> Result<BoxSyncRead> {
        self.reader
            .lock()
            .await
            .take()
            .ok_or_raise(|| ErrorKind::InvalidArgument("reader source has already been consumed".to_string()))
    }
}
