use crate::blob::RawBlob;
use crate::error::{ErrorKind, Result};
use crate::extract::BlobExtractor;
use crate::stream::{Buffer, ContentStream};
use async_trait::async_trait;
use blobdir_codec::Decoder;
use exn::ResultExt;
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const SPOOL_PREFIX: &str = "blobdir-";
const SPOOL_SUFFIX: &str = ".spool";

/// Spools the blob into a named temporary file and ends the transaction
/// before returning. Rewindable.
///
/// The temporary file is deleted when the stream is closed or dropped, when a
/// read from it fails, and when spooling itself fails.
#[derive(Clone, Debug, Default)]
pub struct FileExtractor {
    dir: Option<PathBuf>,
}

impl FileExtractor {
    /// Spool into `dir` instead of the system temporary directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: Some(dir.into()) }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn create_spool(&self) -> std::io::Result<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SPOOL_PREFIX).suffix(SPOOL_SUFFIX);
        match &self.dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    }
}

#[async_trait]
impl BlobExtractor for FileExtractor {
    fn name(&self) -> &str {
        "file"
    }

    fn is_buffered(&self) -> bool {
        true
    }

    async fn extract(&self, blob: RawBlob, decoder: Decoder) -> Result<ContentStream> {
        let filename = blob.filename().to_string();
        let flags = blob.flags();
        // Dropping `spool` on any early return deletes the file.
        let spool = self.create_spool().or_raise(|| ErrorKind::Storage)?;
        let handle = spool.as_file().try_clone().or_raise(|| ErrorKind::Storage)?;
        let mut file = tokio::fs::File::from_std(handle);
        let mut chunks = blob.into_chunks();
        while let Some(chunk) = chunks.try_next().await.map_err(ErrorKind::io)? {
            file.write_all(&chunk).await.or_raise(|| ErrorKind::Storage)?;
        }
        // Wait for tokio's background write to land before anyone reopens the file.
        file.flush().await.or_raise(|| ErrorKind::Storage)?;
        drop(file);
        tracing::debug!(filename, path = %spool.path().display(), "spooled blob to temporary file");
        ContentStream::buffered(filename, Buffer::Spooled(spool), decoder, flags)
    }
}
