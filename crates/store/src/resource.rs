use crate::error::{ErrorKind, Result};
use crate::models::FileMeta;
use crate::source::{BoxSyncRead, ContentSource};
use crate::store::FileStore;
use crate::stream::ContentStream;
use async_trait::async_trait;
use blobdir_codec::CodecFlags;
use exn::ResultExt;
use time::UtcDateTime;

/// Handle to one stored file.
///
/// Metadata is a snapshot taken when the handle was created. The handle
/// holds no connection; [`exists`](Self::exists) and [`open`](Self::open)
/// go back to the database each time, so they observe later renames and
/// deletes.
#[derive(Clone, Debug)]
pub struct Resource {
    store: FileStore,
    meta: FileMeta,
}

impl Resource {
    pub(crate) fn new(store: FileStore, meta: FileMeta) -> Self {
        Self { store, meta }
    }

    pub fn filename(&self) -> &str {
        &self.meta.filename
    }

    /// Length of the original content.
    pub fn content_length(&self) -> u64 {
        self.meta.content_length
    }

    pub fn last_modified(&self) -> UtcDateTime {
        self.meta.last_modified
    }

    pub fn sha256_hex(&self) -> Option<&str> {
        self.meta.sha256_hex.as_deref()
    }

    pub fn flags(&self) -> CodecFlags {
        self.meta.flags
    }

    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }

    pub async fn exists(&self) -> Result<bool> {
        self.store.exists(&self.meta.filename).await
    }

    /// Open the current content through the store's extractor.
    ///
    /// Fails with [`NotFound`](ErrorKind::NotFound) if the file has been
    /// deleted or renamed since this handle was created.
    pub async fn open(&self) -> Result<ContentStream> {
        self.store.open_stream(&self.meta.filename).await
    }

    /// Read the whole content into memory.
    pub async fn read_all(&self) -> Result<Vec<u8>> {
        let mut stream = self.open().await?;
        tokio::task::spawn_blocking(move || stream.read_to_vec())
            .await
            .or_raise(|| ErrorKind::Storage)?
    }
}

/// A stored file can be copied into another store.
#[async_trait]
impl ContentSource for Resource {
    fn description(&self) -> String {
        format!("{}:{}", self.store.config().table(), self.meta.filename)
    }

    async fn content_length(&self) -> Result<Option<u64>> {
        Ok(Some(self.meta.content_length))
    }

    async fn last_modified(&self) -> Result<UtcDateTime> {
        Ok(self.meta.last_modified)
    }

    async fn exists(&self) -> Result<bool> {
        Resource::exists(self).await
    }

    async fn open(&self) -> Result<BoxSyncRead> {
        Ok(Box::new(Resource::open(self).await?))
    }
}
