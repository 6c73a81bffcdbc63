use crate::blob::RawBlob;
use crate::error::{ErrorKind, Result};
use crate::extract::BlobExtractor;
use crate::stream::{Buffer, ContentStream};
use async_trait::async_trait;
use blobdir_codec::Decoder;
use bytes::BytesMut;
use futures::TryStreamExt;

/// Upper bound on the up-front allocation; larger blobs grow as they arrive.
const MAX_PREALLOCATE: u64 = 64 * 1024 * 1024;

/// Reads the whole blob into memory and ends the transaction before
/// returning. Rewindable.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryExtractor;

#[async_trait]
impl BlobExtractor for MemoryExtractor {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_buffered(&self) -> bool {
        true
    }

    async fn extract(&self, blob: RawBlob, decoder: Decoder) -> Result<ContentStream> {
        let filename = blob.filename().to_string();
        let flags = blob.flags();
        let capacity = blob.stored_length().min(MAX_PREALLOCATE) as usize;
        let mut buffer = BytesMut::with_capacity(capacity);
        let mut chunks = blob.into_chunks();
        while let Some(chunk) = chunks.try_next().await.map_err(ErrorKind::io)? {
            buffer.extend_from_slice(&chunk);
        }
        tracing::debug!(filename, bytes = buffer.len(), "buffered blob in memory");
        ContentStream::buffered(filename, Buffer::Memory(buffer.freeze()), decoder, flags)
    }
}
