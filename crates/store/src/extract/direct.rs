use crate::blob::RawBlob;
use crate::error::Result;
use crate::extract::BlobExtractor;
use crate::stream::ContentStream;
use async_trait::async_trait;
use blobdir_codec::Decoder;
use tokio_util::io::{StreamReader, SyncIoBridge};

/// Decodes straight off the database, one chunk at a time.
///
/// The returned stream keeps the blob's read transaction (and a pooled
/// connection) open until it is exhausted or dropped, and can't be rewound.
/// Its reads block on the async runtime, so consume it from
/// [`spawn_blocking`](tokio::task::spawn_blocking) or another non-runtime
/// thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectExtractor;

#[async_trait]
impl BlobExtractor for DirectExtractor {
    fn name(&self) -> &str {
        "direct"
    }

    fn is_buffered(&self) -> bool {
        false
    }

    async fn extract(&self, blob: RawBlob, decoder: Decoder) -> Result<ContentStream> {
        let filename = blob.filename().to_string();
        let flags = blob.flags();
        // Must be created inside the runtime; it captures the current handle.
        let reader = SyncIoBridge::new(StreamReader::new(blob.into_chunks()));
        Ok(ContentStream::direct(filename, Box::new(reader), decoder, flags))
    }
}
