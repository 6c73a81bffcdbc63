//! Driver-level access to one row's stored bytes.

use crate::cell::BlobCell;
use crate::error::{ErrorKind, Result};
use crate::table::TableRef;
use async_stream::stream;
use blobdir_codec::CodecFlags;
use bytes::Bytes;
use exn::{OptionExt, ResultExt};
use futures::Stream;
use sqlx::SqlitePool;
use std::io::Error as IoError;
use std::pin::Pin;
use tracing::instrument;

/// Bytes read from the cell per round trip.
pub const READ_CHUNK_SIZE: usize = 4 * 1024 * 1024;

pub type ChunkStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + 'static>>;

/// The stored (still encoded) bytes of one row, as a stream of chunks.
///
/// Owns a read transaction and an open blob handle for its whole lifetime:
/// every chunk comes from the same snapshot, even if the row is renamed or
/// deleted meanwhile. The transaction commits after the last chunk and rolls
/// back if the stream is dropped early.
pub struct RawBlob {
    filename: String,
    flags: CodecFlags,
    stored_length: u64,
    chunks: ChunkStream,
}

impl RawBlob {
    #[instrument(level = "debug", skip(pool, table), fields(table = %table, stored_length))]
    pub(crate) async fn open(pool: &SqlitePool, table: &TableRef, filename: &str) -> Result<Self> {
        let mut tx = pool.begin().await.or_raise(|| ErrorKind::Storage)?;
        let row: Option<(i64, bool, bool)> = sqlx::query_as(&table.queries().open_blob)
            .bind(filename)
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Storage)?;
        let (rowid, compressed, encrypted) = row.ok_or_raise(|| ErrorKind::NotFound(filename.to_string()))?;
        let cell = BlobCell::open(tx, table, rowid, false)
            .await
            .or_raise(|| ErrorKind::Storage)?;
        let stored_length = cell.size();
        tracing::Span::current().record("stored_length", stored_length);

        let chunks = stream! {
            let mut cell = cell;
            let mut offset: u64 = 0;
            while offset < stored_length {
                let len = (stored_length - offset).min(READ_CHUNK_SIZE as u64) as usize;
                match cell.read_at(offset, len).await {
                    Ok(chunk) => {
                        offset += len as u64;
                        yield Ok(Bytes::from(chunk));
                    },
                    Err(err) => {
                        yield Err(IoError::other(err));
                        return;
                    },
                }
            }
            match cell.finish().await {
                Ok(tx) => {
                    if let Err(err) = tx.commit().await {
                        yield Err(IoError::other(err));
                    }
                },
                Err(err) => yield Err(IoError::other(err)),
            }
        };

        Ok(Self {
            filename: filename.to_string(),
            flags: CodecFlags { compressed, encrypted },
            stored_length,
            chunks: Box::pin(chunks),
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Flags recorded on the row.
    pub fn flags(&self) -> CodecFlags {
        self.flags
    }

    /// Length of the encoded bytes (not the original content).
    pub fn stored_length(&self) -> u64 {
        self.stored_length
    }

    pub fn into_chunks(self) -> ChunkStream {
        self.chunks
    }
}

impl std::fmt::Debug for RawBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBlob")
            .field("filename", &self.filename)
            .field("flags", &self.flags)
            .field("stored_length", &self.stored_length)
            .finish_non_exhaustive()
    }
}
