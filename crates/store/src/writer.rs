//! Streaming content into a new row.
//!
//! The encoder runs on a blocking thread and spools the encoded bytes to an
//! anonymous temporary file, so their length is known before the row exists.
//! The row is then inserted with a `zeroblob` of that length and the spool is
//! copied into it through a blob handle, in bounded chunks, inside one
//! transaction. The write lock is held only for that copy. Nothing is
//! committed until the whole content is in place, so any failure (or dropping
//! the future) leaves no row behind.

use crate::cell::BlobCell;
use crate::error::{ErrorKind, Result};
use crate::models::{FileMeta, to_unix_millis, truncate_to_millis};
use crate::source::{BoxSyncRead, ContentSource};
use crate::table::TableRef;
use blobdir_codec::{Encoded, Encoder};
use exn::ResultExt;
use sqlx::SqlitePool;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom};
use tokio::io::AsyncReadExt;
use tracing::instrument;

/// Encoded bytes copied into the row per blob write.
pub const WRITE_CHUNK_SIZE: usize = 4 * 1024 * 1024;
const SPOOL_BUFFER_SIZE: usize = 256 * 1024;

/// Encode `reader` into a fresh anonymous temporary file, rewound to its start.
fn spool(encoder: &Encoder, reader: BoxSyncRead) -> Result<(Encoded, File)> {
    let file = tempfile::tempfile().or_raise(|| ErrorKind::Storage)?;
    let (encoded, writer) = encoder
        .encode(reader, BufWriter::with_capacity(SPOOL_BUFFER_SIZE, file))
        .map_err(ErrorKind::codec)?;
    let mut file = writer
        .into_inner()
        .map_err(|err| err.into_error())
        .or_raise(|| ErrorKind::Storage)?;
    file.seek(SeekFrom::Start(0)).or_raise(|| ErrorKind::Storage)?;
    Ok((encoded, file))
}

/// Insert `filename` with content from `source`, returning the stored row's
/// metadata.
#[instrument(skip_all, fields(table = %table, filename = %filename, source = %source.description(), stored, length))]
pub(crate) async fn write(
    pool: &SqlitePool,
    table: &TableRef,
    encoder: &Encoder,
    source: &dyn ContentSource,
    filename: &str,
) -> Result<FileMeta> {
    let queries = table.queries();
    // Answers the common case without reading the source. The UNIQUE
    // constraint still decides races.
    let taken: bool = sqlx::query_scalar(&queries.exists_file)
        .bind(filename)
        .fetch_one(pool)
        .await
        .or_raise(|| ErrorKind::Storage)?;
    if taken {
        exn::bail!(ErrorKind::AlreadyExists(filename.to_string()));
    }

    let declared_length = source.content_length().await?;
    let last_modified = truncate_to_millis(source.last_modified().await?);
    let reader = source.open().await?;
    let encoder = encoder.clone();
    let (encoded, spooled) = tokio::task::spawn_blocking(move || spool(&encoder, reader))
        .await
        .or_raise(|| ErrorKind::Storage)??;
    let digest = &encoded.digest;
    if let Some(declared) = declared_length
        && declared != digest.length()
    {
        tracing::warn!(declared, actual = digest.length(), "source length changed while it was being read");
    }
    let stored = spooled.metadata().or_raise(|| ErrorKind::Storage)?.len();

    let mut tx = pool.begin().await.or_raise(|| ErrorKind::Storage)?;
    let inserted = sqlx::query(&queries.insert_file)
        .bind(filename)
        .bind(i64::try_from(digest.length()).or_raise(|| ErrorKind::Storage)?)
        .bind(i64::try_from(stored).or_raise(|| ErrorKind::Storage)?)
        .bind(to_unix_millis(last_modified)?)
        .bind(encoded.flags.compressed)
        .bind(encoded.flags.encrypted)
        .bind(digest.sha256_hex())
        .execute(&mut *tx)
        .await
        .map_err(|err| ErrorKind::database(err, filename))?;

    let mut cell = BlobCell::open(tx, table, inserted.last_insert_rowid(), true)
        .await
        .or_raise(|| ErrorKind::Storage)?;
    let mut spooled = tokio::fs::File::from_std(spooled);
    let mut buffer = vec![0u8; stored.min(WRITE_CHUNK_SIZE as u64) as usize];
    let mut offset: u64 = 0;
    while offset < stored {
        let len = (stored - offset).min(WRITE_CHUNK_SIZE as u64) as usize;
        spooled
            .read_exact(&mut buffer[..len])
            .await
            .or_raise(|| ErrorKind::Storage)?;
        cell.write_at(offset, &buffer[..len]).await.or_raise(|| ErrorKind::Storage)?;
        offset += len as u64;
    }
    let tx = cell.finish().await.or_raise(|| ErrorKind::Storage)?;
    tx.commit().await.or_raise(|| ErrorKind::Storage)?;

    let span = tracing::Span::current();
    span.record("stored", stored);
    span.record("length", digest.length());
    tracing::info!("stored file");
    Ok(FileMeta {
        filename: filename.to_string(),
        content_length: digest.length(),
        last_modified,
        flags: encoded.flags,
        sha256_hex: Some(digest.sha256_hex().to_string()),
    })
}
