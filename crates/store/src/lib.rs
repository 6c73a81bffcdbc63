//! A directory of files kept as rows of a single SQLite table.
//!
//! Each file is one row: its name (unique), the length and SHA-256 of its
//! original content, a last-modified timestamp, flags describing how the
//! content was encoded, and the encoded bytes themselves. A [`FileStore`]
//! offers directory-like operations over that table: store, list with glob
//! filters, get, rename, delete.
//!
//! Content never has to fit in memory on the way in: it is encoded on a
//! blocking thread into a temporary spool, then copied into the row through
//! SQLite's incremental blob I/O in bounded chunks inside one transaction. On the way out, a [`BlobExtractor`] decides whether the
//! encoded bytes are decoded straight off the database ([`DirectExtractor`]),
//! or first buffered in memory ([`MemoryExtractor`]) or in a temporary file
//! ([`FileExtractor`]) so the read transaction can end early.
//!
//! ```no_run
//! use blobdir_store::{BytesSource, Database, ExtractorKind, FileStore};
//! use blobdir_codec::Compression;
//!
//! # async fn example() -> blobdir_store::error::Result<()> {
//! let db = Database::connect("files.db", None).await?;
//! let store = FileStore::new(db.pool().clone(), "files", ExtractorKind::File.handle())?
//!     .with_compression(Compression::Medium);
//! store.ensure_table().await?;
//!
//! store.store(&BytesSource::new(&b"hello"[..]), "hello.txt").await?;
//! for resource in store.list(&["*.txt"]).await? {
//!     let content = resource.read_all().await?;
//!     println!("{}: {} bytes", resource.filename(), content.len());
//! }
//! # Ok(())
//! # }
//! ```

mod blob;
mod cell;
mod db;
pub mod error;
mod extract;
mod models;
pub mod pattern;
mod resource;
mod source;
mod store;
mod stream;
mod table;
mod writer;

pub use crate::blob::{ChunkStream, READ_CHUNK_SIZE, RawBlob};
pub use crate::db::{Database, MAX_CONNECTIONS};
pub use crate::extract::{BlobExtractor, DirectExtractor, ExtractorHandle, ExtractorKind, FileExtractor, MemoryExtractor};
pub use crate::models::FileMeta;
pub use crate::resource::Resource;
pub use crate::source::{BoxSyncRead, BytesSource, ContentSource, FileSource, ReaderSource};
pub use crate::store::{FileStore, StoreConfig};
pub use crate::stream::ContentStream;
pub use crate::table::{TableRef, quote_identifier};
pub use crate::writer::WRITE_CHUNK_SIZE;
