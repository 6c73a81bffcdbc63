//! Blob extraction strategies.
//!
//! An extractor turns a [`RawBlob`] (the encoded bytes of one row, read in
//! place through a blob handle inside a read transaction) into a
//! [`ContentStream`] of decoded content. Each chunk read costs only its own
//! bytes, so streaming memory is one chunk at a time. The strategies differ
//! in when the read transaction ends:
//!
//! | Strategy | Transaction ends | Memory | Rewindable |
//! |---|---|---|---|
//! | [`DirectExtractor`] | when the stream is dropped or exhausted | one chunk | no |
//! | [`MemoryExtractor`] | before `extract` returns | whole blob | yes |
//! | [`FileExtractor`] | before `extract` returns | one chunk while spooling to a temp file | yes |
//!
//! All three decode lazily: nothing is decompressed or decrypted until the
//! returned stream is read.

mod direct;
mod file;
mod memory;

pub use self::direct::DirectExtractor;
pub use self::file::FileExtractor;
pub use self::memory::MemoryExtractor;
use crate::blob::RawBlob;
use crate::error::{Error, ErrorKind, Result};
use crate::stream::ContentStream;
use async_trait::async_trait;
use blobdir_codec::Decoder;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::sync::Arc;

/// Shared, type-erased extractor as held by a store configuration.
pub type ExtractorHandle = Arc<dyn BlobExtractor>;

/// Strategy for getting a row's content out of the database.
#[async_trait]
pub trait BlobExtractor: Debug + Send + Sync {
    /// Name of the strategy (for logging only).
    fn name(&self) -> &str;

    /// Whether the whole blob is materialised before `extract` returns, so
    /// that the returned stream no longer depends on the database.
    fn is_buffered(&self) -> bool;

    /// Consume the raw blob and return a stream of decoded content.
    async fn extract(&self, blob: RawBlob, decoder: Decoder) -> Result<ContentStream>;
}

/// Configuration-friendly name for the built-in extractors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(rename_all = "lowercase"))]
pub enum ExtractorKind {
    Direct,
    Memory,
    #[default]
    File,
}

impl ExtractorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractorKind::Direct => "direct",
            ExtractorKind::Memory => "memory",
            ExtractorKind::File => "file",
        }
    }

    /// Build the extractor with its default settings.
    pub fn handle(&self) -> ExtractorHandle {
        match self {
            ExtractorKind::Direct => Arc::new(DirectExtractor),
            ExtractorKind::Memory => Arc::new(MemoryExtractor),
            ExtractorKind::File => Arc::new(FileExtractor::default()),
        }
    }
}

impl Display for ExtractorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractorKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "direct" | "streaming" => Ok(ExtractorKind::Direct),
            "memory" => Ok(ExtractorKind::Memory),
            "file" | "tempfile" => Ok(ExtractorKind::File),
            _ => exn::bail!(ErrorKind::InvalidArgument(format!("unknown extractor: {s}"))),
        }
    }
}
