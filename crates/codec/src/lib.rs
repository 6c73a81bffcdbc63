//! Streaming encode/decode pipeline for stored file contents.
//!
//! File contents pass through an ordered chain of [`std::io`] decorators on
//! their way into storage, and through the inverse chain on the way out:
//!
//! - **Encode** ([`Encoder::encode`]): original bytes are hashed (SHA-256 and
//!   length, see [`HashingReader`]), compressed when a [`Compression`] level
//!   other than [`None`](Compression::None) is configured, then encrypted when
//!   a [`Secret`] is configured. Whenever either transform runs, a small
//!   [`Header`] is written in front of the payload.
//! - **Decode** ([`Decoder::decode_reader`]): the header is read back and
//!   checked against the [`CodecFlags`] recorded beside the payload, then the
//!   payload is decrypted and decompressed.
//!
//! Decoding never consults the encoder's configuration. Everything needed to
//! reverse the chain (algorithm, key derivation salt and cost, stream nonce)
//! travels in-band, so contents written under one configuration can be read
//! back after that configuration changes. Only the secret itself has to be
//! supplied by the reader.
//!
//! Encryption is AES-256-GCM in the STREAM construction over fixed-size
//! chunks, keyed by PBKDF2-HMAC-SHA256 with a fresh random salt per file.
//! Truncated, tampered, or wrongly-keyed content fails authentication instead
//! of producing garbage.
//!
//! Deflate is always available. Zstd is behind the `zstd` feature.

mod construct;
mod crypto;
pub mod error;
mod hash;
mod header;
mod ops;
mod pipeline;
mod util;

pub use crate::crypto::{CHUNK_SIZE, DEFAULT_ITERATIONS, DecryptReader, EncryptWriter, KeyParams, Secret};
pub use crate::hash::{ContentDigest, HashingReader};
pub use crate::header::Header;
pub use crate::pipeline::{DecodeReader, Decoder, Encoded, Encoder};

/// Compression effort applied before storage.
///
/// Defaults to [`None`](Self::None) (stored as-is). The actual level passed to
/// the encoder depends on the [`Algorithm`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(rename_all = "lowercase"))]
pub enum Compression {
    /// Uncompressed
    #[default]
    None,
    /// Fastest compression
    Low,
    /// Balanced speed and size
    Medium,
    /// Smallest output
    High,
}

/// A supported compression algorithm.
///
/// Variants gated behind feature flags are only available when the
/// corresponding feature is enabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(rename_all = "lowercase"))]
pub enum Algorithm {
    /// Raw DEFLATE stream (RFC 1951)
    #[default]
    Deflate,
    /// Zstandard frame
    #[cfg(feature = "zstd")]
    Zstd,
}

/// Which transforms were applied to a stored payload.
///
/// Recorded beside the payload (as row columns) and repeated inside the
/// payload's [`Header`]; decoding fails if the two disagree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CodecFlags {
    pub compressed: bool,
    pub encrypted: bool,
}
impl CodecFlags {
    /// No transforms; the payload is the original content with no header.
    pub const PLAIN: Self = Self { compressed: false, encrypted: false };

    #[inline]
    #[must_use]
    pub fn is_plain(&self) -> bool {
        !self.compressed && !self.encrypted
    }
}
