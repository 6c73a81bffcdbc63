//! Compression Operations

use crate::error::Result;
#[cfg(feature = "zstd")]
use crate::error::ErrorKind;
use crate::{Algorithm, Compression};
#[cfg(feature = "zstd")]
use exn::ResultExt;
use flate2::{Compression as FlateLevel, read::DeflateDecoder, write::DeflateEncoder};
use std::io::{Read, Result as IoResult, Write};
#[cfg(feature = "zstd")]
use zstd::stream::{read::Decoder as ZstdDecoder, write::Encoder as ZstdEncoder};

const DEFLATE_LEVELS: [u32; 3] = [1, 6, 9];
#[cfg(feature = "zstd")]
const ZSTD_LEVELS: [i32; 3] = [1, 3, 19];

impl Compression {
    /// Index into an algorithm's low/medium/high level table.
    fn slot(&self) -> Option<usize> {
        match self {
            Compression::None => None,
            Compression::Low => Some(0),
            Compression::Medium => Some(1),
            Compression::High => Some(2),
        }
    }
}

impl Algorithm {
    /// Wrap a reader with the matching decompression layer.
    pub fn wrap_reader<'a, R: Read + Send + 'a>(&self, reader: R) -> Result<Box<dyn Read + Send + 'a>> {
        Ok(match self {
            Algorithm::Deflate => Box::new(DeflateDecoder::new(reader)),
            #[cfg(feature = "zstd")]
            Algorithm::Zstd => Box::new(ZstdDecoder::new(reader).or_raise(|| ErrorKind::Encoder)?),
        })
    }
}

/// Compression stage of the encode chain.
///
/// Unlike a boxed writer, the concrete variants keep their `finish()` so the
/// trailing compressed frame is flushed and the inner writer handed back.
pub(crate) enum Compressor<W: Write> {
    Plain(W),
    Deflate(DeflateEncoder<W>),
    #[cfg(feature = "zstd")]
    Zstd(ZstdEncoder<'static, W>),
}

impl<W: Write> Compressor<W> {
    pub(crate) fn new(writer: W, algorithm: Algorithm, compression: Compression) -> Result<Self> {
        let Some(slot) = compression.slot() else {
            return Ok(Compressor::Plain(writer));
        };
        Ok(match algorithm {
            Algorithm::Deflate => Compressor::Deflate(DeflateEncoder::new(writer, FlateLevel::new(DEFLATE_LEVELS[slot]))),
            #[cfg(feature = "zstd")]
            Algorithm::Zstd => {
                Compressor::Zstd(ZstdEncoder::new(writer, ZSTD_LEVELS[slot]).or_raise(|| ErrorKind::Encoder)?)
            },
        })
    }

    pub(crate) fn finish(self) -> IoResult<W> {
        match self {
            Compressor::Plain(writer) => Ok(writer),
            Compressor::Deflate(encoder) => encoder.finish(),
            #[cfg(feature = "zstd")]
            Compressor::Zstd(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        match self {
            Compressor::Plain(writer) => writer.write(buf),
            Compressor::Deflate(encoder) => encoder.write(buf),
            #[cfg(feature = "zstd")]
            Compressor::Zstd(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> IoResult<()> {
        match self {
            Compressor::Plain(writer) => writer.flush(),
            Compressor::Deflate(encoder) => encoder.flush(),
            #[cfg(feature = "zstd")]
            Compressor::Zstd(encoder) => encoder.flush(),
        }
    }
}
