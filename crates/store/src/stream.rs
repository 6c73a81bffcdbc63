//! Decoded content of one stored file.

use crate::error::{ErrorKind, Result};
use crate::source::BoxSyncRead;
use blobdir_codec::{CodecFlags, DecodeReader, Decoder};
use bytes::Bytes;
use exn::{OptionExt, ResultExt};
use std::io::{BufReader, Cursor, Error as IoError, ErrorKind as IoErrorKind, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Encoded bytes materialised by a buffering extractor.
pub(crate) enum Buffer {
    Memory(Bytes),
    Spooled(NamedTempFile),
}

impl Buffer {
    fn open(&self) -> std::io::Result<BoxSyncRead> {
        Ok(match self {
            Buffer::Memory(bytes) => Box::new(Cursor::new(bytes.clone())),
            Buffer::Spooled(file) => Box::new(BufReader::new(file.reopen()?)),
        })
    }
}

/// Blocking reader over a stored file's original content.
///
/// Streams from buffering extractors can be [`rewind`](Self::rewind)ed and
/// no longer touch the database. Streams from the direct extractor hold a
/// read transaction until dropped and must be read off the async runtime.
///
/// Dropping or [`close`](Self::close)ing the stream releases everything it
/// holds, including any spooled temporary file. A failed read releases it
/// too: later reads fail and the stream can't be rewound.
pub struct ContentStream {
    filename: String,
    reader: Option<DecodeReader<'static, BoxSyncRead>>,
    buffer: Option<Buffer>,
    decoder: Decoder,
    flags: CodecFlags,
}

impl ContentStream {
    pub(crate) fn direct(filename: String, raw: BoxSyncRead, decoder: Decoder, flags: CodecFlags) -> Self {
        Self {
            filename,
            reader: Some(decoder.decode_reader(raw, flags)),
            buffer: None,
            decoder,
            flags,
        }
    }

    pub(crate) fn buffered(filename: String, buffer: Buffer, decoder: Decoder, flags: CodecFlags) -> Result<Self> {
        let raw = buffer.open().or_raise(|| ErrorKind::Storage)?;
        Ok(Self {
            filename,
            reader: Some(decoder.decode_reader(raw, flags)),
            buffer: Some(buffer),
            decoder,
            flags,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn flags(&self) -> CodecFlags {
        self.flags
    }

    /// Whether [`rewind`](Self::rewind) can succeed.
    pub fn is_rewindable(&self) -> bool {
        self.buffer.is_some()
    }

    /// Location of the spooled temporary file, if this stream has one.
    pub fn spool_path(&self) -> Option<&Path> {
        match &self.buffer {
            Some(Buffer::Spooled(file)) => Some(file.path()),
            _ => None,
        }
    }

    /// Start reading again from the beginning of the content.
    pub fn rewind(&mut self) -> Result<()> {
        let buffer = self.buffer.as_ref().ok_or_raise(|| {
            ErrorKind::InvalidArgument(format!("content stream for {} cannot be rewound", self.filename))
        })?;
        let raw = buffer.open().or_raise(|| ErrorKind::Storage)?;
        self.reader = Some(self.decoder.decode_reader(raw, self.flags));
        Ok(())
    }

    /// Read the rest of the content into memory.
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        self.read_to_end(&mut content).map_err(ErrorKind::io)?;
        Ok(content)
    }

    /// Copy the rest of the content into `writer`, returning the byte count.
    pub fn copy_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> Result<u64> {
        std::io::copy(self, writer).map_err(ErrorKind::io)
    }

    /// Release the stream and everything it holds.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.reader = None;
        if let Some(Buffer::Spooled(file)) = self.buffer.take() {
            let path = file.path().to_path_buf();
            match file.close() {
                Ok(()) => tracing::debug!(filename = %self.filename, path = %path.display(), "released spooled content"),
                Err(err) => tracing::warn!(filename = %self.filename, path = %path.display(), error = %err, "failed to remove spooled content"),
            }
        }
    }
}

impl Read for ContentStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(IoError::new(IoErrorKind::BrokenPipe, "content stream was released after a failed read"));
        };
        match reader.read(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == IoErrorKind::Interrupted => Err(err),
            Err(err) => {
                tracing::debug!(filename = %self.filename, error = %err, "content stream failed; releasing");
                self.release();
                Err(err)
            },
        }
    }
}

impl std::fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStream")
            .field("filename", &self.filename)
            .field("flags", &self.flags)
            .field("rewindable", &self.is_rewindable())
            .finish_non_exhaustive()
    }
}
