use crate::crypto::{DecryptReader, EncryptWriter, KeyParams, Secret};
use crate::error::{ErrorKind, Result};
use crate::hash::{ContentDigest, HashingReader};
use crate::header::Header;
use crate::ops::Compressor;
use crate::{Algorithm, CodecFlags, Compression};
use derive_more::{Display, Error};
use exn::{OptionExt, ResultExt};
use std::io::{Error as IoError, Read, Result as IoResult, Write};
use tracing::instrument;

/// Outcome of a successful [`Encoder::encode`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Encoded {
    pub flags: CodecFlags,
    /// Length and SHA-256 of the original content.
    pub digest: ContentDigest,
}

/// Encryption stage of the encode chain.
enum Sealer<W: Write> {
    Plain(W),
    Sealed(EncryptWriter<W>),
}

impl<W: Write> Sealer<W> {
    fn finish(self) -> IoResult<W> {
        match self {
            Sealer::Plain(writer) => Ok(writer),
            Sealer::Sealed(writer) => writer.finish(),
        }
    }
}

impl<W: Write> Write for Sealer<W> {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        match self {
            Sealer::Plain(writer) => writer.write(buf),
            Sealer::Sealed(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> IoResult<()> {
        match self {
            Sealer::Plain(writer) => writer.flush(),
            Sealer::Sealed(writer) => writer.flush(),
        }
    }
}

/// Write-side configuration: how new content is transformed before storage.
#[derive(Clone, Debug, Default)]
pub struct Encoder {
    compression: Compression,
    algorithm: Algorithm,
    secret: Option<Secret>,
}

impl Encoder {
    pub fn new(compression: Compression, algorithm: Algorithm, secret: Option<Secret>) -> Self {
        Self {
            compression,
            algorithm,
            secret,
        }
    }

    /// Flags that content encoded by this encoder will carry.
    pub fn flags(&self) -> CodecFlags {
        CodecFlags {
            compressed: self.compression.is_enabled(),
            encrypted: self.secret.is_some(),
        }
    }

    /// Stream `reader` through hash → compress → encrypt into `writer`.
    ///
    /// Returns the writer so callers can finalize whatever sink it wraps.
    #[instrument(skip_all, fields(
        compression = %self.compression,
        algorithm = %self.algorithm,
        encrypted = self.secret.is_some(),
        length,
    ))]
    pub fn encode<R: Read, W: Write>(&self, reader: R, mut writer: W) -> Result<(Encoded, W)> {
        let flags = self.flags();
        let params: Option<KeyParams> = self.secret.as_ref().map(Secret::generate_params);
        if !flags.is_plain() {
            let header = Header {
                algorithm: flags.compressed.then_some(self.algorithm),
                encryption: params.clone(),
            };
            header.write_to(&mut writer).or_raise(|| ErrorKind::Io)?;
        }
        let sealer = match (&self.secret, &params) {
            (Some(secret), Some(params)) => Sealer::Sealed(EncryptWriter::new(writer, secret, params)),
            _ => Sealer::Plain(writer),
        };
        let mut compressor = Compressor::new(sealer, self.algorithm, self.compression)?;
        let mut hashing = HashingReader::new(reader);
        std::io::copy(&mut hashing, &mut compressor).map_err(raise_io)?;
        let writer = compressor.finish().and_then(Sealer::finish).map_err(raise_io)?;
        let digest = hashing.digest();
        tracing::Span::current().record("length", digest.length());
        Ok((Encoded { flags, digest }, writer))
    }
}

/// Read-side configuration. Only the secret is needed; everything else is
/// recovered from the content header.
#[derive(Clone, Debug, Default)]
pub struct Decoder {
    secret: Option<Secret>,
}

impl Decoder {
    pub fn new(secret: Option<Secret>) -> Self {
        Self { secret }
    }

    /// Wrap a reader over stored bytes in the decode chain.
    ///
    /// Nothing is read until the first call to [`Read::read`] on the result,
    /// so this is safe to call from async code and hand off to a blocking
    /// thread afterwards.
    pub fn decode_reader<'a, R: Read + Send + 'a>(&self, reader: R, flags: CodecFlags) -> DecodeReader<'a, R> {
        DecodeReader {
            state: State::Pending(reader),
            decoder: self.clone(),
            flags,
        }
    }

    /// Decode everything from `reader` into `writer`, returning the number of
    /// original bytes written.
    pub fn decode<R: Read + Send, W: Write>(&self, reader: R, flags: CodecFlags, writer: &mut W) -> Result<u64> {
        let mut decoding = self.decode_reader(reader, flags);
        std::io::copy(&mut decoding, writer).map_err(raise_io)
    }

    fn chain<'a, R: Read + Send + 'a>(&self, reader: R, flags: CodecFlags) -> Result<Box<dyn Read + Send + 'a>> {
        let mut reader = SourceReader(reader);
        if flags.is_plain() {
            return Ok(Box::new(reader));
        }
        let header = Header::read_from(&mut reader)?;
        if header.flags() != flags {
            tracing::warn!(recorded = ?flags, found = ?header.flags(), "content header disagrees with recorded flags");
            exn::bail!(ErrorKind::InvalidData);
        }
        let mut chained: Box<dyn Read + Send + 'a> = Box::new(reader);
        if let Some(params) = &header.encryption {
            let secret = self.secret.as_ref().ok_or_raise(|| ErrorKind::MissingSecret)?;
            chained = Box::new(DecryptReader::new(chained, secret, params));
        }
        if let Some(algorithm) = header.algorithm {
            chained = algorithm.wrap_reader(chained)?;
        }
        Ok(chained)
    }
}

enum State<'a, R> {
    Pending(R),
    Active(Box<dyn Read + Send + 'a>),
    Failed(ErrorKind),
}

/// Lazily-initialised decode chain returned by [`Decoder::decode_reader`].
///
/// Errors are [`std::io::Error`]s; codec failures can be recovered from them
/// with [`ErrorKind::from_io`]. Once the header has failed to parse, every
/// subsequent read fails the same way.
pub struct DecodeReader<'a, R> {
    state: State<'a, R>,
    decoder: Decoder,
    flags: CodecFlags,
}

impl<'a, R: Read + Send + 'a> Read for DecodeReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        if matches!(self.state, State::Pending(_)) {
            self.state = match std::mem::replace(&mut self.state, State::Failed(ErrorKind::Io)) {
                State::Pending(reader) => match self.decoder.chain(reader, self.flags) {
                    Ok(chained) => State::Active(chained),
                    Err(err) => State::Failed((*err).clone()),
                },
                other => other,
            };
        }
        match &mut self.state {
            State::Active(reader) => reader.read(buf).map_err(classify),
            State::Failed(kind) => Err(kind.clone().into_io()),
            State::Pending(_) => Ok(0),
        }
    }
}

/// Failure reported by the reader underneath the decode chain, as opposed to
/// one raised by a decoding layer above it.
#[derive(Debug, Display, Error)]
#[display("{_0}")]
pub(crate) struct SourceError(IoError);

impl SourceError {
    pub(crate) fn carried_by(err: &IoError) -> bool {
        err.get_ref().is_some_and(|inner| inner.is::<SourceError>())
    }

    /// Hand back the reader's own error, unchanged.
    fn unwrap(err: IoError) -> IoError {
        if !Self::carried_by(&err) {
            return err;
        }
        match err.into_inner().map(|inner| inner.downcast::<SourceError>()) {
            Some(Ok(source)) => source.0,
            Some(Err(other)) => IoError::other(other),
            None => IoError::from(std::io::ErrorKind::Other),
        }
    }
}

/// Marks errors coming out of the stored-bytes reader so they survive the
/// decoding layers without being mistaken for malformed content.
struct SourceReader<R>(R);

impl<R: Read> Read for SourceReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        self.0.read(buf).map_err(|err| {
            if ErrorKind::from_io(&err).is_some() || err.kind() == std::io::ErrorKind::Interrupted {
                err
            } else {
                IoError::new(err.kind(), SourceError(err))
            }
        })
    }
}

/// Decompressors report malformed input as plain io errors; tag those as
/// corrupt data. Codec errors pass through, and storage failures from the
/// underlying reader are handed back as the reader reported them.
fn classify(err: IoError) -> IoError {
    use std::io::ErrorKind as IoErrorKind;
    if ErrorKind::from_io(&err).is_some() {
        return err;
    }
    if SourceError::carried_by(&err) {
        return SourceError::unwrap(err);
    }
    match err.kind() {
        IoErrorKind::InvalidInput | IoErrorKind::InvalidData | IoErrorKind::UnexpectedEof => {
            tracing::debug!(error = %err, "stored content failed to decompress");
            ErrorKind::InvalidData.into_io()
        },
        _ => err,
    }
}

/// Convert an io error from the chain back into a codec error, keeping any
/// codec kind it carries.
fn raise_io(err: std::io::Error) -> exn::Exn<ErrorKind> {
    let kind = ErrorKind::from_io(&err).cloned().unwrap_or(ErrorKind::Io);
    exn::Exn::from(err).raise(kind)
}
