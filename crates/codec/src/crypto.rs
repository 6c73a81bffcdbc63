//! Chunked authenticated encryption.
//!
//! Plaintext is cut into [`CHUNK_SIZE`] pieces and sealed with AES-256-GCM
//! using the STREAM construction (big-endian 32-bit counter plus a last-chunk
//! flag folded into the nonce). Reordering, truncating or extending the
//! ciphertext makes a chunk fail authentication.

use crate::error::{ErrorKind, Result};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::stream::{DecryptorBE32, EncryptorBE32};
use aes_gcm::aead::OsRng;
use aes_gcm::{Aes256Gcm, Key, KeyInit};
use sha2::Sha256;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::io::{Read, Result as IoResult, Write};
use std::sync::Arc;

/// Plaintext bytes per sealed chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;
const TAG_SIZE: usize = 16;
const SEALED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_SIZE;

pub const SALT_LEN: usize = 16;
/// STREAM nonce prefix; the remaining 5 bytes of the 96-bit nonce are the
/// chunk counter and last-chunk flag.
pub const NONCE_LEN: usize = 7;

/// PBKDF2 rounds used unless overridden with [`Secret::with_iterations`].
pub const DEFAULT_ITERATIONS: u32 = 310_000;
pub(crate) const MAX_ITERATIONS: u32 = 10_000_000;

/// Shared secret that keys content encryption.
///
/// Cheap to clone. The secret bytes are never printed.
#[derive(Clone)]
pub struct Secret {
    bytes: Arc<[u8]>,
    iterations: u32,
}

impl Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Secret")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl Secret {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let bytes = secret.as_ref();
        if bytes.is_empty() {
            exn::bail!(ErrorKind::InvalidSecret("secret must not be empty"));
        }
        Ok(Self {
            bytes: Arc::from(bytes),
            iterations: DEFAULT_ITERATIONS,
        })
    }

    /// Build a secret from a character sequence (encoded as UTF-8).
    pub fn from_chars(chars: &[char]) -> Result<Self> {
        Self::new(chars.iter().collect::<String>())
    }

    /// Key derivation cost for content encrypted from now on.
    ///
    /// Existing content records its own cost in its header and is unaffected.
    pub fn with_iterations(mut self, iterations: u32) -> Result<Self> {
        if iterations == 0 || iterations > MAX_ITERATIONS {
            exn::bail!(ErrorKind::InvalidSecret("iteration count out of range"));
        }
        self.iterations = iterations;
        Ok(self)
    }

    #[inline]
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Fresh random parameters for one piece of content.
    pub(crate) fn generate_params(&self) -> KeyParams {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);
        KeyParams {
            iterations: self.iterations,
            salt,
            nonce,
        }
    }

    fn cipher(&self, params: &KeyParams) -> Aes256Gcm {
        let mut key = Key::<Aes256Gcm>::default();
        pbkdf2::pbkdf2_hmac::<Sha256>(&self.bytes, &params.salt, params.iterations, &mut key);
        Aes256Gcm::new(&key)
    }
}

/// Per-content key derivation and nonce parameters, stored in the header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyParams {
    pub iterations: u32,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
}

/// Encrypting writer. Must be [`finish`](Self::finish)ed to seal the last
/// chunk; dropping it early leaves undecryptable output.
pub struct EncryptWriter<W: Write> {
    inner: W,
    encryptor: EncryptorBE32<Aes256Gcm>,
    buffer: Vec<u8>,
}

impl<W: Write> EncryptWriter<W> {
    pub fn new(inner: W, secret: &Secret, params: &KeyParams) -> Self {
        let encryptor = EncryptorBE32::from_aead(secret.cipher(params), GenericArray::from_slice(&params.nonce));
        Self {
            inner,
            encryptor,
            buffer: Vec::with_capacity(CHUNK_SIZE + 1),
        }
    }

    pub fn finish(self) -> IoResult<W> {
        let Self {
            mut inner,
            encryptor,
            buffer,
        } = self;
        let sealed = encryptor
            .encrypt_last(buffer.as_slice())
            .map_err(|_| ErrorKind::Encoder.into_io())?;
        inner.write_all(&sealed)?;
        inner.flush()?;
        Ok(inner)
    }
}

impl<W: Write> Write for EncryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.buffer.extend_from_slice(buf);
        // Keep at least one byte back: the final chunk is sealed differently
        // and only `finish` knows which one that is.
        while self.buffer.len() > CHUNK_SIZE {
            let sealed = self
                .encryptor
                .encrypt_next(&self.buffer[..CHUNK_SIZE])
                .map_err(|_| ErrorKind::Encoder.into_io())?;
            self.inner.write_all(&sealed)?;
            self.buffer.drain(..CHUNK_SIZE);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        self.inner.flush()
    }
}

/// Decrypting reader.
///
/// Authentication failures surface as [`std::io::ErrorKind::InvalidData`]
/// carrying [`ErrorKind::Authentication`].
pub struct DecryptReader<R> {
    inner: R,
    decryptor: Option<DecryptorBE32<Aes256Gcm>>,
    pending: Vec<u8>,
    plain: Vec<u8>,
    pos: usize,
}

impl<R: Read> DecryptReader<R> {
    pub fn new(inner: R, secret: &Secret, params: &KeyParams) -> Self {
        let decryptor = DecryptorBE32::from_aead(secret.cipher(params), GenericArray::from_slice(&params.nonce));
        Self {
            inner,
            decryptor: Some(decryptor),
            pending: Vec::with_capacity(SEALED_CHUNK_SIZE + 1),
            plain: Vec::new(),
            pos: 0,
        }
    }

    /// Read ahead one byte past a full sealed chunk, so that a chunk is known
    /// to be the last one exactly when nothing follows it.
    fn fill(&mut self) -> IoResult<()> {
        let need = (SEALED_CHUNK_SIZE + 1).saturating_sub(self.pending.len());
        if need > 0 {
            (&mut self.inner).take(need as u64).read_to_end(&mut self.pending)?;
        }
        Ok(())
    }

    fn open_next(&mut self) -> IoResult<()> {
        self.fill()?;
        let plain = if self.pending.len() > SEALED_CHUNK_SIZE {
            let Some(decryptor) = self.decryptor.as_mut() else {
                return Ok(());
            };
            let plain = decryptor
                .decrypt_next(&self.pending[..SEALED_CHUNK_SIZE])
                .map_err(|_| ErrorKind::Authentication.into_io())?;
            self.pending.drain(..SEALED_CHUNK_SIZE);
            plain
        } else {
            let Some(decryptor) = self.decryptor.take() else {
                return Ok(());
            };
            decryptor
                .decrypt_last(self.pending.as_slice())
                .map_err(|_| ErrorKind::Authentication.into_io())?
        };
        self.plain = plain;
        self.pos = 0;
        Ok(())
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        while self.pos >= self.plain.len() {
            if self.decryptor.is_none() {
                return Ok(0);
            }
            self.open_next()?;
        }
        let n = buf.len().min(self.plain.len() - self.pos);
        buf[..n].copy_from_slice(&self.plain[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
