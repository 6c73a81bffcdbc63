//! In-band content header.
//!
//! Written in front of every payload that was compressed or encrypted; plain
//! payloads carry no header. Layout (big-endian):
//!
//! ```text
//! magic      4  b"BDIR"
//! version    1  0x01
//! flags      1  bit 0 compressed, bit 1 encrypted, other bits zero
//! algorithm  1  0 none, 1 deflate, 2 zstd
//! -- only when encrypted --
//! kdf        1  0x01 PBKDF2-HMAC-SHA256
//! iterations 4  u32
//! salt      16
//! nonce      7  STREAM nonce prefix
//! ```

use crate::crypto::{KeyParams, MAX_ITERATIONS, NONCE_LEN, SALT_LEN};
use crate::error::{ErrorKind, Result};
use crate::pipeline::SourceError;
use crate::{Algorithm, CodecFlags};
use exn::ResultExt;
use std::io::{ErrorKind as IoErrorKind, Read, Result as IoResult, Write};

pub const MAGIC: [u8; 4] = *b"BDIR";
pub const VERSION: u8 = 1;
const FLAG_COMPRESSED: u8 = 0b01;
const FLAG_ENCRYPTED: u8 = 0b10;
const KDF_PBKDF2_SHA256: u8 = 1;
const FIXED_LEN: usize = MAGIC.len() + 3;
const KEY_PARAMS_LEN: usize = 1 + 4 + SALT_LEN + NONCE_LEN;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Compression applied to the payload, if any.
    pub algorithm: Option<Algorithm>,
    /// Present when the payload is encrypted.
    pub encryption: Option<KeyParams>,
}

impl Header {
    #[must_use]
    pub fn flags(&self) -> CodecFlags {
        CodecFlags {
            compressed: self.algorithm.is_some(),
            encrypted: self.encryption.is_some(),
        }
    }

    /// Number of bytes [`write_to`](Self::write_to) produces.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FIXED_LEN + self.encryption.as_ref().map_or(0, |_| KEY_PARAMS_LEN)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> IoResult<()> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(&MAGIC);
        bytes.push(VERSION);
        let mut flags = 0;
        if self.algorithm.is_some() {
            flags |= FLAG_COMPRESSED;
        }
        if self.encryption.is_some() {
            flags |= FLAG_ENCRYPTED;
        }
        bytes.push(flags);
        bytes.push(self.algorithm.as_ref().map_or(0, Algorithm::id));
        if let Some(params) = &self.encryption {
            bytes.push(KDF_PBKDF2_SHA256);
            bytes.extend_from_slice(&params.iterations.to_be_bytes());
            bytes.extend_from_slice(&params.salt);
            bytes.extend_from_slice(&params.nonce);
        }
        writer.write_all(&bytes)
    }

    /// Parse a header from the front of a payload, consuming exactly its bytes.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut fixed = [0u8; FIXED_LEN];
        read_exact(reader, &mut fixed)?;
        if fixed[..MAGIC.len()] != MAGIC {
            exn::bail!(ErrorKind::InvalidData);
        }
        let [version, flags, algorithm] = [fixed[4], fixed[5], fixed[6]];
        if version != VERSION {
            exn::bail!(ErrorKind::UnsupportedFormat(format!("header version {version}")));
        }
        if flags & !(FLAG_COMPRESSED | FLAG_ENCRYPTED) != 0 {
            exn::bail!(ErrorKind::UnsupportedFormat(format!("header flags {flags:#04x}")));
        }
        let algorithm = Algorithm::from_id(algorithm)?;
        if algorithm.is_some() != (flags & FLAG_COMPRESSED != 0) {
            exn::bail!(ErrorKind::InvalidData);
        }
        let encryption = if flags & FLAG_ENCRYPTED != 0 {
            let mut params = [0u8; KEY_PARAMS_LEN];
            read_exact(reader, &mut params)?;
            if params[0] != KDF_PBKDF2_SHA256 {
                exn::bail!(ErrorKind::UnsupportedFormat(format!("key derivation {}", params[0])));
            }
            let iterations = u32::from_be_bytes([params[1], params[2], params[3], params[4]]);
            if iterations == 0 || iterations > MAX_ITERATIONS {
                exn::bail!(ErrorKind::UnsupportedFormat(format!("key derivation cost {iterations}")));
            }
            let mut salt = [0u8; SALT_LEN];
            salt.copy_from_slice(&params[5..5 + SALT_LEN]);
            let mut nonce = [0u8; NONCE_LEN];
            nonce.copy_from_slice(&params[5 + SALT_LEN..]);
            Some(KeyParams { iterations, salt, nonce })
        } else {
            None
        };
        Ok(Self { algorithm, encryption })
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        // A payload too short to hold its header is corrupt, not an I/O failure.
        Err(err) if err.kind() == IoErrorKind::UnexpectedEof && !SourceError::carried_by(&err) => {
            Err(err).or_raise(|| ErrorKind::InvalidData)
        },
        Err(err) => {
            let kind = ErrorKind::from_io(&err).cloned().unwrap_or(ErrorKind::Io);
            Err(err).or_raise(|| kind)
        },
    }
}
