use sha2::{Digest, Sha256};
use std::io::{Read, Result as IoResult};

/// Length and SHA-256 of original (pre-encode) content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentDigest {
    length: u64,
    sha256_hex: String,
}

impl ContentDigest {
    /// Digest an in-memory buffer.
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            length: bytes.len() as u64,
            sha256_hex: format!("{:x}", Sha256::digest(bytes)),
        }
    }

    #[inline]
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Lowercase hexadecimal SHA-256.
    #[inline]
    pub fn sha256_hex(&self) -> &str {
        &self.sha256_hex
    }
}

/// A reader that hashes and counts every byte that passes through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    length: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            length: 0,
        }
    }

    /// Bytes read so far.
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn digest(self) -> ContentDigest {
        ContentDigest {
            length: self.length,
            sha256_hex: format!("{:x}", self.hasher.finalize()),
        }
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.length += n as u64;
        Ok(n)
    }
}
