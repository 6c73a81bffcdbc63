use crate::error::{Error, ErrorKind, Result};
use crate::{Algorithm, Compression};
use std::str::FromStr;

impl FromStr for Compression {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" | "off" => Ok(Compression::None),
            "low" | "fast" => Ok(Compression::Low),
            "medium" | "default" => Ok(Compression::Medium),
            "high" | "best" => Ok(Compression::High),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}

impl FromStr for Algorithm {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "deflate" | "zlib" => Ok(Algorithm::Deflate),
            #[cfg(feature = "zstd")]
            "zst" | "zstd" => Ok(Algorithm::Zstd),
            #[cfg(not(feature = "zstd"))]
            "zst" | "zstd" => exn::bail!(ErrorKind::DisabledFormat(s.to_string())),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}

impl Algorithm {
    /// Resolve the algorithm identifier read from a content header.
    ///
    /// Identifier `0` means the payload is not compressed.
    pub(crate) fn from_id(id: u8) -> Result<Option<Self>> {
        match id {
            0 => Ok(None),
            1 => Ok(Some(Algorithm::Deflate)),
            #[cfg(feature = "zstd")]
            2 => Ok(Some(Algorithm::Zstd)),
            #[cfg(not(feature = "zstd"))]
            2 => exn::bail!(ErrorKind::DisabledFormat("zstd".to_string())),
            other => exn::bail!(ErrorKind::UnsupportedFormat(format!("compression algorithm {other}"))),
        }
    }
}
