use crate::{Algorithm, Compression};
use std::fmt::{Display, Formatter, Result as FmtResult};

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl AsRef<str> for Compression {
    fn as_ref(&self) -> &'static str {
        self.as_str()
    }
}

impl Compression {
    /// Returns the short name for configuration (for displaying to user)
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Low => "low",
            Compression::Medium => "medium",
            Compression::High => "high",
        }
    }

    /// Returns `true` if this level actually compresses.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Compression::None)
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl AsRef<str> for Algorithm {
    fn as_ref(&self) -> &'static str {
        self.as_str()
    }
}

impl Algorithm {
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Deflate => "deflate",
            #[cfg(feature = "zstd")]
            Algorithm::Zstd => "zstd",
        }
    }

    /// Identifier written into the content header.
    #[inline]
    #[must_use]
    pub(crate) fn id(&self) -> u8 {
        match self {
            Algorithm::Deflate => 1,
            #[cfg(feature = "zstd")]
            Algorithm::Zstd => 2,
        }
    }
}
