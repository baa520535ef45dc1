//! Content digests for pre-flash logging and post-flash spot checks.
//!
//! Reading a whole image back over a serial link is slow, so verification
//! compares only a leading window of [`SPOT_CHECK_LEN`] bytes. That catches a
//! wrong offset, a wrong file or a truncated write; it does not prove the
//! rest of the image is bit-exact.

use md5::{Digest, Md5};
use std::fmt;

/// Length of the prefix window read back after flashing.
pub const SPOT_CHECK_LEN: usize = 256;

/// 128-bit content hash (MD5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 16]);

impl ContentDigest {
    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// What a digest was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestScope {
    /// The entire buffer.
    WholeImage,
    /// The first `n` bytes.
    PrefixWindow(usize),
}

/// A digest together with the window it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationDigest {
    /// Covered window.
    pub scope: DigestScope,
    /// Hash value.
    pub digest: ContentDigest,
}

impl VerificationDigest {
    /// Digest of the whole buffer.
    pub fn whole(bytes: &[u8]) -> Self {
        Self {
            scope: DigestScope::WholeImage,
            digest: digest(bytes),
        }
    }

    /// Digest of the first `n` bytes of the buffer.
    pub fn prefix(bytes: &[u8], n: usize) -> Self {
        Self {
            scope: DigestScope::PrefixWindow(n),
            digest: prefix_digest(bytes, n),
        }
    }
}

/// Digest the exact byte sequence.
pub fn digest(bytes: &[u8]) -> ContentDigest {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    let mut out = [0u8; 16];
    out.copy_from_slice(&hasher.finalize());
    ContentDigest(out)
}

/// Digest the first `n` bytes; shorter buffers are digested whole.
pub fn prefix_digest(bytes: &[u8], n: usize) -> ContentDigest {
    digest(&bytes[..n.min(bytes.len())])
}
