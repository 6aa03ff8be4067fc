//! Content hashes and state-directory filename predicates.
//!
//! Every piece of downloadable content is addressed by the SHA-256 of its
//! bytes, rendered as 64 lowercase hex characters. The all-zero hash is the
//! tombstone marker carried by deleted file records.

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Length of a content hash in hex characters.
pub const HASH_LEN: usize = 64;

const HASH_BYTES: usize = HASH_LEN / 2;

/// Errors parsing a content hash from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashError {
    /// Wrong number of characters
    #[error("hash must be {HASH_LEN} hex characters, got {0}")]
    Length(usize),

    /// Not lowercase hex
    #[error("hash is not lowercase hex: {0}")]
    Invalid(String),
}

/// A content hash: 64 lowercase hex characters, compared byte-for-byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; HASH_BYTES]);

impl ContentHash {
    /// The all-zero hash, used as the tombstone marker for deleted records.
    pub const ZERO: ContentHash = ContentHash([0; HASH_BYTES]);

    /// True if this is the tombstone hash.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Hash a byte slice.
    pub fn of_bytes(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut out = [0u8; HASH_BYTES];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Hash the contents of a regular file, streaming.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let mut out = [0u8; HASH_BYTES];
        out.copy_from_slice(&hasher.finalize());
        Ok(Self(out))
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_LEN {
            return Err(HashError::Length(s.len()));
        }
        // The manifest format mandates lowercase; reject A-F outright.
        if !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(HashError::Invalid(s.to_string()));
        }
        let mut out = [0u8; HASH_BYTES];
        hex::decode_to_slice(s, &mut out).map_err(|_| HashError::Invalid(s.to_string()))?;
        Ok(Self(out))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", hex::encode(self.0))
    }
}

/// True if every character is an ASCII digit (version directory names).
pub fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_all_hexdigits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Staged fullfile blobs are named by their bare content hash.
pub fn is_fullfile_name(name: &str) -> bool {
    name.len() == HASH_LEN
}

/// Pack indicators look like `pack-<bundle>-from-<v1>-to-<v2>.tar`.
pub fn is_pack_indicator_name(name: &str) -> bool {
    const PREFIX: &str = "pack-";
    const SUFFIX: &str = ".tar";
    name.len() >= PREFIX.len() + SUFFIX.len() && name.starts_with(PREFIX) && name.ends_with(SUFFIX)
}

/// Any manifest file: `Manifest.MoM`, `Manifest.<bundle>`, hashed variants.
pub fn is_manifest_name(name: &str) -> bool {
    name.starts_with("Manifest.")
}

/// Hash-hint manifests: `Manifest.<bundle>.<hex>` with exactly one dot after
/// the prefix. Iterative (`Manifest.<bundle>.I.<v>`) and delta
/// (`Manifest.<bundle>.D.<v>`) names have more dots and do not match.
pub fn is_hashed_manifest_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("Manifest.") else {
        return false;
    };
    let mut parts = rest.splitn(3, '.');
    let bundle = parts.next().unwrap_or("");
    let Some(suffix) = parts.next() else {
        return false;
    };
    if parts.next().is_some() || bundle.is_empty() {
        return false;
    }
    is_all_hexdigits(suffix)
}

/// Delta manifests live in the state root as `Manifest-<bundle>-delta-from-<v1>-to-<v2>`.
pub fn is_manifest_delta_name(name: &str) -> bool {
    name.starts_with("Manifest-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SAMPLE: &str = "55e772c100c5f01cc148a7e9a66196e266adb22e2ca2116f81f8d138f9d7c725";

    #[test]
    fn test_parse_and_display_roundtrip() {
        let hash: ContentHash = SAMPLE.parse().unwrap();
        assert_eq!(hash.to_string(), SAMPLE);
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(matches!(
            "abc123".parse::<ContentHash>(),
            Err(HashError::Length(6))
        ));
    }

    #[test]
    fn test_rejects_uppercase() {
        let upper = SAMPLE.to_uppercase();
        assert!(matches!(
            upper.parse::<ContentHash>(),
            Err(HashError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_hash() {
        let zero: ContentHash = "0".repeat(HASH_LEN).parse().unwrap();
        assert!(zero.is_zero());
        assert_eq!(zero, ContentHash::ZERO);

        let nonzero: ContentHash = SAMPLE.parse().unwrap();
        assert!(!nonzero.is_zero());
    }

    #[test]
    fn test_of_bytes_matches_known_digest() {
        // sha256("") is a well-known constant
        let hash = ContentHash::of_bytes(b"");
        assert_eq!(
            hash.to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_of_file_matches_of_bytes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("blob");
        fs::write(&path, b"bundle content").unwrap();

        assert_eq!(
            ContentHash::of_file(&path).unwrap(),
            ContentHash::of_bytes(b"bundle content")
        );
    }

    #[test]
    fn test_is_fullfile_name() {
        assert!(is_fullfile_name(SAMPLE));
        assert!(!is_fullfile_name("Manifest.MoM"));
        assert!(!is_fullfile_name(&SAMPLE[..40]));
    }

    #[test]
    fn test_is_pack_indicator_name() {
        assert!(is_pack_indicator_name("pack-editors-from-0-to-20.tar"));
        assert!(!is_pack_indicator_name("pack-editors"));
        assert!(!is_pack_indicator_name("editors-from-0-to-20.tar"));
        assert!(!is_pack_indicator_name("p.tar"));
    }

    #[test]
    fn test_is_manifest_name() {
        assert!(is_manifest_name("Manifest.MoM"));
        assert!(is_manifest_name("Manifest.editors"));
        assert!(!is_manifest_name("manifest.editors"));
        assert!(!is_manifest_name("Manifest-editors-delta-from-10-to-20"));
    }

    #[test]
    fn test_is_hashed_manifest_name() {
        let hashed = format!("Manifest.editors.{SAMPLE}");
        assert!(is_hashed_manifest_name(&hashed));
        assert!(!is_hashed_manifest_name("Manifest.editors"));
        assert!(!is_hashed_manifest_name("Manifest.MoM"));
        // iterative and delta manifests have an extra dot
        assert!(!is_hashed_manifest_name("Manifest.editors.I.20"));
        assert!(!is_hashed_manifest_name("Manifest.editors.D.20"));
        assert!(!is_hashed_manifest_name("Manifest.editors.zz"));
    }

    #[test]
    fn test_is_manifest_delta_name() {
        assert!(is_manifest_delta_name("Manifest-editors-delta-from-10-to-20"));
        assert!(!is_manifest_delta_name("Manifest.editors"));
    }

    #[test]
    fn test_is_all_digits() {
        assert!(is_all_digits("20"));
        assert!(!is_all_digits("20a"));
        assert!(!is_all_digits(""));
    }
}
