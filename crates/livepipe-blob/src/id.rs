use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::BlobError;

const DIGEST_HEX_LEN: usize = 64;

/// SHA-256 digest of a blob's contents, as 64 lowercase hex characters.
///
/// A `BlobId` is always well formed, so it is safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobId(String);

impl BlobId {
    /// Computes the id of `data`.
    pub fn digest(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Validates an id received from outside.
    pub fn parse(raw: &str) -> Result<Self, BlobError> {
        let well_formed = raw.len() == DIGEST_HEX_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if well_formed {
            Ok(Self(raw.to_string()))
        } else {
            Err(BlobError::InvalidId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BlobId {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BlobId {
    type Error = BlobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BlobId> for String {
    fn from(id: BlobId) -> Self {
        id.0
    }
}

impl AsRef<str> for BlobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_of_empty_input() {
        assert_eq!(
            BlobId::digest(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn parse_accepts_digests() {
        let id = BlobId::digest(b"icon");
        assert_eq!(BlobId::parse(id.as_str()).unwrap(), id);
        assert_eq!(id.as_str().parse::<BlobId>().unwrap(), id);
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        let upper = BlobId::digest(b"icon").as_str().to_uppercase();
        for raw in ["", "abc", "../etc/passwd", upper.as_str(), &"g".repeat(64)] {
            assert!(
                matches!(BlobId::parse(raw), Err(BlobError::InvalidId(_))),
                "{raw:?} should be rejected"
            );
        }
    }
}
