use crate::errors::ImageError;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

/// A digest identifying image content by hash
///
/// Digests carry their hash format before a colon, currently always `sha256`
/// for digests we create ourselves. The part after the colon is hexadecimal.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentDigest {
    serialized: String,
    colon: usize,
}

impl ContentDigest {
    /// Returns a reference to the existing string representation of a
    /// [ContentDigest]
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Parse a [prim@str] as a [ContentDigest]
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref RE: Regex =
                Regex::new(&format!("^{}$", ContentDigest::regex_str())).unwrap();
        }
        match RE.is_match(s) {
            false => Err(ImageError::InvalidDigest(s.to_owned())),
            true => Ok(ContentDigest {
                serialized: s.to_owned(),
                colon: s.find(':').unwrap(),
            }),
        }
    }

    /// Hash content data into a new `sha256` [ContentDigest]
    pub fn from_content(content_bytes: &[u8]) -> Self {
        let serialized = format!("sha256:{:x}", Sha256::digest(content_bytes));
        let colon = serialized.find(':').unwrap();
        ContentDigest { serialized, colon }
    }

    /// Return a reference to the format portion of this digest
    pub fn format_str(&self) -> &str {
        &self.serialized[..self.colon]
    }

    /// Return a reference to the hexadecimal portion of this digest
    pub fn hex_str(&self) -> &str {
        &self.serialized[self.colon + 1..]
    }

    pub(crate) fn regex_str() -> &'static str {
        "(?P<dig>[A-Za-z0-9_+.-]+:[a-fA-F0-9]+)"
    }
}

impl FromStr for ContentDigest {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentDigest::parse(s)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
