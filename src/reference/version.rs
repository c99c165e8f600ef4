use crate::{
    errors::ImageError,
    reference::{ContentDigest, Tag},
};
use std::{fmt, str::FromStr};

/// Either an image tag or a content digest
///
/// A reference key inside a repository is always one of the two. Lookup
/// inputs that specify neither resolve to the default tag `latest`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ImageVersion {
    Tag(Tag),
    ContentDigest(ContentDigest),
}

impl ImageVersion {
    /// Returns a reference to the existing string representation of an
    /// [ImageVersion]
    pub fn as_str(&self) -> &str {
        match self {
            ImageVersion::Tag(tag) => tag.as_str(),
            ImageVersion::ContentDigest(digest) => digest.as_str(),
        }
    }

    /// Parse a [prim@str] as an [ImageVersion]
    ///
    /// Digest strings always contain a colon, tag names never do.
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        if s.contains(':') {
            Ok(ImageVersion::ContentDigest(ContentDigest::parse(s)?))
        } else {
            Ok(ImageVersion::Tag(Tag::parse(s)?))
        }
    }

    /// Is this version a content digest?
    pub fn is_content_digest(&self) -> bool {
        match self {
            ImageVersion::Tag(_) => false,
            ImageVersion::ContentDigest(_) => true,
        }
    }

    /// Is this version a tag?
    pub fn is_tag(&self) -> bool {
        !self.is_content_digest()
    }
}

impl FromStr for ImageVersion {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageVersion::parse(s)
    }
}

impl fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for ImageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
