use crate::{
    errors::ImageError,
    reference::{ContentDigest, ImageVersion, Tag},
};
use regex::Regex;
use std::{fmt, str::FromStr};

/// Parsed Docker-style image reference
///
/// A reference names a repository, optionally qualified with the registry
/// index it lives on, and optionally pinned to one version by tag or by
/// content digest. Only the repository part is mandatory.
///
/// The index is delineated heuristically, the same way Docker does it: the
/// component before the first slash is an index name if it contains a dot or
/// a colon, or if it is exactly `localhost`. Anything else is the first
/// component of the remote name, and the reference is unqualified.
///
/// A tag begins with the last `:` after the last `/`, a digest with `@`.
/// At most one of the two may be present.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ImageName {
    index: Option<String>,
    remote: String,
    tag: Option<Tag>,
    digest: Option<ContentDigest>,
}

impl ImageName {
    /// Parse a [prim@str] as an [ImageName]
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        let (rest, digest) = match s.rfind('@') {
            Some(at) => (&s[..at], Some(ContentDigest::parse(&s[at + 1..])?)),
            None => (s, None),
        };

        // A colon marks a tag only when it comes after the last slash,
        // otherwise it belongs to an index port number.
        let (name, tag) = match rest.rfind(':') {
            Some(colon) if !rest[colon + 1..].contains('/') => {
                (&rest[..colon], Some(Tag::parse(&rest[colon + 1..])?))
            }
            _ => (rest, None),
        };

        if tag.is_some() && digest.is_some() {
            return Err(ImageError::InvalidReferenceFormat(s.to_owned()));
        }

        let (index, remote) = ImageName::split_repository(name);
        if remote.is_empty() {
            return Err(ImageError::InvalidReferenceFormat(s.to_owned()));
        }
        lazy_static! {
            static ref REMOTE: Regex =
                Regex::new(&format!("^{}$", ImageName::remote_regex_str())).unwrap();
            static ref INDEX: Regex =
                Regex::new(&format!("^{}$", ImageName::index_regex_str())).unwrap();
        }
        if !REMOTE.is_match(remote) {
            return Err(ImageError::InvalidReferenceFormat(s.to_owned()));
        }
        if let Some(index) = index {
            if !INDEX.is_match(index) {
                return Err(ImageError::InvalidReferenceFormat(s.to_owned()));
            }
        }

        Ok(ImageName {
            index: index.map(str::to_owned),
            remote: remote.to_owned(),
            tag,
            digest,
        })
    }

    /// Split a repository name into its optional index and its remote name
    ///
    /// This is the pure half of the index heuristic, shared with the
    /// resolver's candidate walk over names already in the store.
    pub(crate) fn split_repository(name: &str) -> (Option<&str>, &str) {
        match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first), rest)
            }
            _ => (None, name),
        }
    }

    /// Returns the optional registry index portion of this reference
    pub fn index_str(&self) -> Option<&str> {
        self.index.as_deref()
    }

    /// Returns the remote name portion of this reference
    pub fn remote_str(&self) -> &str {
        &self.remote
    }

    /// Returns the repository name, qualified with the index when present
    pub fn repository(&self) -> String {
        match &self.index {
            Some(index) => format!("{}/{}", index, self.remote),
            None => self.remote.clone(),
        }
    }

    /// Returns the tag portion, if present
    pub fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    /// Returns the digest portion, if present
    pub fn content_digest(&self) -> Option<&ContentDigest> {
        self.digest.as_ref()
    }

    /// Is this reference qualified with a registry index?
    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Returns the most specific available version
    ///
    /// The digest when present, else the tag, else the default tag `latest`.
    pub fn version(&self) -> ImageVersion {
        if let Some(digest) = &self.digest {
            return ImageVersion::ContentDigest(digest.clone());
        }
        if let Some(tag) = &self.tag {
            return ImageVersion::Tag(tag.clone());
        }
        ImageVersion::Tag(Tag::latest())
    }

    pub(crate) fn remote_regex_str() -> &'static str {
        concat!(
            "(?P<remote>",
            /*  */ "[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*",
            /*  */ "(?:",
            /* -- */ "/",
            /* -- */ "[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*",
            /*  */ ")*",
            ")",
        )
    }

    pub(crate) fn index_regex_str() -> &'static str {
        "(?P<index>[a-zA-Z0-9][a-zA-Z0-9.-]*(?::[0-9]+)?)"
    }
}

impl FromStr for ImageName {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageName::parse(s)
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repository())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
