use crate::errors::ImageError;
use regex::Regex;
use std::{fmt, str::FromStr};

/// A tag naming one version of an image within a repository
///
/// Tags are one to 128 characters long. The first character must be
/// alphanumeric or an underscore; dots and dashes are allowed anywhere else.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    serialized: String,
}

static DEFAULT_STR: &str = "latest";

impl Tag {
    /// Returns a reference to the existing string representation of a [Tag]
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Parse a [prim@str] as a [Tag]
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(&format!("^{}$", Tag::regex_str())).unwrap();
        }
        match RE.is_match(s) {
            false => Err(ImageError::InvalidTagName(s.to_owned())),
            true => Ok(Tag {
                serialized: s.to_owned(),
            }),
        }
    }

    /// Returns the default tag, `latest`
    ///
    /// The resolver supplies this tag for lookup inputs that carry neither a
    /// tag nor a digest.
    pub fn latest() -> Self {
        Tag {
            serialized: DEFAULT_STR.to_owned(),
        }
    }

    /// Is this the default tag `latest`?
    pub fn is_latest(&self) -> bool {
        self.serialized == DEFAULT_STR
    }

    pub(crate) fn regex_str() -> &'static str {
        "(?P<tag>[0-9A-Za-z_][0-9A-Za-z_.-]{0,127})"
    }
}

impl FromStr for Tag {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tag::parse(s)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
