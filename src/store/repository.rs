use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One repository's references, each key a tag name or a digest string
///
/// Values are opaque image IDs resolvable through the image graph. The map
/// is ordered so enumeration and persistence are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Repository {
    refs: BTreeMap<String, String>,
}

impl Repository {
    pub fn new() -> Self {
        Repository::default()
    }

    /// Look up the image ID bound to a reference key
    pub fn get(&self, reference: &str) -> Option<&str> {
        self.refs.get(reference).map(String::as_str)
    }

    /// Bind a reference key to an image ID, returning any previous binding
    pub fn insert<K: Into<String>, V: Into<String>>(
        &mut self,
        reference: K,
        image_id: V,
    ) -> Option<String> {
        self.refs.insert(reference.into(), image_id.into())
    }

    /// Remove a reference key, returning the image ID it was bound to
    pub fn remove(&mut self, reference: &str) -> Option<String> {
        self.refs.remove(reference)
    }

    pub fn contains_key(&self, reference: &str) -> bool {
        self.refs.contains_key(reference)
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Iterate over `(reference, image ID)` pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.refs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterate over the tag keys only, skipping digest keys
    ///
    /// Digest keys always contain a colon, tag names never do.
    pub fn tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(reference, _)| !reference.contains(':'))
    }

    /// Fold another repository's bindings into this one
    pub fn update(&mut self, other: &Repository) {
        for (reference, image_id) in other.iter() {
            self.insert(reference, image_id);
        }
    }

    /// Are all of `other`'s bindings present here with the same IDs?
    pub fn contains(&self, other: &Repository) -> bool {
        other
            .iter()
            .all(|(reference, image_id)| self.get(reference) == Some(image_id))
    }
}

impl<'a> IntoIterator for &'a Repository {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;
    fn into_iter(self) -> Self::IntoIter {
        self.refs.iter()
    }
}

impl std::iter::FromIterator<(String, String)> for Repository {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Repository {
            refs: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(pairs: &[(&str, &str)]) -> Repository {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn update_merges_and_overwrites() {
        let mut base = repo(&[("latest", "sha256:aa"), ("v1", "sha256:aa")]);
        base.update(&repo(&[("v1", "sha256:bb"), ("v2", "sha256:cc")]));
        assert_eq!(base.get("latest"), Some("sha256:aa"));
        assert_eq!(base.get("v1"), Some("sha256:bb"));
        assert_eq!(base.get("v2"), Some("sha256:cc"));
    }

    #[test]
    fn contains_requires_matching_ids() {
        let base = repo(&[("latest", "sha256:aa"), ("v1", "sha256:bb")]);
        assert!(base.contains(&repo(&[("v1", "sha256:bb")])));
        assert!(!base.contains(&repo(&[("v1", "sha256:aa")])));
        assert!(!base.contains(&repo(&[("v2", "sha256:bb")])));
    }

    #[test]
    fn tags_skip_digest_keys() {
        let base = repo(&[("latest", "sha256:aa"), ("sha256:feed", "sha256:bb")]);
        let tags: Vec<&str> = base.tags().map(|(reference, _)| reference).collect();
        assert_eq!(tags, vec!["latest"]);
    }
}
