//! Registry selection policy for resolving image names
//!
//! Unqualified references are rewritten against an ordered list of
//! configured registries, subject to a block list. The first configured
//! registry is the public index and qualifies otherwise-unqualified names.

use crate::reference::ImageName;
use serde::{Deserialize, Serialize};

/// Sentinel in the block list matching every registry outside the
/// additional configured ones
pub const BLOCK_ALL: &str = "all";

/// Sentinel in the block list matching the public index
pub const BLOCK_PUBLIC: &str = "public";

static PUBLIC_INDEX: &str = "docker.io";

/// Ordered registry list and block list controlling name resolution
///
/// The registry list defines the search priority for unqualified names; its
/// first entry is the authoritative default used for canonicalization.
/// Entries are appended in declaration order, matching the daemon's
/// `--add-registry` and `--block-registry` flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_list")]
    registry_list: Vec<String>,
    #[serde(default)]
    block_registries: Vec<String>,
}

fn default_registry_list() -> Vec<String> {
    vec![PUBLIC_INDEX.to_owned()]
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            registry_list: default_registry_list(),
            block_registries: Vec::new(),
        }
    }
}

impl RegistryConfig {
    /// Configuration with the public index alone, nothing blocked
    pub fn new() -> Self {
        RegistryConfig::default()
    }

    /// Append a registry to the search list
    pub fn add_registry<T: Into<String>>(mut self, registry: T) -> Self {
        self.registry_list.push(registry.into());
        self
    }

    /// Add a registry, or one of the sentinels `public` and `all`, to the
    /// block list
    pub fn block_registry<T: Into<String>>(mut self, registry: T) -> Self {
        self.block_registries.push(registry.into());
        self
    }

    /// Replace the whole search list, preserving its order
    pub fn with_registries<T: Into<String>>(mut self, registries: Vec<T>) -> Self {
        self.registry_list = registries.into_iter().map(Into::into).collect();
        if self.registry_list.is_empty() {
            self.registry_list = default_registry_list();
        }
        self
    }

    /// The authoritative default registry, first in the search list
    pub fn default_registry(&self) -> &str {
        &self.registry_list[0]
    }

    /// The configured search list, in priority order
    pub fn registry_list(&self) -> &[String] {
        &self.registry_list
    }

    /// Is this index one of the configured registries?
    pub fn is_configured(&self, index: &str) -> bool {
        self.registry_list.iter().any(|r| r == index)
    }

    /// May this index be contacted at all?
    ///
    /// An empty index stands for the default registry. The `public` sentinel
    /// blocks the default registry; the `all` sentinel blocks everything
    /// except the additional (non-first) configured registries.
    pub fn allowed(&self, index: Option<&str>) -> bool {
        let index = match index {
            Some(index) => index,
            None => self.default_registry(),
        };
        for blocked in &self.block_registries {
            if blocked == index {
                return false;
            }
            if blocked == BLOCK_PUBLIC && index == self.default_registry() {
                return false;
            }
            if blocked == BLOCK_ALL && !self.registry_list[1..].iter().any(|r| r == index) {
                return false;
            }
        }
        true
    }

    /// Split a repository name into its optional index and its remote name
    ///
    /// Extends the parser's dot/colon/localhost heuristic with the
    /// configured registries, which need not look like host names: a first
    /// component naming a configured registry is an index too.
    pub fn split_name<'a>(&self, name: &'a str) -> (Option<&'a str>, &'a str) {
        let (index, remote) = ImageName::split_repository(name);
        if index.is_some() {
            return (index, remote);
        }
        if let Some((first, rest)) = name.split_once('/') {
            if self.is_configured(first) {
                return (Some(first), rest);
            }
        }
        (None, name)
    }

    /// Rewrite a repository name to its canonical stored form
    ///
    /// The index is lowercased, and an unqualified name gains the default
    /// registry as its index. The remote name is kept as written; the
    /// public index's `library/` namespace for single-component names is a
    /// transport concern, not part of the local name.
    pub fn canonical_name(&self, name: &str) -> String {
        let (index, remote) = self.split_name(name);
        match index {
            None => format!("{}/{}", self.default_registry(), remote),
            Some(index) => format!("{}/{}", index.to_lowercase(), remote),
        }
    }

    /// Enumerate the fully-qualified names a repository lookup should try,
    /// in priority order
    ///
    /// `known` supplies the names already persisted in the store, in a
    /// deterministic order; it feeds the search-list walk and the trailing
    /// scan for already-qualified names under non-configured registries.
    /// Duplicates are suppressed, first seen wins.
    pub fn candidates<'a, I>(&self, name: &str, known: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut result: Vec<String> = Vec::new();
        let mut push = |candidate: String| {
            if !result.contains(&candidate) {
                result.push(candidate);
            }
        };

        push(name.to_owned());
        push(self.canonical_name(name));

        let (index, remote) = self.split_name(name);
        if index.is_none() {
            for registry in &self.registry_list {
                push(format!("{}/{}", registry.to_lowercase(), remote));
            }
            for stored in known {
                let (stored_index, stored_remote) = self.split_name(stored);
                if let Some(stored_index) = stored_index {
                    if stored_remote == remote && !self.is_configured(stored_index) {
                        push(stored.to_owned());
                    }
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_KNOWN: [&str; 0] = [];

    #[test]
    fn canonical_names() {
        let config = RegistryConfig::new();
        assert_eq!(config.canonical_name("busybox"), "docker.io/busybox");
        assert_eq!(
            config.canonical_name("library/foo"),
            "docker.io/library/foo"
        );
        assert_eq!(
            config.canonical_name("DOCKER.IO/busybox"),
            "docker.io/busybox"
        );
        // the remote name is never rewritten, only qualified
        assert_eq!(
            config.canonical_name("docker.io/library/busybox"),
            "docker.io/library/busybox"
        );
        assert_eq!(
            config.canonical_name("myhost:5000/team/img"),
            "myhost:5000/team/img"
        );
    }

    #[test]
    fn candidate_order() {
        let config = RegistryConfig::new().add_registry("r1");
        let candidates = config.candidates("library/hello-world", NO_KNOWN);
        assert_eq!(
            candidates,
            vec![
                "library/hello-world",
                "docker.io/library/hello-world",
                "r1/library/hello-world",
            ]
        );
    }

    #[test]
    fn candidates_skip_qualified_walk() {
        let config = RegistryConfig::new().add_registry("r1");
        let candidates = config.candidates("myhost:5000/img", NO_KNOWN);
        assert_eq!(candidates, vec!["myhost:5000/img"]);
    }

    #[test]
    fn candidates_include_foreign_known_names() {
        let config = RegistryConfig::new().add_registry("r1");
        let known = ["other.example/img", "r1/img", "unrelated.example/not-it"];
        let candidates = config.candidates("img", known);
        assert_eq!(
            candidates,
            vec![
                "img",
                "docker.io/img",
                "r1/img",
                "other.example/img",
            ]
        );
    }

    #[test]
    fn block_list() {
        let config = RegistryConfig::new()
            .add_registry("r1")
            .block_registry("evil.example");
        assert!(config.allowed(None));
        assert!(config.allowed(Some("docker.io")));
        assert!(config.allowed(Some("r1")));
        assert!(!config.allowed(Some("evil.example")));
    }

    #[test]
    fn block_public_sentinel() {
        let config = RegistryConfig::new()
            .add_registry("r1")
            .block_registry(BLOCK_PUBLIC);
        assert!(!config.allowed(None));
        assert!(!config.allowed(Some("docker.io")));
        assert!(config.allowed(Some("r1")));
        assert!(config.allowed(Some("other.example")));
    }

    #[test]
    fn block_all_sentinel() {
        let config = RegistryConfig::new()
            .add_registry("r1")
            .block_registry(BLOCK_ALL);
        assert!(!config.allowed(None));
        assert!(!config.allowed(Some("docker.io")));
        assert!(config.allowed(Some("r1")));
        assert!(!config.allowed(Some("other.example")));
    }

    #[test]
    fn resolution_monotonicity() {
        // growing the registry list never reorders earlier candidates, it
        // only appends new ones
        let before = RegistryConfig::new().candidates("img", NO_KNOWN);
        let after = RegistryConfig::new()
            .add_registry("r1")
            .candidates("img", NO_KNOWN);
        assert_eq!(&after[..before.len()], &before[..]);
    }
}
