//! Persisted mapping from repository names to tagged image IDs

mod repository;

pub use repository::Repository;

use crate::{
    errors::ImageError,
    graph::{ImageGraph, ImageRecord},
    reference::{image_reference, truncate_id, ContentDigest, ImageName, Tag},
    resolver::RegistryConfig,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    env,
    fs::{self, OpenOptions},
    io::{self, Write},
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

/// The store's on-disk document, one JSON object at a configured path
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct StoreState {
    #[serde(rename = "Repositories")]
    repositories: BTreeMap<String, Repository>,
}

/// Persisted reference store mapping repositories to their tagged images
///
/// The store treats its JSON file as the shared source of truth: every
/// operation takes the store lock, reloads the file, and mutating
/// operations write it back before releasing. Writes go through a rename
/// so readers never observe a partially written state.
///
/// Image IDs recorded here are opaque; they are validated against the
/// image graph when a binding is created, and never invented by the store.
pub struct TagStore {
    path: PathBuf,
    config: RegistryConfig,
    graph: Arc<dyn ImageGraph>,
    state: Mutex<StoreState>,
}

impl TagStore {
    /// Open the reference store, loading the persistence file if present or
    /// creating it empty
    ///
    /// Fails with [ImageError::CorruptState] when an existing file does not
    /// parse; a daemon should refuse to start in that case rather than
    /// silently discard references.
    pub fn new<P: AsRef<Path>>(
        path: P,
        config: RegistryConfig,
        graph: Arc<dyn ImageGraph>,
    ) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            env::current_dir()?.join(path)
        };
        let store = TagStore {
            path,
            config,
            graph,
            state: Mutex::new(StoreState::default()),
        };
        {
            let mut state = store.lock();
            match store.load()? {
                Some(loaded) => *state = loaded,
                None => {
                    log::info!("creating reference store at {:?}", store.path);
                    store.save(&state)?;
                }
            }
        }
        Ok(store)
    }

    /// The absolute path of the persistence file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The resolution policy this store was configured with
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self) -> Result<Option<StoreState>, ImageError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&data) {
            Ok(state) => Ok(Some(state)),
            Err(source) => Err(ImageError::CorruptState {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn save(&self, state: &StoreState) -> Result<(), ImageError> {
        let data = serde_json::to_vec(state)?;
        let temp = self.path.with_extension("tmp");
        // Only one writer can exist, we are under the store lock here.
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&temp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, &self.path)?;
        log::debug!(
            "saved {} repositories to {:?}",
            state.repositories.len(),
            self.path
        );
        Ok(())
    }

    /// Take the lock, reload from disk, and read through `f`
    fn read<R, F: FnOnce(&StoreState) -> R>(&self, f: F) -> Result<R, ImageError> {
        let mut state = self.lock();
        *state = self.load()?.unwrap_or_default();
        Ok(f(&state))
    }

    /// Take the lock, reload from disk, mutate through `f`, persist on
    /// success
    ///
    /// A failed save aborts the operation; the prior snapshot stays on disk
    /// and the next operation reloads it.
    fn mutate<R, F: FnOnce(&mut StoreState) -> Result<R, ImageError>>(
        &self,
        f: F,
    ) -> Result<R, ImageError> {
        let mut state = self.lock();
        *state = self.load()?.unwrap_or_default();
        let result = f(&mut state)?;
        self.save(&state)?;
        Ok(result)
    }

    /// Repositories matching a name, in candidate priority order
    ///
    /// Returns `(full name, repository)` pairs for every candidate that is
    /// actually present, best match first. The walk is deterministic; it
    /// never depends on hash-map iteration order.
    pub fn repository_list(&self, name: &str) -> Result<Vec<(String, Repository)>, ImageError> {
        self.read(|state| Self::matching(state, &self.config, name))
    }

    fn matching(
        state: &StoreState,
        config: &RegistryConfig,
        name: &str,
    ) -> Vec<(String, Repository)> {
        config
            .candidates(name, state.repositories.keys().map(String::as_str))
            .into_iter()
            .filter_map(|candidate| {
                state
                    .repositories
                    .get(&candidate)
                    .map(|repo| (candidate, repo.clone()))
            })
            .collect()
    }

    /// The repository of the best matching candidate, or `None`
    ///
    /// The returned value is a snapshot copy; mutating it does not affect
    /// the store.
    pub fn get(&self, name: &str) -> Result<Option<Repository>, ImageError> {
        self.read(|state| {
            Self::matching(state, &self.config, name)
                .into_iter()
                .next()
                .map(|(_, repo)| repo)
        })
    }

    /// The full stored name of the best matching candidate, or `None`
    pub fn best_candidate(&self, name: &str) -> Result<Option<String>, ImageError> {
        self.read(|state| {
            Self::matching(state, &self.config, name)
                .into_iter()
                .next()
                .map(|(name, _)| name)
        })
    }

    /// A snapshot of every stored repository
    pub fn repositories(&self) -> Result<BTreeMap<String, Repository>, ImageError> {
        self.read(|state| state.repositories.clone())
    }

    /// Look up an image by repository name plus reference key or ID prefix
    ///
    /// Scans the candidate repositories for an exact reference key first,
    /// then rescans matching stored IDs by prefix so short IDs work.
    /// Returns `None` without error when nothing matches.
    pub fn get_image(
        &self,
        name: &str,
        ref_or_id: &str,
    ) -> Result<Option<ImageRecord>, ImageError> {
        let revision = self.read(|state| {
            let matching = Self::matching(state, &self.config, name);
            for (_, repo) in &matching {
                if let Some(id) = repo.get(ref_or_id) {
                    return Some(id.to_owned());
                }
            }
            for (_, repo) in &matching {
                for (_, id) in repo.iter() {
                    if id.starts_with(ref_or_id) {
                        return Some(id.to_owned());
                    }
                }
            }
            None
        })?;
        // The graph probe happens with the store lock released; only the
        // opaque ID crosses over.
        match revision {
            Some(id) => self.graph.get(&id),
            None => Ok(None),
        }
    }

    /// Resolve any user-supplied name to an image
    ///
    /// Names that parse as a reference go through [TagStore::get_image];
    /// anything else is treated as a full or prefix image ID and handed to
    /// the graph directly.
    pub fn lookup_image(&self, name: &str) -> Result<Option<ImageRecord>, ImageError> {
        match ImageName::parse(name) {
            Ok(parsed) => {
                let version = parsed.version();
                if let Some(image) = self.get_image(&parsed.repository(), version.as_str())? {
                    return Ok(Some(image));
                }
            }
            Err(ImageError::InvalidReferenceFormat(_))
            | Err(ImageError::InvalidTagName(_))
            | Err(ImageError::InvalidDigest(_)) => {}
            Err(e) => return Err(e),
        }
        self.graph.get(name)
    }

    /// Bind a tag to an image
    ///
    /// `image_name` may be any name [TagStore::lookup_image] accepts. An
    /// existing binding to a different ID fails with
    /// [ImageError::TagConflict] unless `force` is set. With
    /// `keep_unqualified`, an unqualified `name` is stored without an index
    /// prefix, preserving the caller's spelling.
    pub fn tag(
        &self,
        name: &str,
        tag: &str,
        image_name: &str,
        force: bool,
        keep_unqualified: bool,
    ) -> Result<(), ImageError> {
        self.tag_with_notice(name, tag, image_name, force, keep_unqualified, None)
    }

    /// [TagStore::tag], emitting a human-readable rename notice to `out`
    /// when `force` replaces a binding that pointed at a different image
    pub fn tag_with_notice(
        &self,
        name: &str,
        tag: &str,
        image_name: &str,
        force: bool,
        keep_unqualified: bool,
        mut out: Option<&mut dyn io::Write>,
    ) -> Result<(), ImageError> {
        let image = self.resolve_image(image_name)?;
        let tag = if tag.is_empty() {
            Tag::latest()
        } else {
            Tag::parse(tag)?
        };
        validate_repository_name(name)?;
        let stored = self.stored_name(name, keep_unqualified);

        self.mutate(|state| {
            let repo = state.repositories.entry(stored.clone()).or_default();
            if let Some(existing) = repo.get(tag.as_str()) {
                if existing != image.id {
                    if !force {
                        return Err(ImageError::TagConflict {
                            tag: tag.as_str().to_owned(),
                            existing: existing.to_owned(),
                        });
                    }
                    if let Some(out) = out.as_mut() {
                        writeln!(
                            out,
                            "tag {}:{} previously pointed at {}, reassigning it to {}",
                            stored,
                            tag,
                            truncate_id(existing),
                            truncate_id(&image.id)
                        )?;
                    }
                }
            }
            repo.insert(tag.as_str(), image.id.clone());
            log::info!("tagged {} as {}:{}", truncate_id(&image.id), stored, tag);
            Ok(())
        })
    }

    /// Bind a digest to an image
    ///
    /// Digests are content identity: an existing binding to a different ID
    /// is a hard [ImageError::DigestConflict] and is never overwritten.
    pub fn set_digest(
        &self,
        name: &str,
        digest: &str,
        image_name: &str,
        keep_unqualified: bool,
    ) -> Result<(), ImageError> {
        let image = self.resolve_image(image_name)?;
        validate_repository_name(name)?;
        let digest = ContentDigest::parse(digest)?;
        let stored = self.stored_name(name, keep_unqualified);

        self.mutate(|state| {
            let repo = state.repositories.entry(stored.clone()).or_default();
            if let Some(existing) = repo.get(digest.as_str()) {
                if existing != image.id {
                    return Err(ImageError::DigestConflict {
                        digest: digest.as_str().to_owned(),
                        existing: existing.to_owned(),
                    });
                }
            }
            repo.insert(digest.as_str(), image.id.clone());
            log::info!("bound {}@{} to {}", stored, digest, truncate_id(&image.id));
            Ok(())
        })
    }

    /// Remove one reference, or a whole repository when `reference` is empty
    ///
    /// Walks the candidates for `name`; the first repository carrying the
    /// reference loses it, and a repository left without references is
    /// dropped entirely. Returns `true` when something was deleted.
    pub fn delete(&self, name: &str, reference: &str) -> Result<bool, ImageError> {
        self.mutate(|state| {
            let candidates: Vec<String> = self
                .config
                .candidates(name, state.repositories.keys().map(String::as_str))
                .into_iter()
                .filter(|candidate| state.repositories.contains_key(candidate))
                .collect();

            let mut matched = false;
            for candidate in candidates {
                matched = true;
                if reference.is_empty() {
                    state.repositories.remove(&candidate);
                    log::info!("deleted repository {}", candidate);
                    return Ok(true);
                }
                let repo = state
                    .repositories
                    .get_mut(&candidate)
                    .expect("candidate was just matched");
                if repo.remove(reference).is_some() {
                    if repo.is_empty() {
                        state.repositories.remove(&candidate);
                    }
                    log::info!("deleted reference {}", image_reference(&candidate, reference));
                    return Ok(true);
                }
            }
            if matched {
                Err(ImageError::NoSuchReference {
                    repository: name.to_owned(),
                    reference: reference.to_owned(),
                })
            } else {
                Err(ImageError::NoSuchRepository(name.to_owned()))
            }
        })
    }

    /// Remove every reference to an image ID, across all repositories
    pub fn delete_all(&self, image_id: &str) -> Result<(), ImageError> {
        self.mutate(|state| {
            let mut emptied = Vec::new();
            for (name, repo) in state.repositories.iter_mut() {
                let doomed: Vec<String> = repo
                    .iter()
                    .filter(|(_, id)| *id == image_id)
                    .map(|(reference, _)| reference.to_owned())
                    .collect();
                for reference in doomed {
                    repo.remove(&reference);
                }
                if repo.is_empty() {
                    emptied.push(name.clone());
                }
            }
            for name in emptied {
                state.repositories.remove(&name);
            }
            Ok(())
        })
    }

    /// Reverse index: every name that refers to each image ID
    ///
    /// Reference lists come out sorted, so the first entry is stable across
    /// calls.
    pub fn by_id(&self) -> Result<BTreeMap<String, Vec<String>>, ImageError> {
        self.read(|state| {
            let mut by_id: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for (name, repo) in &state.repositories {
                for (reference, id) in repo.iter() {
                    by_id
                        .entry(id.to_owned())
                        .or_default()
                        .push(image_reference(name, reference));
                }
            }
            for references in by_id.values_mut() {
                references.sort();
            }
            by_id
        })
    }

    /// A display name for an image ID
    ///
    /// The first of its sorted references, or a short form of the ID itself
    /// when nothing refers to it.
    pub fn image_name(&self, image_id: &str) -> Result<String, ImageError> {
        Ok(match self.by_id()?.remove(image_id) {
            Some(references) if !references.is_empty() => {
                references.into_iter().next().expect("non-empty")
            }
            _ => truncate_id(image_id).to_owned(),
        })
    }

    fn resolve_image(&self, image_name: &str) -> Result<ImageRecord, ImageError> {
        self.lookup_image(image_name)?
            .ok_or_else(|| ImageError::NoSuchImage(image_name.to_owned()))
    }

    fn stored_name(&self, name: &str, keep_unqualified: bool) -> String {
        let canonical = self.config.canonical_name(name);
        if keep_unqualified && self.config.split_name(name).0.is_none() {
            self.config.split_name(&canonical).1.to_owned()
        } else {
            canonical
        }
    }
}

/// Only the literal names are reserved; a repository under some index may
/// still be called `scratch`.
fn validate_repository_name(name: &str) -> Result<(), ImageError> {
    if name.is_empty() {
        return Err(ImageError::RepositoryNameEmpty);
    }
    if name == "scratch" {
        return Err(ImageError::ReservedName(name.to_owned()));
    }
    Ok(())
}
