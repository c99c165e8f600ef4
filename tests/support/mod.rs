#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tagstore::{
    ContentDigest, Descriptor, ImageContents, ImageError, ImageGraph, ImageRecord, Manifest,
    MemoryGraph, NullEvents, RegistryClient, RegistryConfig, TagStore, Transfers,
    CONFIG_MEDIA_TYPE, LAYER_MEDIA_TYPE, MANIFEST_MEDIA_TYPE,
};
use tempfile::TempDir;

/// A complete image fixture: config blob, layers, and the manifest that
/// ties them together
#[derive(Clone)]
pub struct TestImage {
    pub id: String,
    pub manifest_digest: String,
    pub manifest: Manifest,
    pub config: Bytes,
    pub layers: Vec<(String, Bytes)>,
}

/// Build a deterministic image whose content is derived from `seed`
pub fn test_image(seed: &str) -> TestImage {
    let config = Bytes::from(format!(
        "{{\"created\":\"2015-10-31T22:22:56Z\",\"rootfs\":{{\"seed\":{:?}}}}}",
        seed
    ));
    let id = ContentDigest::from_content(&config).as_str().to_owned();

    let layer_data = Bytes::from(format!("layer tarball for {}", seed));
    let layer_digest = ContentDigest::from_content(&layer_data)
        .as_str()
        .to_owned();

    let manifest = Manifest {
        schema_version: 2,
        media_type: MANIFEST_MEDIA_TYPE.to_owned(),
        config: Descriptor::describe(CONFIG_MEDIA_TYPE, &id, config.len() as u64),
        layers: vec![Descriptor::describe(
            LAYER_MEDIA_TYPE,
            &layer_digest,
            layer_data.len() as u64,
        )],
    };
    let manifest_digest = ContentDigest::from_content(&serde_json::to_vec(&manifest).unwrap())
        .as_str()
        .to_owned();

    TestImage {
        id,
        manifest_digest,
        manifest,
        config,
        layers: vec![(layer_digest, layer_data)],
    }
}

#[derive(Default)]
struct MockRepo {
    manifests: HashMap<String, Manifest>,
    blobs: HashMap<String, Bytes>,
}

#[derive(Default)]
struct MockState {
    repos: HashMap<String, MockRepo>,
    manifest_pulls: HashMap<String, usize>,
}

/// In-memory registry double
///
/// Counts manifest pulls per `(index, remote, reference)` and can delay
/// them, to widen the race window in coordination tests.
#[derive(Default)]
pub struct MockRegistry {
    state: Mutex<MockState>,
    delay: Mutex<Option<Duration>>,
}

impl MockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(MockRegistry::default())
    }

    /// Make an image pullable as `index/remote:tag`, and by its manifest
    /// digest
    pub fn publish(&self, index: &str, remote: &str, tag: &str, image: &TestImage) {
        let mut state = self.state.lock().unwrap();
        let repo = state.repos.entry(repo_key(index, remote)).or_default();
        repo.manifests.insert(tag.to_owned(), image.manifest.clone());
        repo.manifests
            .insert(image.manifest_digest.clone(), image.manifest.clone());
        repo.blobs.insert(image.id.clone(), image.config.clone());
        for (digest, data) in &image.layers {
            repo.blobs.insert(digest.clone(), data.clone());
        }
    }

    /// Delay every manifest pull by `duration`
    pub fn set_delay(&self, duration: Duration) {
        *self.delay.lock().unwrap() = Some(duration);
    }

    /// How many times a manifest was pulled
    pub fn manifest_pulls(&self, index: &str, remote: &str, reference: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .manifest_pulls
            .get(&pull_key(index, remote, reference))
            .copied()
            .unwrap_or(0)
    }

    /// Total manifest pulls across all references
    pub fn total_manifest_pulls(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.manifest_pulls.values().sum()
    }

    /// Is this blob present on the registry side?
    pub fn has_blob(&self, index: &str, remote: &str, digest: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .repos
            .get(&repo_key(index, remote))
            .map(|repo| repo.blobs.contains_key(digest))
            .unwrap_or(false)
    }
}

fn repo_key(index: &str, remote: &str) -> String {
    format!("{}/{}", index, remote)
}

fn pull_key(index: &str, remote: &str, reference: &str) -> String {
    format!("{}/{}@{}", index, remote, reference)
}

#[async_trait]
impl RegistryClient for MockRegistry {
    async fn list_tags(&self, index: &str, remote: &str) -> Result<Vec<String>, ImageError> {
        let state = self.state.lock().unwrap();
        let repo = state
            .repos
            .get(&repo_key(index, remote))
            .ok_or_else(|| ImageError::Transport(format!("unknown repository {}/{}", index, remote)))?;
        let mut tags: Vec<String> = repo
            .manifests
            .keys()
            .filter(|reference| !reference.contains(':'))
            .cloned()
            .collect();
        tags.sort();
        Ok(tags)
    }

    async fn pull_manifest(
        &self,
        index: &str,
        remote: &str,
        reference: &str,
    ) -> Result<Manifest, ImageError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        *state
            .manifest_pulls
            .entry(pull_key(index, remote, reference))
            .or_insert(0) += 1;
        state
            .repos
            .get(&repo_key(index, remote))
            .and_then(|repo| repo.manifests.get(reference))
            .cloned()
            .ok_or_else(|| {
                ImageError::Transport(format!(
                    "manifest {}/{}:{} not found",
                    index, remote, reference
                ))
            })
    }

    async fn pull_blob(
        &self,
        index: &str,
        remote: &str,
        digest: &str,
    ) -> Result<Bytes, ImageError> {
        let state = self.state.lock().unwrap();
        state
            .repos
            .get(&repo_key(index, remote))
            .and_then(|repo| repo.blobs.get(digest))
            .cloned()
            .ok_or_else(|| {
                ImageError::Transport(format!("blob {}/{}@{} not found", index, remote, digest))
            })
    }

    async fn push_blob(
        &self,
        index: &str,
        remote: &str,
        digest: &str,
        data: Bytes,
    ) -> Result<(), ImageError> {
        let mut state = self.state.lock().unwrap();
        let repo = state.repos.entry(repo_key(index, remote)).or_default();
        repo.blobs.insert(digest.to_owned(), data);
        Ok(())
    }

    async fn push_manifest(
        &self,
        index: &str,
        remote: &str,
        reference: &str,
        manifest: &Manifest,
    ) -> Result<(), ImageError> {
        let digest = ContentDigest::from_content(&serde_json::to_vec(manifest)?)
            .as_str()
            .to_owned();
        let mut state = self.state.lock().unwrap();
        let repo = state.repos.entry(repo_key(index, remote)).or_default();
        repo.manifests.insert(reference.to_owned(), manifest.clone());
        repo.manifests.insert(digest, manifest.clone());
        Ok(())
    }
}

/// Everything a scenario needs, wired together over a scratch directory
pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<TagStore>,
    pub graph: Arc<MemoryGraph>,
    pub registry: Arc<MockRegistry>,
    pub transfers: Arc<Transfers>,
}

pub fn fixture() -> Fixture {
    fixture_with_config(RegistryConfig::new())
}

pub fn fixture_with_config(config: RegistryConfig) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let graph = Arc::new(MemoryGraph::new());
    let store = Arc::new(
        TagStore::new(
            dir.path().join("repositories.json"),
            config,
            graph.clone() as Arc<dyn ImageGraph>,
        )
        .unwrap(),
    );
    let registry = MockRegistry::new();
    let transfers = Arc::new(Transfers::new(
        store.clone(),
        graph.clone() as Arc<dyn ImageGraph>,
        registry.clone() as Arc<dyn RegistryClient>,
        Arc::new(NullEvents),
    ));
    Fixture {
        dir,
        store,
        graph,
        registry,
        transfers,
    }
}

/// Register a bare image record in the graph so the store will accept
/// bindings to `id`
pub async fn seed_graph(graph: &MemoryGraph, id: &str) {
    graph
        .register(ImageContents {
            record: ImageRecord {
                id: id.to_owned(),
                created: None,
            },
            config: Bytes::new(),
            layers: Vec::new(),
        })
        .await
        .unwrap();
}
