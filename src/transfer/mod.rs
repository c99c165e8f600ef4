//! Orchestration of pull and push transfers against remote registries
//!
//! The orchestrator is the one component that composes the resolver, the
//! reference store, and the transfer coordinator, and it alone talks to
//! the external graph, registry transport, and event sink. The store is
//! only ever updated with bindings for fully materialized images.

mod http;
mod manifest;

pub use http::{HttpClientBuilder, HttpRegistryClient, PublicRegistry};
pub use manifest::{
    Descriptor, Manifest, TagList, CONFIG_MEDIA_TYPE, LAYER_MEDIA_TYPE, MANIFEST_MEDIA_TYPE,
};

use crate::{
    coordinator::{Acquired, CompletionSignal, TransferCoordinator, TransferKind, TransferStatus},
    errors::ImageError,
    events::EventSink,
    graph::{ImageContents, ImageGraph, ImageLayer, ImageRecord},
    reference::{image_reference, ContentDigest, ImageName, ImageVersion},
    store::TagStore,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::{
    io,
    io::{IsTerminal, Write},
    sync::Arc,
};
use tokio::task;

/// Transport contract with a remote registry
///
/// `index` names the registry to contact and `remote` the repository path
/// on it. Implementations own protocol details such as endpoint selection
/// and the public index's `library/` namespace for single-component names.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Enumerate the tags of a remote repository
    async fn list_tags(&self, index: &str, remote: &str) -> Result<Vec<String>, ImageError>;

    /// Fetch a manifest by tag or digest
    async fn pull_manifest(
        &self,
        index: &str,
        remote: &str,
        reference: &str,
    ) -> Result<Manifest, ImageError>;

    /// Fetch one blob by digest
    async fn pull_blob(&self, index: &str, remote: &str, digest: &str)
        -> Result<Bytes, ImageError>;

    /// Upload one blob
    async fn push_blob(
        &self,
        index: &str,
        remote: &str,
        digest: &str,
        data: Bytes,
    ) -> Result<(), ImageError>;

    /// Upload a manifest under a tag
    async fn push_manifest(
        &self,
        index: &str,
        remote: &str,
        reference: &str,
        manifest: &Manifest,
    ) -> Result<(), ImageError>;
}

/// One reference bound by a completed pull
#[derive(Clone, Debug)]
pub struct PulledImage {
    pub reference: String,
    pub image_id: String,
}

/// What a pull left in the reference store
#[derive(Clone, Debug)]
pub struct PullSummary {
    /// The fully-qualified repository the references were stored under
    pub repository: String,
    pub images: Vec<PulledImage>,
}

/// Knobs for a push
#[derive(Clone, Debug, Default)]
pub struct PushOptions {
    /// Skip the interactive confirmation before pushing to the public
    /// registry
    pub skip_public_prompt: bool,
}

#[derive(Clone)]
struct TransferEnv {
    store: Arc<TagStore>,
    graph: Arc<dyn ImageGraph>,
    client: Arc<dyn RegistryClient>,
    events: Arc<dyn EventSink>,
}

/// Pull/push orchestrator
///
/// At most one transfer per key is in flight at any time; later callers
/// with the same key attach to the existing transfer and observe its
/// result. A transfer keeps running even when the caller that started it
/// goes away, so attached observers always see a completed transfer.
pub struct Transfers {
    env: TransferEnv,
    coordinator: TransferCoordinator,
}

impl Transfers {
    pub fn new(
        store: Arc<TagStore>,
        graph: Arc<dyn ImageGraph>,
        client: Arc<dyn RegistryClient>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Transfers {
            env: TransferEnv {
                store,
                graph,
                client,
                events,
            },
            coordinator: TransferCoordinator::new(),
        }
    }

    /// Pull one reference, or every tag of a repository
    ///
    /// The reference resolves against the store's candidates first, so a
    /// repository already known under a non-default registry keeps pulling
    /// from there. Resolution failures and blocked registries surface
    /// before any network traffic.
    pub async fn pull(&self, name: &ImageName, all_tags: bool) -> Result<PullSummary, ImageError> {
        let config = self.env.store.config();
        let input = name.repository();
        let local = match self.env.store.best_candidate(&input)? {
            Some(local) => local,
            None => config.canonical_name(&input),
        };
        let (index, remote) = config.split_name(&local);
        let index = index.unwrap_or_else(|| config.default_registry()).to_owned();
        let remote = remote.to_owned();
        if !config.allowed(Some(&index)) {
            return Err(ImageError::RegistryBlocked(index));
        }

        let version = name.version();
        let key = if all_tags {
            local.clone()
        } else {
            format!("{}:{}", local, version.as_str())
        };

        match self.coordinator.acquire(TransferKind::Pull, &key)? {
            Acquired::Joined(signal) => self.attach_pull(signal, &local, all_tags, &version).await,
            Acquired::Owner(permit) => {
                let env = self.env.clone();
                let local = local.clone();
                let version = version.clone();
                // The transfer runs detached from this caller; dropping the
                // future that awaits it does not abort the download.
                let handle = task::spawn(async move {
                    let result = run_pull(&env, &index, &remote, &local, all_tags, &version).await;
                    match &result {
                        Ok(_) => permit.complete(TransferStatus::Success),
                        Err(e) => permit.complete(TransferStatus::Failed(e.to_string())),
                    }
                    result
                });
                handle.await?
            }
        }
    }

    async fn attach_pull(
        &self,
        signal: CompletionSignal,
        local: &str,
        all_tags: bool,
        version: &ImageVersion,
    ) -> Result<PullSummary, ImageError> {
        log::info!("pull of {} already in progress, waiting for it", local);
        match signal.wait().await {
            TransferStatus::Failed(message) => Err(ImageError::AttachedTransferFailed(message)),
            _ => {
                // The transfer finished, or its initiator went away; either
                // way the store now tells us whether the binding we wanted
                // materialized.
                if all_tags {
                    match self.env.store.get(local)? {
                        Some(repo) => Ok(PullSummary {
                            repository: local.to_owned(),
                            images: repo
                                .tags()
                                .map(|(reference, image_id)| PulledImage {
                                    reference: reference.to_owned(),
                                    image_id: image_id.to_owned(),
                                })
                                .collect(),
                        }),
                        None => Err(ImageError::AttachedTransferFailed(format!(
                            "no references for {} after transfer",
                            local
                        ))),
                    }
                } else {
                    match self.env.store.get_image(local, version.as_str())? {
                        Some(record) => Ok(PullSummary {
                            repository: local.to_owned(),
                            images: vec![PulledImage {
                                reference: version.as_str().to_owned(),
                                image_id: record.id,
                            }],
                        }),
                        None => Err(ImageError::AttachedTransferFailed(format!(
                            "{} did not materialize",
                            image_reference(local, version.as_str())
                        ))),
                    }
                }
            }
        }
    }

    /// Push one tag, or every tag of a repository
    ///
    /// The repository must already be known to the store; a repository
    /// without tags cannot be pushed. Pushing to a blocked registry fails
    /// before any network traffic, and a push to the public registry asks
    /// for confirmation when standard input is a terminal.
    pub async fn push(&self, name: &ImageName, options: &PushOptions) -> Result<(), ImageError> {
        if name.content_digest().is_some() {
            return Err(ImageError::InvalidReferenceFormat(name.to_string()));
        }
        let config = self.env.store.config();
        let input = name.repository();
        let local = self
            .env
            .store
            .best_candidate(&input)?
            .ok_or_else(|| ImageError::NoSuchRepository(input.clone()))?;
        let (index, remote) = config.split_name(&local);
        let index = index.unwrap_or_else(|| config.default_registry()).to_owned();
        let remote = remote.to_owned();
        if !config.allowed(Some(&index)) {
            return Err(ImageError::RegistryBlocked(index));
        }
        if index == config.default_registry() && !options.skip_public_prompt {
            confirm_public_push(&index)?;
        }

        let repo = self
            .env
            .store
            .get(&local)?
            .ok_or_else(|| ImageError::NoSuchRepository(local.clone()))?;
        let to_push: Vec<(String, String)> = match name.tag() {
            Some(tag) => match repo.get(tag.as_str()) {
                Some(image_id) => vec![(tag.as_str().to_owned(), image_id.to_owned())],
                None => {
                    return Err(ImageError::NoSuchReference {
                        repository: local,
                        reference: tag.as_str().to_owned(),
                    })
                }
            },
            None => repo
                .tags()
                .map(|(tag, image_id)| (tag.to_owned(), image_id.to_owned()))
                .collect(),
        };
        if to_push.is_empty() {
            return Err(ImageError::NoSuchRepository(local));
        }

        let key = match name.tag() {
            Some(tag) => format!("{}:{}", local, tag),
            None => local.clone(),
        };
        match self.coordinator.acquire(TransferKind::Push, &key)? {
            Acquired::Joined(signal) => match signal.wait().await {
                TransferStatus::Failed(message) => {
                    Err(ImageError::AttachedTransferFailed(message))
                }
                _ => Ok(()),
            },
            Acquired::Owner(permit) => {
                let env = self.env.clone();
                let handle = task::spawn(async move {
                    let result = run_push(&env, &index, &remote, &local, to_push).await;
                    match &result {
                        Ok(()) => permit.complete(TransferStatus::Success),
                        Err(e) => permit.complete(TransferStatus::Failed(e.to_string())),
                    }
                    result
                });
                handle.await?
            }
        }
    }
}

async fn run_pull(
    env: &TransferEnv,
    index: &str,
    remote: &str,
    local: &str,
    all_tags: bool,
    version: &ImageVersion,
) -> Result<PullSummary, ImageError> {
    let references: Vec<String> = if all_tags {
        env.client.list_tags(index, remote).await?
    } else {
        vec![version.as_str().to_owned()]
    };
    log::info!(
        "pulling {} reference(s) of {}/{}",
        references.len(),
        index,
        remote
    );

    let mut images = Vec::new();
    for reference in references {
        let image_id = pull_image(env, index, remote, &reference).await?;
        // Only the requested reference is bound; sibling tags of a shared
        // image are left alone.
        if reference.contains(':') {
            env.store.set_digest(local, &reference, &image_id, false)?;
        } else {
            env.store.tag(local, &reference, &image_id, true, false)?;
        }
        env.events
            .log("pull", &image_id, &image_reference(local, &reference));
        images.push(PulledImage {
            reference,
            image_id,
        });
    }
    Ok(PullSummary {
        repository: local.to_owned(),
        images,
    })
}

/// Fetch one image into the graph, returning its ID
///
/// An image already present in the graph is not downloaded again and keeps
/// its ID.
async fn pull_image(
    env: &TransferEnv,
    index: &str,
    remote: &str,
    reference: &str,
) -> Result<String, ImageError> {
    let manifest = env.client.pull_manifest(index, remote, reference).await?;
    if manifest.schema_version != 2 {
        return Err(ImageError::UnsupportedManifestType);
    }
    let image_id = manifest.config.digest.clone();
    if env.graph.exists(&image_id) {
        log::debug!("{} already in the graph, skipping download", image_id);
        return Ok(image_id);
    }

    let config = fetch_blob(env, index, remote, &manifest.config.digest).await?;
    let created = serde_json::from_slice::<serde_json::Value>(&config)
        .ok()
        .and_then(|value| value.get("created").and_then(|v| v.as_str()).map(str::to_owned));

    let mut tasks = FuturesUnordered::new();
    for link in manifest.layers {
        let env = env.clone();
        let index = index.to_owned();
        let remote = remote.to_owned();
        tasks.push(task::spawn(async move {
            let data = fetch_blob(&env, &index, &remote, &link.digest).await?;
            Ok::<ImageLayer, ImageError>(ImageLayer {
                digest: link.digest,
                data,
            })
        }));
    }
    let mut layers = Vec::new();
    while let Some(result) = tasks.next().await {
        layers.push(result??);
    }

    env.graph
        .register(ImageContents {
            record: ImageRecord {
                id: image_id.clone(),
                created,
            },
            config,
            layers,
        })
        .await?;
    Ok(image_id)
}

async fn fetch_blob(
    env: &TransferEnv,
    index: &str,
    remote: &str,
    digest: &str,
) -> Result<Bytes, ImageError> {
    let data = env.client.pull_blob(index, remote, digest).await?;
    if digest.starts_with("sha256:") {
        let found = ContentDigest::from_content(&data);
        if found.as_str() != digest {
            return Err(ImageError::ContentDigestMismatch {
                expected: digest.to_owned(),
                found: found.as_str().to_owned(),
            });
        }
    }
    Ok(data)
}

async fn run_push(
    env: &TransferEnv,
    index: &str,
    remote: &str,
    local: &str,
    to_push: Vec<(String, String)>,
) -> Result<(), ImageError> {
    for (tag, image_id) in to_push {
        log::info!(
            "pushing {} to {}/{}",
            image_reference(local, &tag),
            index,
            remote
        );
        let contents = env.graph.export(&image_id).await?;
        let mut layers = Vec::new();
        for layer in &contents.layers {
            env.client
                .push_blob(index, remote, &layer.digest, layer.data.clone())
                .await?;
            layers.push(Descriptor::describe(
                LAYER_MEDIA_TYPE,
                &layer.digest,
                layer.data.len() as u64,
            ));
        }
        env.client
            .push_blob(index, remote, &image_id, contents.config.clone())
            .await?;
        let manifest = Manifest {
            schema_version: 2,
            media_type: MANIFEST_MEDIA_TYPE.to_owned(),
            config: Descriptor::describe(
                CONFIG_MEDIA_TYPE,
                &image_id,
                contents.config.len() as u64,
            ),
            layers,
        };
        env.client
            .push_manifest(index, remote, &tag, &manifest)
            .await?;
        env.events
            .log("push", &image_id, &image_reference(local, &tag));
    }
    Ok(())
}

fn confirm_public_push(index: &str) -> Result<(), ImageError> {
    if !io::stdin().is_terminal() {
        return Ok(());
    }
    let mut out = io::stderr();
    write!(
        out,
        "this will push to the public registry {}, continue? [y/N] ",
        index
    )?;
    out.flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    match line.trim() {
        "y" | "Y" | "yes" => Ok(()),
        _ => Err(ImageError::PushDeclined),
    }
}
