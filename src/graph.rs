//! Contract with the content-addressed image graph
//!
//! The graph turns opaque image IDs into stored images. The reference store
//! only records IDs the graph has vouched for; it holds no back-pointers,
//! so the graph outlives the store and ownership stays a tree.

use crate::errors::ImageError;
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

/// Metadata for one image known to the graph
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRecord {
    /// Opaque content-hash ID
    pub id: String,
    /// Creation timestamp as recorded in the image config, if any
    pub created: Option<String>,
}

/// One layer of image filesystem data, addressed by its digest
#[derive(Clone, Debug)]
pub struct ImageLayer {
    pub digest: String,
    pub data: Bytes,
}

/// Everything needed to materialize or re-transmit one image
#[derive(Clone, Debug)]
pub struct ImageContents {
    pub record: ImageRecord,
    /// Raw image config blob; its digest is the image ID
    pub config: Bytes,
    pub layers: Vec<ImageLayer>,
}

/// Capability contract for the image graph
///
/// `get` resolves a full ID, and may resolve an unambiguous prefix;
/// `exists` is an exact check. `register` and `export` move whole images in
/// and out.
#[async_trait]
pub trait ImageGraph: Send + Sync {
    /// Existence and metadata lookup, by full ID or unambiguous prefix
    fn get(&self, id_or_prefix: &str) -> Result<Option<ImageRecord>, ImageError>;

    /// Does an image with exactly this ID exist?
    fn exists(&self, id: &str) -> bool;

    /// Materialize an image from its config and layer data
    async fn register(&self, contents: ImageContents) -> Result<(), ImageError>;

    /// Hand back a registered image's config and layers, for pushing
    async fn export(&self, id: &str) -> Result<ImageContents, ImageError>;
}

/// In-memory [ImageGraph], for embedding and tests
#[derive(Default)]
pub struct MemoryGraph {
    images: Mutex<HashMap<String, ImageContents>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        MemoryGraph::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ImageContents>> {
        self.images.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ImageGraph for MemoryGraph {
    fn get(&self, id_or_prefix: &str) -> Result<Option<ImageRecord>, ImageError> {
        let images = self.lock();
        if let Some(contents) = images.get(id_or_prefix) {
            return Ok(Some(contents.record.clone()));
        }
        let mut matches = images
            .values()
            .filter(|contents| contents.record.id.starts_with(id_or_prefix));
        match (matches.next(), matches.next()) {
            (Some(contents), None) => Ok(Some(contents.record.clone())),
            _ => Ok(None),
        }
    }

    fn exists(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    async fn register(&self, contents: ImageContents) -> Result<(), ImageError> {
        self.lock().insert(contents.record.id.clone(), contents);
        Ok(())
    }

    async fn export(&self, id: &str) -> Result<ImageContents, ImageError> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ImageError::NoSuchImage(id.to_owned()))
    }
}
