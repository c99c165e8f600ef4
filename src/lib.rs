//! Reference store of a container image daemon
//!
//! Maps human-readable image references onto content-addressed image IDs,
//! persists the mapping crash-safely, and coordinates concurrent pulls and
//! pushes so at most one transfer per key is ever in flight.

#[macro_use] extern crate lazy_static;

mod coordinator;
mod errors;
mod events;
mod graph;
mod reference;
mod resolver;
mod store;
mod transfer;

pub use crate::{
    coordinator::{
        Acquired, CompletionSignal, TransferCoordinator, TransferKind, TransferPermit,
        TransferStatus,
    },
    errors::ImageError,
    events::{EventSink, LoggedEvents, NullEvents},
    graph::{ImageContents, ImageGraph, ImageLayer, ImageRecord, MemoryGraph},
    reference::{image_reference, truncate_id, ContentDigest, ImageName, ImageVersion, Tag},
    resolver::{RegistryConfig, BLOCK_ALL, BLOCK_PUBLIC},
    store::{Repository, TagStore},
    transfer::{
        Descriptor, HttpClientBuilder, HttpRegistryClient, Manifest, PublicRegistry, PullSummary,
        PulledImage, PushOptions, RegistryClient, TagList, Transfers, CONFIG_MEDIA_TYPE,
        LAYER_MEDIA_TYPE, MANIFEST_MEDIA_TYPE,
    },
};
