//! Error types surfaced by the reference store and transfer machinery

use thiserror::Error;

/// Errors from reference parsing, the tag store, and pull/push transfers
#[derive(Error, Debug)]
pub enum ImageError {
    /// invalid image reference format
    #[error("invalid image reference format: {0:?}")]
    InvalidReferenceFormat(String),

    /// illegal tag name
    #[error("illegal tag name ({0:?}): only [A-Za-z0-9_.-] are allowed, minimum 1, maximum 128 in length")]
    InvalidTagName(String),

    /// illegal digest
    #[error("illegal digest ({0:?}): must be of the form [a-zA-Z0-9-_+.]+:[a-fA-F0-9]+")]
    InvalidDigest(String),

    /// repository name can't be empty
    #[error("repository name can't be empty")]
    RepositoryNameEmpty,

    /// reserved repository name
    #[error("{0:?} is a reserved name")]
    ReservedName(String),

    /// no repository under this name
    #[error("no such repository: {0}")]
    NoSuchRepository(String),

    /// the repository exists but the reference within it does not
    #[error("no such reference: {repository}:{reference}")]
    NoSuchReference {
        repository: String,
        reference: String,
    },

    /// nothing in the store or the image graph matches this name
    #[error("no such image: {0}")]
    NoSuchImage(String),

    /// a tag binding already exists and force was not requested
    #[error("conflict: tag {tag} is already set to image {existing}, use force to replace it")]
    TagConflict { tag: String, existing: String },

    /// a digest binding already exists; digests are content identity and are
    /// never overwritten
    #[error("conflict: digest {digest} is already set to image {existing}")]
    DigestConflict { digest: String, existing: String },

    /// the resolved registry is on the block list
    #[error("registry {0} is blocked by the current configuration")]
    RegistryBlocked(String),

    /// a transfer of the opposite kind holds the key
    #[error("{kind} {key} is already in progress")]
    OperationInProgress { kind: &'static str, key: String },

    /// an attached transfer completed without producing the expected binding
    #[error("attached transfer failed: {0}")]
    AttachedTransferFailed(String),

    /// push to the public registry declined at the confirmation prompt
    #[error("push to the public registry declined")]
    PushDeclined,

    /// persistence io error
    #[error("persistence io error: {0}")]
    Persistence(#[from] std::io::Error),

    /// the persisted reference file failed to parse
    #[error("corrupt reference state at {path:?}: {source}")]
    CorruptState {
        path: std::path::PathBuf,
        source: serde_json::Error,
    },

    /// json error
    #[error("json error: {0}")]
    JSON(#[from] serde_json::Error),

    /// network request error
    #[error("network request error: {0}")]
    NetworkRequest(#[from] reqwest::Error),

    /// opaque error surfaced from a registry transport
    #[error("registry transport error: {0}")]
    Transport(String),

    /// only v2 image manifests are supported
    #[error("only v2 image manifests are supported")]
    UnsupportedManifestType,

    /// calculated digest of downloaded content is not what we asked for
    #[error("content digest mismatch, expected {expected}, found {found}")]
    ContentDigestMismatch { expected: String, found: String },

    /// asynchronous transfer task failed
    #[error("asynchronous transfer task failed")]
    TaskJoin(#[from] tokio::task::JoinError),
}
