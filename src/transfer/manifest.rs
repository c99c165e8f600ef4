use serde::{Deserialize, Serialize};

/// Media type of a v2 schema 2 manifest document
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Media type of an image config blob
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";

/// Media type of a gzip-compressed layer tarball
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Image manifest as it travels over the v2 registry protocol
///
/// Models only what the daemon acts on: the config descriptor, whose
/// digest doubles as the image ID, and the ordered layer list. Fields the
/// registry sends beyond these are dropped on parse and never produced.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

/// Content-addressed pointer to one blob held by a registry
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub digest: String,
    pub size: u64,
    pub media_type: String,
}

impl Descriptor {
    /// Describe a blob by its type, digest, and byte length
    pub fn describe(media_type: &str, digest: &str, size: u64) -> Self {
        Descriptor {
            digest: digest.to_owned(),
            size,
            media_type: media_type.to_owned(),
        }
    }
}

/// Response body of the `/v2/<name>/tags/list` endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TagList {
    pub name: String,
    pub tags: Vec<String>,
}
