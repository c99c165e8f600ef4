//! Registry transport over the v2 HTTP wire protocol

use crate::{
    errors::ImageError,
    transfer::{
        manifest::{Manifest, TagList, MANIFEST_MEDIA_TYPE},
        RegistryClient,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::HeaderValue;
use reqwest::{header, Method};
use std::{collections::HashMap, time::Duration};

/// Network identity of the public index
///
/// The public index is reachable under a different host name than the one
/// used in references, and single-component repositories live in its
/// `library/` namespace. Other registries connect under their own name
/// with the remote name unchanged.
#[derive(Clone, Debug)]
pub struct PublicRegistry {
    /// Connect to the public index under this host name
    pub network_name: String,
    /// Reference index names that mean the public index
    pub also_known_as: Vec<String>,
    /// Namespace for single-component repository names
    pub library_prefix: Option<String>,
}

impl PublicRegistry {
    /// The built-in defaults for Docker Hub
    pub fn new() -> Self {
        PublicRegistry {
            network_name: "registry-1.docker.io".to_owned(),
            also_known_as: vec!["docker.io".to_owned(), "index.docker.io".to_owned()],
            library_prefix: Some("library".to_owned()),
        }
    }

    fn matches(&self, index: &str) -> bool {
        index == self.network_name || self.also_known_as.iter().any(|name| name == index)
    }

    /// The actual host to contact and the remote name to use on it
    fn resolve(&self, index: &str, remote: &str) -> (String, String) {
        if !self.matches(index) {
            return (index.to_owned(), remote.to_owned());
        }
        let remote = match &self.library_prefix {
            Some(prefix) if !remote.contains('/') => format!("{}/{}", prefix, remote),
            _ => remote.to_owned(),
        };
        (self.network_name.clone(), remote)
    }
}

impl Default for PublicRegistry {
    fn default() -> Self {
        PublicRegistry::new()
    }
}

/// Builder for configuring custom [HttpRegistryClient] instances
pub struct HttpClientBuilder {
    req: reqwest::ClientBuilder,
    public: PublicRegistry,
    logins: HashMap<String, (String, String)>,
}

impl HttpClientBuilder {
    /// Start constructing a custom transport
    pub fn new() -> Self {
        let req = reqwest::Client::builder().user_agent(HttpRegistryClient::default_user_agent());
        HttpClientBuilder {
            req,
            public: PublicRegistry::new(),
            logins: HashMap::new(),
        }
    }

    /// Set a timeout for each network request
    ///
    /// This timeout applies from the beginning of a request until the last
    /// byte has been received. By default there is no timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.req = self.req.timeout(timeout);
        self
    }

    /// Set a timeout for only the initial connect phase of each request
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.req = self.req.connect_timeout(timeout);
        self
    }

    /// Sets the `User-Agent` header used by this transport
    pub fn user_agent(mut self, value: HeaderValue) -> Self {
        self.req = self.req.user_agent(value);
        self
    }

    /// Set whether connections emit verbose logs
    ///
    /// When this is set, requests are logged at the `trace` level.
    pub fn connection_verbose(mut self, verbose: bool) -> Self {
        self.req = self.req.connection_verbose(verbose);
        self
    }

    /// Change how the public index is reached
    pub fn public_registry(mut self, public: PublicRegistry) -> Self {
        self.public = public;
        self
    }

    /// Store a username and password for use with a particular registry
    pub fn login(mut self, index: String, username: String, password: String) -> Self {
        self.logins.insert(index, (username, password));
        self
    }

    /// Construct the transport using the parameters from this builder
    pub fn build(self) -> Result<HttpRegistryClient, ImageError> {
        Ok(HttpRegistryClient {
            req: self.req.build()?,
            public: self.public,
            logins: self.logins,
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        HttpClientBuilder::new()
    }
}

struct Endpoint {
    scheme: &'static str,
    host: String,
    remote: String,
}

impl Endpoint {
    fn url(&self, suffix: &str) -> String {
        format!(
            "{}://{}/v2/{}/{}",
            self.scheme, self.host, self.remote, suffix
        )
    }
}

/// [RegistryClient] speaking the v2 protocol over HTTP
///
/// One client can talk to any number of registries; authentication,
/// timeouts, and the public index mapping are fixed at build time.
pub struct HttpRegistryClient {
    req: reqwest::Client,
    public: PublicRegistry,
    logins: HashMap<String, (String, String)>,
}

impl HttpRegistryClient {
    /// Construct a transport with default options
    pub fn new() -> Result<Self, ImageError> {
        HttpClientBuilder::new().build()
    }

    /// Construct a transport with custom options, via [HttpClientBuilder]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Return the default `User-Agent` used when no other is set
    pub fn default_user_agent() -> HeaderValue {
        static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
        HeaderValue::from_static(USER_AGENT)
    }

    fn endpoint(&self, index: &str, remote: &str) -> Endpoint {
        let (host, remote) = self.public.resolve(index, remote);
        // Hosts without a dot get the same development-friendly heuristic
        // Docker uses: plain http instead of https.
        let domain = host.split(':').next().unwrap_or(&host);
        let scheme = if domain.contains('.') { "https" } else { "http" };
        Endpoint {
            scheme,
            host,
            remote,
        }
    }

    fn request(&self, method: Method, index: &str, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.req.request(method, url);
        if let Some((username, password)) = self.logins.get(index) {
            builder = builder.basic_auth(username, Some(password));
        }
        builder
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn list_tags(&self, index: &str, remote: &str) -> Result<Vec<String>, ImageError> {
        let url = self.endpoint(index, remote).url("tags/list");
        log::debug!("GET {}", url);
        let list: TagList = self
            .request(Method::GET, index, &url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(list.tags)
    }

    async fn pull_manifest(
        &self,
        index: &str,
        remote: &str,
        reference: &str,
    ) -> Result<Manifest, ImageError> {
        let url = self
            .endpoint(index, remote)
            .url(&format!("manifests/{}", reference));
        log::debug!("GET {}", url);
        let body = self
            .request(Method::GET, index, &url)
            .header(header::ACCEPT, MANIFEST_MEDIA_TYPE)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        log::trace!("raw json manifest, {}", String::from_utf8_lossy(&body));
        Ok(serde_json::from_slice(&body)?)
    }

    async fn pull_blob(
        &self,
        index: &str,
        remote: &str,
        digest: &str,
    ) -> Result<Bytes, ImageError> {
        let url = self
            .endpoint(index, remote)
            .url(&format!("blobs/{}", digest));
        log::debug!("GET {}", url);
        let data = self
            .request(Method::GET, index, &url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        log::debug!("{} downloaded, {} bytes", digest, data.len());
        Ok(data)
    }

    async fn push_blob(
        &self,
        index: &str,
        remote: &str,
        digest: &str,
        data: Bytes,
    ) -> Result<(), ImageError> {
        let endpoint = self.endpoint(index, remote);

        let head = self
            .request(Method::HEAD, index, &endpoint.url(&format!("blobs/{}", digest)))
            .send()
            .await?;
        if head.status().is_success() {
            log::debug!("{} already on the registry, not uploading", digest);
            return Ok(());
        }

        let start = self
            .request(Method::POST, index, &endpoint.url("blobs/uploads/"))
            .send()
            .await?
            .error_for_status()?;
        let location = start
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                ImageError::Transport("blob upload did not return a location".to_owned())
            })?;
        let upload = if location.starts_with("http") {
            location.to_owned()
        } else {
            format!("{}://{}{}", endpoint.scheme, endpoint.host, location)
        };
        let separator = if upload.contains('?') { '&' } else { '?' };
        let upload = format!("{}{}digest={}", upload, separator, digest);

        log::info!("uploading {}, {} bytes", digest, data.len());
        self.request(Method::PUT, index, &upload)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn push_manifest(
        &self,
        index: &str,
        remote: &str,
        reference: &str,
        manifest: &Manifest,
    ) -> Result<(), ImageError> {
        let url = self
            .endpoint(index, remote)
            .url(&format!("manifests/{}", reference));
        log::debug!("PUT {}", url);
        self.request(Method::PUT, index, &url)
            .header(header::CONTENT_TYPE, MANIFEST_MEDIA_TYPE)
            .json(manifest)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
