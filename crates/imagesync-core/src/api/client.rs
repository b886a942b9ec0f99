//! HTTP client for the image server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use crate::sync::Manifest;

use super::ApiError;

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Path segment all image endpoints live under.
const IMAGES_SEGMENT: &str = "images";

/// Manifest endpoint, under `/images/`.
const MANIFEST_SEGMENT: &str = "dict";

/// Source of the manifest and image payloads.
#[async_trait]
pub trait ImageServer: Send + Sync {
    /// Fetch and parse the image manifest.
    async fn fetch_manifest(&self) -> Result<Manifest, ApiError>;

    /// Fetch the raw bytes of one image by its manifest filename.
    async fn fetch_asset(&self, filename: &str) -> Result<Vec<u8>, ApiError>;
}

/// Image server reached over HTTP(S).
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpImageServer {
    client: Client,
    base_url: Url,
}

impl HttpImageServer {
    /// Create a client for `host`.
    ///
    /// A bare host (`images.example.com`, `localhost:8000`) is reached over
    /// https. A host that already carries a scheme is used as given.
    pub fn new(host: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let raw = Self::base_url_for(host);
        let base_url = Url::parse(&raw).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(raw));
        }

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// `{base}/images/{name}` with `name` percent-encoded as one path
    /// segment, so `/`, `?` and `#` in a filename cannot change the target.
    fn image_url(&self, name: &str) -> Result<Url, ApiError> {
        if name.is_empty() || name == "." || name == ".." {
            return Err(ApiError::InvalidUrl(format!("invalid image name {:?}", name)));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(IMAGES_SEGMENT)
            .push(name);
        Ok(url)
    }

    fn base_url_for(host: &str) -> String {
        let host = host.trim().trim_end_matches('/');
        if host.contains("://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, ApiError> {
        debug!(url = %url, "GET");
        let response = self.client.get(url).send().await?;
        Self::check_response(response).await
    }
}

#[async_trait]
impl ImageServer for HttpImageServer {
    async fn fetch_manifest(&self) -> Result<Manifest, ApiError> {
        let response = self.get(self.image_url(MANIFEST_SEGMENT)?).await?;
        let text = response.text().await?;
        Ok(Manifest::from_json(&text)?)
    }

    async fn fetch_asset(&self, filename: &str) -> Result<Vec<u8>, ApiError> {
        let response = self.get(self.image_url(filename)?).await?;
        let bytes = response.bytes().await?;
        debug!(filename = filename, size = bytes.len(), "Fetched image");
        Ok(bytes.to_vec())
    }
}
