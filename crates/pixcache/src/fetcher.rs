//! # Image Fetcher
//!
//! The network edge of the coordinator. [`HttpFetcher`] performs the GET and
//! validates status and content type; decoding happens afterwards so the
//! same step also covers disk reads.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::downloader::create_client;
use crate::error::ImageError;
use crate::request::ImageRequest;
use crate::ImageManagerConfig;

/// Fetches the raw bytes behind an [`ImageRequest`].
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, request: &ImageRequest) -> Result<Bytes, ImageError>;
}

/// reqwest backed fetcher for `http(s)://` and `file://` URLs.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    insecure_client: Client,
}

impl HttpFetcher {
    pub fn new(config: &ImageManagerConfig) -> Result<Self, ImageError> {
        Ok(Self {
            client: create_client(config, false)?,
            insecure_client: create_client(config, true)?,
        })
    }

    async fn fetch_file(request: &ImageRequest) -> Result<Bytes, ImageError> {
        let path = request
            .url
            .to_file_path()
            .map_err(|_| ImageError::InvalidUrl(request.url.to_string()))?;
        let data = tokio::fs::read(&path).await?;
        Ok(Bytes::from(data))
    }
}

/// `Ok` for `image/*` or a missing content type, which is left for decoding
/// to judge.
fn check_content_type(content_type: Option<&str>) -> Result<(), ImageError> {
    let Some(content_type) = content_type else {
        return Ok(());
    };

    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if mime.starts_with("image/") {
        Ok(())
    } else {
        Err(ImageError::InvalidMimeType(content_type.to_string()))
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, request: &ImageRequest) -> Result<Bytes, ImageError> {
        if request.url.scheme() == "file" {
            return Self::fetch_file(request).await;
        }

        let client = if request.accept_invalid_certs {
            &self.insecure_client
        } else {
            &self.client
        };

        let response = request
            .to_http(client)
            .send()
            .await
            .map_err(ImageError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImageError::StatusCode(status));
        }

        check_content_type(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        )?;

        let body = response
            .bytes()
            .await
            .map_err(ImageError::from_transport)?;
        debug!(url = %request.url, size = body.len(), "Fetched image body");
        Ok(body)
    }
}
