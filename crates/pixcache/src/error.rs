use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

/// Errors delivered to image completions.
///
/// None of these are thrown across the async boundary: every failure ends up
/// as the `result` of a [`DownloadOutcome`](crate::DownloadOutcome). The
/// type is cheap to clone because one network failure is fanned out to every
/// request attached to it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ImageError {
    #[error("HTTP error: {0}")]
    Transport(Arc<reqwest::Error>),

    #[error("Request timed out")]
    Timeout,

    #[error("Server returned status code {0}")]
    StatusCode(StatusCode),

    #[error("Response is not an image (content type: {0})")]
    InvalidMimeType(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    FileIo(Arc<std::io::Error>),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid cache key: {0:?}")]
    InvalidKey(String),

    #[error("Prefetch timed out after {0:?}")]
    PrefetchTimeout(Duration),

    #[error("Request was cancelled")]
    Cancelled,

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl ImageError {
    /// Cancellation is caller-initiated abandonment, not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ImageError::Cancelled)
    }

    /// Maps a reqwest error, keeping timeouts distinguishable from other
    /// transport failures.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ImageError::Timeout
        } else {
            ImageError::Transport(Arc::new(err))
        }
    }
}

impl From<reqwest::Error> for ImageError {
    fn from(err: reqwest::Error) -> Self {
        ImageError::from_transport(err)
    }
}

impl From<std::io::Error> for ImageError {
    fn from(err: std::io::Error) -> Self {
        ImageError::FileIo(Arc::new(err))
    }
}

impl From<url::ParseError> for ImageError {
    fn from(err: url::ParseError) -> Self {
        ImageError::InvalidUrl(err.to_string())
    }
}

impl From<image::ImageError> for ImageError {
    fn from(err: image::ImageError) -> Self {
        ImageError::Decode(err.to_string())
    }
}
