use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::CONTENT_TYPE;

use crate::{ByteStream, MediaError, MediaResult, MediaType};

/// A source opened for reading, with the headers the store needs
pub struct FetchedSource {
    /// Declared content type, e.g. `image/jpeg`
    pub content_type: String,

    /// Declared body length in bytes
    pub content_length: u64,

    pub body: ByteStream,
}

impl FetchedSource {
    /// Media type derived from the content type family
    pub fn media_type(&self) -> MediaResult<MediaType> {
        MediaType::from_content_type(&self.content_type)
    }
}

impl std::fmt::Debug for FetchedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedSource")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Opens source content by location.
///
/// Every call opens an independent stream; the upload path fetches once for
/// hashing and once per variant.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> MediaResult<FetchedSource>;
}

/// Fetches sources over HTTP(S)
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (timeouts, proxies, TLS roots)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> MediaResult<FetchedSource> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| MediaError::invalid(format!("Malformed source URL {}: {}", url, e)))?;

        let response = self.client.get(parsed).send().await.map_err(MediaError::fetch)?;

        let status = response.status();
        if status.is_client_error() {
            return Err(MediaError::invalid(format!("Source {} returned {}", url, status)));
        }
        let response = response.error_for_status().map_err(MediaError::fetch)?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| MediaError::invalid(format!("No content type header provided by {}", url)))?
            .to_string();

        let content_length = response
            .content_length()
            .ok_or_else(|| MediaError::invalid(format!("No content length provided by {}", url)))?;

        let body = response.bytes_stream().map_err(std::io::Error::other);

        Ok(FetchedSource {
            content_type,
            content_length,
            body: Box::pin(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_malformed_url_is_input_error() {
        let result = HttpFetcher::new().fetch("not a url").await;
        assert!(matches!(result, Err(MediaError::Invalid { .. })));
    }
}
