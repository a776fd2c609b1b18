//! Image download port.

use async_trait::async_trait;
use parking_lot::Mutex;
use possync_engine::{SyncError, SyncResult};
use std::collections::HashMap;
use std::time::Duration;

/// Downloads image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fetches the body at `url`.
    async fn fetch(&self, url: &str) -> SyncResult<Vec<u8>>;
}

/// Fetches images over HTTP.
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    /// Creates a fetcher with a per-request timeout.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> SyncResult<Vec<u8>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Serves images from memory. Unknown URLs fail like a 404.
#[derive(Debug, Default)]
pub struct MockImageFetcher {
    images: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl MockImageFetcher {
    /// Creates an empty fetcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `bytes` at `url`.
    pub fn serve(&self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.images.lock().insert(url.into(), bytes.into());
    }

    /// Returns every URL requested so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ImageFetcher for MockImageFetcher {
    async fn fetch(&self, url: &str) -> SyncResult<Vec<u8>> {
        self.requests.lock().push(url.to_string());
        self.images.lock().get(url).cloned().ok_or(SyncError::Http {
            status: 404,
            body: format!("no image at {}", url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_serves_and_records() {
        let fetcher = MockImageFetcher::new();
        fetcher.serve("https://cdn/a.png", b"png".to_vec());

        assert_eq!(fetcher.fetch("https://cdn/a.png").await.unwrap(), b"png");
        let err = fetcher.fetch("https://cdn/missing.png").await.unwrap_err();
        assert!(matches!(err, SyncError::Http { status: 404, .. }));
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn http_fetch_unreachable_fails() {
        let fetcher = HttpImageFetcher::new(Duration::from_millis(500)).unwrap();
        assert!(fetcher.fetch("http://127.0.0.1:9/a.png").await.is_err());
    }
}
