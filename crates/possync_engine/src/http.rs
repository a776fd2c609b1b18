//! HTTP implementation of the remote API.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteApi;
use async_trait::async_trait;
use possync_protocol::{PullPage, PullRequest, PushOutcome, Row};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Remote API over HTTP with JSON bodies.
///
/// - pull: `GET {base}/{table}?lastSync&lastId&limit&deviceId&branchId`
/// - push: `POST {base}/{table}` with the rows as a JSON array
#[derive(Debug, Clone)]
pub struct HttpRemote {
    base_url: String,
    client: Client,
    auth_token: Option<String>,
}

impl HttpRemote {
    /// Creates a client from the sync configuration.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            client,
            auth_token: config.auth_token.clone(),
        })
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the endpoint of a table.
    pub fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(SyncError::Http {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {}", e)))
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn pull(&self, table: &str, request: &PullRequest) -> SyncResult<PullPage> {
        let url = self.table_url(table);
        debug!(%url, last_sync = %request.last_sync, "pull page");
        let response = self
            .authorize(self.client.get(&url).query(&request.query_pairs()))
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn push(&self, table: &str, rows: &[Row]) -> SyncResult<PushOutcome> {
        let url = self.table_url(table);
        debug!(%url, rows = rows.len(), "push batch");
        let response = self
            .authorize(self.client.post(&url).json(rows))
            .send()
            .await?;
        Self::read_json(response).await
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout
        } else if let Some(status) = err.status() {
            SyncError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else if err.is_decode() {
            SyncError::Protocol(err.to_string())
        } else if err.is_builder() {
            SyncError::transport_fatal(err.to_string())
        } else {
            SyncError::transport_retryable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_urls() {
        let remote = HttpRemote::new(&SyncConfig::new("https://api.example.com/sync/")).unwrap();
        assert_eq!(remote.base_url(), "https://api.example.com/sync");
        assert_eq!(remote.table_url("clients"), "https://api.example.com/sync/clients");
    }

    #[tokio::test]
    async fn unreachable_host_is_retryable() {
        // Port 9 (discard) on localhost is closed on test machines.
        let config = SyncConfig::new("http://127.0.0.1:9")
            .with_timeout(std::time::Duration::from_secs(2));
        let remote = HttpRemote::new(&config).unwrap();
        let request = PullRequest {
            last_sync: "t".into(),
            last_id: None,
            limit: 1,
            device_id: "d".into(),
            branch_id: "b".into(),
        };
        let err = remote.pull("clients", &request).await.unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
    }
}
