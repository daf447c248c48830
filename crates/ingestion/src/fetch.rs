//! Remote archive access over HTTP.
//!
//! Key features:
//! - Basic or bearer authentication
//! - Exponential backoff retry on transient failures
//! - Streaming straight into the caller's partial file

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::error::FetchError;
use crate::request::Credentials;

/// Access to a remote archive.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Lines of the manifest at `url`, each the URL of one advertised file.
    async fn list_advertised(&self, url: &str) -> Result<Vec<String>, FetchError>;

    /// Download `url` into `dest`, returning the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

/// Configuration for the HTTP fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial retry delay (doubles each retry)
    pub initial_retry_delay: Duration,
    /// Maximum retry delay
    pub max_retry_delay: Duration,
    /// HTTP request timeout
    pub request_timeout: Duration,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_retry_delay: Duration::from_secs(2),
            max_retry_delay: Duration::from_secs(60),
            request_timeout: Duration::from_secs(600),
        }
    }
}

/// [`RemoteFetcher`] over reqwest.
pub struct HttpFetcher {
    client: Client,
    config: HttpFetcherConfig,
    credentials: Credentials,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig, credentials: Credentials) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            client,
            config,
            credentials,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.credentials.token {
            request.bearer_auth(token)
        } else if let Some(username) = &self.credentials.username {
            request.basic_auth(username, self.credentials.password.as_deref())
        } else {
            request
        }
    }

    /// GET `url`, retrying transient failures with exponential backoff.
    async fn get(&self, url: &str) -> Result<Response, FetchError> {
        let mut retry_count = 0;
        let mut delay = self.config.initial_retry_delay;

        loop {
            let result = match self.authorize(self.client.get(url)).send().await {
                Ok(response) => check_status(url, response),
                Err(err) => Err(FetchError::from(err)),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() && retry_count < self.config.max_retries => {
                    retry_count += 1;
                    warn!(
                        url = %url,
                        error = %err,
                        retry = retry_count,
                        max_retries = self.config.max_retries,
                        delay_secs = delay.as_secs(),
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.config.max_retry_delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Map HTTP status codes onto fetch errors.
fn check_status(url: &str, response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::Auth {
            url: url.to_string(),
            status: status.as_u16(),
        },
        StatusCode::NOT_FOUND => FetchError::NotFound(url.to_string()),
        _ => FetchError::Http {
            url: url.to_string(),
            status: status.as_u16(),
        },
    })
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    #[instrument(skip(self))]
    async fn list_advertised(&self, url: &str) -> Result<Vec<String>, FetchError> {
        let text = self.get(url).await?.text().await?;
        let entries: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        info!(url = %url, entries = entries.len(), "Loaded manifest");
        Ok(entries)
    }

    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let response = self.get(url).await?;
        let expected = response.content_length();

        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        if let Some(expected) = expected {
            if expected != written {
                return Err(FetchError::Network(format!(
                    "download size mismatch: expected {} bytes, got {}",
                    expected, written
                )));
            }
        }

        debug!(url = %url, bytes = written, "Download completed");
        Ok(written)
    }
}

/// Join a mirror base URL and a relative path.
pub fn join_url(base: &str, relative: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), relative.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://a.org/pool/", "/2020/x.tif"), "https://a.org/pool/2020/x.tif");
        assert_eq!(join_url("https://a.org/pool", "2020/x.tif"), "https://a.org/pool/2020/x.tif");
    }

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Network("reset".into()).is_transient());
        assert!(FetchError::Http {
            url: "u".into(),
            status: 503
        }
        .is_transient());
        assert!(!FetchError::Http {
            url: "u".into(),
            status: 400
        }
        .is_transient());
        assert!(!FetchError::Auth {
            url: "u".into(),
            status: 401
        }
        .is_transient());
        assert!(!FetchError::NotFound("u".into()).is_transient());
    }

    #[test]
    fn test_fetcher_builds_without_credentials() {
        let fetcher = HttpFetcher::new(HttpFetcherConfig::default(), Credentials::default());
        assert!(fetcher.is_ok());
    }
}
