use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, warn};
use url::Url;

use crate::domain::{ResolverConfig, VoxError};
use crate::ports::HttpClient;

/// Reqwest-based payload fetcher with scheme validation, a per-request
/// timeout, and a streaming size cap.
pub struct HttpFetcher {
    client: Client,
    allow_insecure_http: bool,
}

impl HttpFetcher {
    pub fn new(config: &ResolverConfig) -> Result<Self, VoxError> {
        let client = Client::builder()
            .use_rustls_tls()
            .user_agent(format!("VoxPipe/{}", env!("CARGO_PKG_VERSION")))
            .timeout(config.download_timeout())
            .build()
            .map_err(|e| VoxError::HttpRequest(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            allow_insecure_http: config.allow_insecure_http,
        })
    }

    /// Check that a URL is well-formed and uses an accepted scheme.
    fn check_url(&self, url: &str) -> Result<(), VoxError> {
        let parsed = Url::parse(url).map_err(|e| VoxError::HttpRequest(e.to_string()))?;
        parsed
            .host_str()
            .ok_or_else(|| VoxError::HttpRequest("Invalid URL: no host".to_string()))?;

        match parsed.scheme() {
            "https" => Ok(()),
            "http" if self.allow_insecure_http => {
                warn!(url = url, "Downloading voice payload over plain HTTP");
                Ok(())
            }
            other => Err(VoxError::HttpRequest(format!(
                "URL scheme '{}' is not allowed for payload downloads",
                other
            ))),
        }
    }
}

#[async_trait]
impl HttpClient for HttpFetcher {
    async fn download_file(
        &self,
        url: &str,
        path: &Path,
        max_bytes: u64,
    ) -> Result<u64, VoxError> {
        use futures_util::StreamExt;
        use tokio::io::AsyncWriteExt;

        self.check_url(url)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| VoxError::HttpRequest(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VoxError::HttpRequest(format!(
                "HTTP {} for {}",
                status, url
            )));
        }

        // Reject oversized payloads up front when the server declares a length.
        if let Some(len) = response.content_length() {
            if len > max_bytes {
                return Err(VoxError::SizeLimitExceeded {
                    size_bytes: len,
                    limit_bytes: max_bytes,
                });
            }
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a temp file first, then rename atomically.
        let temp_path = path.with_extension("download");

        let cleanup_temp = || {
            let temp = temp_path.clone();
            async move {
                let _ = tokio::fs::remove_file(&temp).await;
            }
        };

        let mut file = match tokio::fs::File::create(&temp_path).await {
            Ok(f) => f,
            Err(e) => {
                cleanup_temp().await;
                return Err(VoxError::Io(e.to_string()));
            }
        };

        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    drop(file);
                    cleanup_temp().await;
                    return Err(VoxError::HttpRequest(e.to_string()));
                }
            };

            downloaded += chunk.len() as u64;
            // The cap is enforced mid-stream; content-length is not trusted.
            if downloaded > max_bytes {
                drop(file);
                cleanup_temp().await;
                return Err(VoxError::SizeLimitExceeded {
                    size_bytes: downloaded,
                    limit_bytes: max_bytes,
                });
            }

            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                cleanup_temp().await;
                return Err(VoxError::Io(e.to_string()));
            }
        }

        if let Err(e) = file.flush().await {
            drop(file);
            cleanup_temp().await;
            return Err(VoxError::Io(e.to_string()));
        }
        drop(file);

        if let Err(e) = tokio::fs::rename(&temp_path, path).await {
            cleanup_temp().await;
            return Err(VoxError::Io(e.to_string()));
        }

        info!(url = url, path = ?path, size = downloaded, "Voice payload downloaded");
        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(allow_insecure_http: bool) -> HttpFetcher {
        HttpFetcher::new(&ResolverConfig {
            allow_insecure_http,
            ..ResolverConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_https_url_is_accepted() {
        assert!(fetcher(false).check_url("https://cdn.example.com/voice.amr").is_ok());
    }

    #[test]
    fn test_plain_http_is_rejected_by_default() {
        assert!(fetcher(false).check_url("http://cdn.example.com/voice.amr").is_err());
    }

    #[test]
    fn test_plain_http_allowed_when_configured() {
        assert!(fetcher(true).check_url("http://cdn.example.com/voice.amr").is_ok());
    }

    #[test]
    fn test_other_schemes_are_rejected() {
        let f = fetcher(true);
        assert!(f.check_url("ftp://cdn.example.com/voice.amr").is_err());
        assert!(f.check_url("file:///etc/passwd").is_err());
        assert!(f.check_url("not a url").is_err());
    }
}
