use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{CaptureError, CaptureResult};

const DEFAULT_MIME_TYPE: &str = "image/jpeg";

/// Downloaded cover image
#[derive(Debug, Clone, PartialEq)]
pub struct CoverArt {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl CoverArt {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Source of cover art bytes for a track
#[async_trait::async_trait]
pub trait CoverFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> CaptureResult<CoverArt>;
}

/// Fetch cover art, folding every failure into "no cover"
pub async fn fetch_best_effort(fetcher: &dyn CoverFetcher, url: &str) -> Option<CoverArt> {
    match fetcher.fetch(url).await {
        Ok(cover) if !cover.is_empty() => Some(cover),
        Ok(_) => {
            debug!("Cover at {} was empty, tagging without cover", url);
            None
        }
        Err(e) => {
            warn!("Cover fetch failed, tagging without cover: {}", e);
            None
        }
    }
}

/// Fetches cover art over HTTP(S)
pub struct HttpCoverFetcher {
    client: reqwest::Client,
}

impl HttpCoverFetcher {
    pub fn new(timeout: Duration) -> CaptureResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CaptureError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl CoverFetcher for HttpCoverFetcher {
    async fn fetch(&self, url: &str) -> CaptureResult<CoverArt> {
        if url.trim().is_empty() {
            return Err(CaptureError::Network("Track has no cover URL".to_string()));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CaptureError::Network(format!("Failed to fetch cover: {}", e)))?;

        if !response.status().is_success() {
            return Err(CaptureError::Network(format!(
                "Cover fetch failed with status: {}",
                response.status()
            )));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

        let data = response
            .bytes()
            .await
            .map_err(|e| CaptureError::Network(format!("Failed to read cover bytes: {}", e)))?;

        debug!("Fetched cover: {} bytes ({})", data.len(), mime_type);

        Ok(CoverArt {
            data: data.to_vec(),
            mime_type,
        })
    }
}
