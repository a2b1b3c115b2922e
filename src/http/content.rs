use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{CaptureError, CaptureResult};
use crate::session::{ContentPort, Message, PrepareResponse, TabId};

/// Posts `{command, data}` messages to the page's webhook
pub struct HttpContentPort {
    client: reqwest::Client,
    url: String,
}

impl HttpContentPort {
    pub fn new(url: impl Into<String>, timeout: Duration) -> CaptureResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CaptureError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn post(&self, command: &str, data: Value) -> CaptureResult<reqwest::Response> {
        debug!("Sending {} to {}", command, self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&Message::new(command, data))
            .send()
            .await
            .map_err(|e| CaptureError::Device(format!("Page unreachable for {}: {}", command, e)))?;

        if !response.status().is_success() {
            return Err(CaptureError::Device(format!(
                "Page answered {} with status: {}",
                command,
                response.status()
            )));
        }

        Ok(response)
    }
}

#[async_trait::async_trait]
impl ContentPort for HttpContentPort {
    async fn prepare_recording(&self, tab: TabId) -> CaptureResult<PrepareResponse> {
        self.post("prepareRecording", json!({ "tabId": tab }))
            .await?
            .json::<PrepareResponse>()
            .await
            .map_err(|e| CaptureError::Device(format!("Invalid prepareRecording answer: {}", e)))
    }

    async fn start_recording(&self, tab: TabId) -> CaptureResult<()> {
        self.post("startRecording", json!({ "tabId": tab })).await?;
        Ok(())
    }

    async fn stop_recording(&self, tab: TabId, volume: f32) -> CaptureResult<()> {
        self.post("stopRecording", json!({ "tabId": tab, "volume": volume }))
            .await?;
        Ok(())
    }
}
