pub mod error;

pub use error::{RendererError, Result};

use std::time::Duration;

use tracing::debug;

/// Options for one render request.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Load event to wait for before the DOM is captured.
    pub wait_until: WaitUntil,
    /// Extra settle time after the wait condition, in milliseconds.
    pub settle_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

impl WaitUntil {
    fn as_str(&self) -> &'static str {
        match self {
            WaitUntil::Load => "load",
            WaitUntil::DomContentLoaded => "domcontentloaded",
            WaitUntil::NetworkIdle => "networkidle2",
        }
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            wait_until: WaitUntil::NetworkIdle,
            settle_ms: None,
        }
    }
}

/// Client for a Browserless-style rendering service: POST a URL to
/// `/content`, get fully-rendered HTML back.
pub struct RendererClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RendererClient {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        let mut endpoint = format!("{}{path}", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }

    /// Fetch fully-rendered HTML for a URL via the `/content` endpoint.
    pub async fn content(&self, url: &str, options: &RenderOptions) -> Result<String> {
        let mut body = serde_json::json!({
            "url": url,
            "gotoOptions": { "waitUntil": options.wait_until.as_str() },
        });
        if let Some(ms) = options.settle_ms {
            body["waitForTimeout"] = serde_json::json!(ms);
        }

        debug!(url, wait_until = options.wait_until.as_str(), "Render request");

        let resp = self
            .client
            .post(self.endpoint("/content"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RendererError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }

    /// Probe the service. Used as the availability check for the rendered-DOM
    /// acquisition strategy.
    pub async fn healthy(&self) -> bool {
        match self.client.get(self.endpoint("/pressure")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
