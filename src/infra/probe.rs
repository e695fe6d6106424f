//! HTTP website liveness probe.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::core::{OrchestratorError, ReachabilityProbe};

/// Probe issuing a GET with a fixed timeout and no redirect following. 200, 301
/// and 302 count as reachable.
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    /// Probe with `timeout` per request.
    pub fn new(timeout: Duration) -> Result<Self, OrchestratorError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("prometheus-scout/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OrchestratorError::Backend(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn is_reachable(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                debug!(url, status = status.as_u16(), "probe answered");
                matches!(status, StatusCode::OK | StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND)
            }
            Err(err) => {
                debug!(url, error = %err, "probe failed");
                false
            }
        }
    }
}
