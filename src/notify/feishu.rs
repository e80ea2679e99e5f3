// src/notify/feishu.rs
use anyhow::{anyhow, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;

use super::{Transport, TransportResponse};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Plain HTTP POST transport for the Feishu bot webhook.
///
/// No retries: a failed send is left to the next poll cycle, which offers the
/// same undelivered item again.
#[derive(Clone)]
pub struct WebhookTransport {
    client: Client,
    timeout: Duration,
}

impl WebhookTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for WebhookTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for WebhookTransport {
    async fn send(&self, endpoint: &str, body: &[u8]) -> Result<TransportResponse> {
        let rsp = self
            .client
            .post(endpoint)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("webhook request timed out after {:?}: {e}", self.timeout)
                } else {
                    anyhow!("webhook request failed: {e}")
                }
            })?;

        let status = rsp.status().as_u16();
        // A body we cannot read does not change the status outcome.
        let body = rsp.text().await.unwrap_or_default();
        Ok(TransportResponse { status, body })
    }
}
