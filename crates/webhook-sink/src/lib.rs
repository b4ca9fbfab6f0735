//! Webhook delivery for db-webhook-relay
//!
//! Each [`ChangeEvent`] is POSTed as JSON to a single configured URL.
//! Failed attempts are retried a fixed number of times with a fixed delay
//! between them; there is no backoff growth.

use async_trait::async_trait;
use relay_core::{ChangeEvent, Notify};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Webhook delivery settings
#[derive(Clone, Debug)]
pub struct WebhookConfig {
    /// Destination URL
    pub url: String,
    /// Per-attempt request timeout
    pub timeout: Duration,
    /// Additional attempts after the first one
    pub retry_count: u32,
    /// Pause before each retry
    pub retry_delay: Duration,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("webhook returned HTTP {0}")]
    Status(StatusCode),

    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub struct WebhookNotifier {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    /// Deliver `event`, making up to `retry_count + 1` attempts. A 2xx
    /// response ends the loop; anything else is retried. After the last
    /// attempt the most recent error is logged and returned.
    pub async fn deliver(&self, event: &ChangeEvent) -> Result<(), DeliveryError> {
        let body = event.to_json_vec()?;
        let retry_count = self.config.retry_count;

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                info!(
                    "Retry {attempt}/{retry_count} for {} event on table {}",
                    event.operation(),
                    event.table()
                );
                tokio::time::sleep(self.config.retry_delay).await;
            }

            match self.post(body.clone()).await {
                Ok(()) => {
                    info!(
                        "Notification delivered: {} on table {}",
                        event.operation(),
                        event.table()
                    );
                    return Ok(());
                }
                Err(e) => {
                    match &e {
                        DeliveryError::Status(status) => {
                            warn!("Webhook returned status {status} (attempt {})", attempt + 1)
                        }
                        other => error!("Webhook delivery failed (attempt {}): {other}", attempt + 1),
                    }
                    if attempt >= retry_count {
                        error!("Notification failed after {} attempts: {e}", attempt + 1);
                        return Err(e);
                    }
                }
            }
            attempt += 1;
        }
    }

    async fn post(&self, body: Vec<u8>) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.config.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status))
        }
    }
}

#[async_trait]
impl Notify for WebhookNotifier {
    async fn notify(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        self.deliver(event).await?;
        Ok(())
    }
}
