//! Webhook delivery of chaincode events

use crate::{common::types::ChaincodeEvent, orchestrator::EventSink};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Connection failed: {0}")]
    Connection(String),
}

/// Response of a delivered webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub status: u16,
    pub body: String,
}

/// Posts observed events to the callback URL given with the invocation
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(2)))
            .build()
            .map_err(WebhookError::Http)?;
        Ok(Self { client })
    }

    /// POST one event as JSON
    pub async fn post_event(&self, url: &str, event: &ChaincodeEvent) -> Result<Delivery, WebhookError> {
        let response = self
            .client
            .post(url)
            .json(event)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    WebhookError::Connection(format!("Cannot connect to {}", url))
                } else {
                    WebhookError::Http(e)
                }
            })?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(Delivery { status, body })
    }
}

#[async_trait]
impl EventSink for WebhookNotifier {
    async fn deliver(&self, event_filter: &str, callback_url: &str, event: Option<ChaincodeEvent>) {
        let Some(event) = event else {
            info!(filter = event_filter, "No chaincode event observed before timeout");
            return;
        };

        info!(filter = event_filter, tx_id = %event.tx_id, event = %event.event_name, "Chaincode event received");
        if callback_url.is_empty() {
            return;
        }

        match self.post_event(callback_url, &event).await {
            Ok(delivery) => info!(
                url = callback_url,
                status = delivery.status,
                body = %delivery.body,
                "Webhook delivered"
            ),
            Err(e) => warn!(url = callback_url, tx_id = %event.tx_id, error = %e, "Webhook delivery failed"),
        }
    }
}
