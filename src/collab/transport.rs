//! Messaging-delivery collaborator
//!
//! The controller appends locally first and delivers after; a failed
//! delivery marks the event `Failed` in the thread rather than retracting
//! it, and an explicit retry re-runs this call.

use crate::thread::ThreadEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Acknowledgement from the remote side.
#[derive(Debug, Clone)]
pub struct DeliveryAck {
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("transport unreachable: {0}")]
    Unreachable(String),
    #[error("remote rejected event: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one already-appended event to the counter-party.
    async fn deliver(
        &self,
        conversation_id: Uuid,
        event: &ThreadEvent,
    ) -> Result<DeliveryAck, DeliveryError>;
}

/// Single-process deployments: every delivery succeeds immediately.
#[derive(Debug, Default)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn deliver(
        &self,
        _conversation_id: Uuid,
        _event: &ThreadEvent,
    ) -> Result<DeliveryAck, DeliveryError> {
        Ok(DeliveryAck {
            delivered_at: Utc::now(),
        })
    }
}

/// Delivery via JSON POST to a configured endpoint.
pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
}

impl WebhookTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    async fn deliver(
        &self,
        conversation_id: Uuid,
        event: &ThreadEvent,
    ) -> Result<DeliveryAck, DeliveryError> {
        let body = serde_json::json!({
            "conversation_id": conversation_id,
            "event": event,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(DeliveryAck {
                delivered_at: Utc::now(),
            })
        } else {
            Err(DeliveryError::Rejected(format!(
                "endpoint returned {status}"
            )))
        }
    }
}
