//! Generic JSON webhook channel.
//!
//! # Retry Strategy
//!
//! - Network errors and 5xx responses: retry with exponential backoff
//!   (`base_delay_ms * 2^(attempt - 1)`)
//! - 4xx responses: no retry
//!
//! The dispatcher's per-channel timeout bounds the whole retry loop.
//!
//! # Signing
//!
//! With HMAC auth configured, the raw request body is signed and sent as
//! `X-Riskwatch-Signature: sha256=<hex>`.

use super::config::WebhookEndpoint;
use super::{AlertChannel, transport_error};
use crate::models::{Alert, Severity};
use crate::{Error, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;

/// Body posted to generic webhooks.
#[derive(Debug, Serialize)]
struct AlertPayload<'a> {
    event_id: &'a str,
    event_type: String,
    timestamp: String,
    alert: &'a Alert,
}

/// Generic webhook channel.
pub struct WebhookChannel {
    endpoint: WebhookEndpoint,
    client: reqwest::Client,
}

impl WebhookChannel {
    /// Creates the channel.
    #[must_use]
    pub const fn new(endpoint: WebhookEndpoint, client: reqwest::Client) -> Self {
        Self { endpoint, client }
    }

    async fn attempt(&self, body: &str, alert: &Alert) -> std::result::Result<(), Attempt> {
        let mut request = self
            .client
            .post(&self.endpoint.url)
            .header("Content-Type", "application/json")
            .header("X-Riskwatch-Event", format!("alert.{}", alert.kind))
            .header("X-Riskwatch-Delivery-Id", &alert.id);

        if let Some(token) = self.endpoint.auth.bearer_token() {
            request = request.bearer_auth(token.expose_secret());
        }
        if let Some(secret) = self.endpoint.auth.hmac_secret() {
            let signature = compute_hmac_signature(secret.expose_secret(), body)
                .map_err(|e| Attempt::Fatal(e.to_string()))?;
            request = request.header("X-Riskwatch-Signature", signature);
        }

        let response = request
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| Attempt::Retryable(transport_error(&self.endpoint.name, &e).to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            Err(Attempt::Fatal(format!("HTTP {}", status.as_u16())))
        } else {
            Err(Attempt::Retryable(format!("HTTP {}", status.as_u16())))
        }
    }
}

enum Attempt {
    Retryable(String),
    Fatal(String),
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.endpoint.name
    }

    fn min_severity(&self) -> Severity {
        self.endpoint.min_severity
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let payload = AlertPayload {
            event_id: &alert.id,
            event_type: format!("alert.{}", alert.kind),
            timestamp: alert.created_at.to_rfc3339(),
            alert,
        };
        let body = serde_json::to_string(&payload).map_err(|e| Error::ChannelDelivery {
            channel: self.endpoint.name.clone(),
            cause: format!("serialize payload: {e}"),
        })?;

        let max_attempts = self.endpoint.retry.max_retries + 1;
        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            match self.attempt(&body, alert).await {
                Ok(()) => return Ok(()),
                Err(Attempt::Fatal(cause)) => {
                    return Err(Error::ChannelDelivery {
                        channel: self.endpoint.name.clone(),
                        cause,
                    });
                },
                Err(Attempt::Retryable(cause)) => {
                    tracing::debug!(
                        channel = %self.endpoint.name,
                        attempt,
                        max_attempts,
                        cause = %cause,
                        "Webhook attempt failed"
                    );
                    last_error = cause;
                },
            }
            if attempt < max_attempts {
                let delay = self.endpoint.retry.delay_for_attempt(attempt);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        Err(Error::ChannelDelivery {
            channel: self.endpoint.name.clone(),
            cause: format!("{last_error} after {max_attempts} attempts"),
        })
    }
}

/// Computes `sha256=<hex>` HMAC-SHA256 of `payload` under `secret`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the key is rejected.
pub fn compute_hmac_signature(secret: &str, payload: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::InvalidInput(format!("invalid HMAC key: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}
