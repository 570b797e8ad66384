//! Alert fan-out to notification channels.
//!
//! The [`AlertDispatcher`] delivers one [`Alert`] to every configured
//! [`AlertChannel`] concurrently, each bounded by a per-channel timeout. A
//! failing or stuck channel is recorded in the [`DispatchReport`] and logged;
//! it never fails the caller and never stops delivery to the other channels.
//!
//! # Architecture
//!
//! ```text
//! Retrain / Audit / Predict --> AlertDispatcher --+--> SlackChannel
//!                                                 +--> PagerDutyChannel
//!                                                 +--> ServiceNowChannel
//!                                                 +--> GrafanaChannel
//!                                                 +--> WebhookChannel (retries, HMAC)
//! ```

mod channels;
pub mod config;
mod dispatcher;
mod webhook;

#[cfg(test)]
pub(crate) mod testing;

pub use channels::{GrafanaChannel, PagerDutyChannel, ServiceNowChannel, SlackChannel};
pub use config::{AlertsConfig, RetryConfig, WebhookAuth, WebhookEndpoint};
pub use dispatcher::{AlertDispatcher, ChannelOutcome, DeliveryStatus, DispatchReport};
pub use webhook::{WebhookChannel, compute_hmac_signature};

use crate::Result;
use crate::models::{Alert, Severity};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A notification channel.
///
/// `send` makes at most one logical delivery. Implementations may retry
/// internally; the dispatcher's timeout bounds the whole call either way.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Channel name used in logs, metrics and reports.
    fn name(&self) -> &str;

    /// Alerts below this severity are not sent to this channel.
    fn min_severity(&self) -> Severity {
        Severity::Info
    }

    /// Delivers one alert.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ChannelDelivery`] if delivery fails.
    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// Builds the shared HTTP client used by every network channel.
#[must_use]
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(format!("riskwatch/{}", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .pool_max_idle_per_host(4)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Constructs every channel with a section in `config`.
#[must_use]
pub fn build_channels(config: &AlertsConfig, client: &reqwest::Client) -> Vec<Arc<dyn AlertChannel>> {
    let mut channels: Vec<Arc<dyn AlertChannel>> = Vec::new();
    if let Some(slack) = &config.slack {
        channels.push(Arc::new(SlackChannel::new(slack.clone(), client.clone())));
    }
    if let Some(pagerduty) = &config.pagerduty {
        channels.push(Arc::new(PagerDutyChannel::new(
            pagerduty.clone(),
            client.clone(),
        )));
    }
    if let Some(servicenow) = &config.servicenow {
        channels.push(Arc::new(ServiceNowChannel::new(
            servicenow.clone(),
            client.clone(),
        )));
    }
    if let Some(grafana) = &config.grafana {
        channels.push(Arc::new(GrafanaChannel::new(grafana.clone(), client.clone())));
    }
    for endpoint in config.webhooks.iter().filter(|w| w.enabled) {
        channels.push(Arc::new(WebhookChannel::new(
            endpoint.clone(),
            client.clone(),
        )));
    }

    tracing::info!(
        channels = ?channels.iter().map(|c| c.name().to_string()).collect::<Vec<_>>(),
        "Configured alert channels"
    );
    channels
}

/// Builds a dispatcher from configuration.
#[must_use]
pub fn dispatcher_from_config(config: &AlertsConfig) -> AlertDispatcher {
    let timeout = Duration::from_millis(config.channel_timeout_ms);
    let client = http_client(timeout);
    AlertDispatcher::new(build_channels(config, &client), timeout)
}

/// Maps a non-success HTTP status to a channel delivery error.
pub(crate) fn check_status(channel: &str, response: &reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(crate::Error::ChannelDelivery {
            channel: channel.to_string(),
            cause: format!("HTTP {}", status.as_u16()),
        })
    }
}

/// Maps a transport error to a channel delivery error.
pub(crate) fn transport_error(channel: &str, err: &reqwest::Error) -> crate::Error {
    crate::Error::ChannelDelivery {
        channel: channel.to_string(),
        cause: format!("request failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::config::SlackConfig;
    use secrecy::SecretString;

    #[test]
    fn test_build_channels_skips_missing_sections() {
        let client = http_client(Duration::from_millis(100));
        assert!(build_channels(&AlertsConfig::default(), &client).is_empty());

        let config = AlertsConfig {
            slack: Some(SlackConfig {
                webhook_url: SecretString::from("http://127.0.0.1:9/slack"),
                dashboard_url: None,
                min_severity: Severity::Info,
            }),
            webhooks: vec![WebhookEndpoint {
                name: "off".to_string(),
                url: "http://127.0.0.1:9/hook".to_string(),
                auth: WebhookAuth::None,
                retry: RetryConfig::default(),
                min_severity: Severity::Info,
                enabled: false,
            }],
            ..AlertsConfig::default()
        };
        let channels = build_channels(&config, &client);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name(), "slack");
    }
}
