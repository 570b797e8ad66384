//! Alert channel configuration.
//!
//! Each channel section is optional; a channel is only constructed when its
//! section is present. Secrets deserialize into [`SecretString`] and are
//! redacted when the configuration is serialized back out.
//!
//! # Example
//!
//! ```toml
//! [alerts]
//! channel_timeout_ms = 5000
//!
//! [alerts.slack]
//! webhook_url = "https://hooks.slack.com/services/T000/B000/XXXX"
//! dashboard_url = "http://grafana:3000"
//!
//! [alerts.pagerduty]
//! routing_key = "R0UTINGKEY"
//! min_severity = "warning"
//!
//! [[alerts.webhooks]]
//! name = "audit-sink"
//! url = "https://example.com/hooks/riskwatch"
//! auth = { type = "hmac", secret = "shared-secret" }
//! ```

use crate::config::{optional_secret_serde, secret_serde};
use crate::models::Severity;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Default per-channel delivery bound.
pub const DEFAULT_CHANNEL_TIMEOUT_MS: u64 = 5000;

/// Top-level `[alerts]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Per-channel delivery bound in milliseconds.
    #[serde(default = "default_channel_timeout_ms")]
    pub channel_timeout_ms: u64,
    /// Slack incoming webhook.
    #[serde(default)]
    pub slack: Option<SlackConfig>,
    /// `PagerDuty` Events v2.
    #[serde(default)]
    pub pagerduty: Option<PagerDutyConfig>,
    /// `ServiceNow` incident table.
    #[serde(default)]
    pub servicenow: Option<ServiceNowConfig>,
    /// Grafana annotations.
    #[serde(default)]
    pub grafana: Option<GrafanaConfig>,
    /// Generic JSON webhooks.
    #[serde(default)]
    pub webhooks: Vec<WebhookEndpoint>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            channel_timeout_ms: DEFAULT_CHANNEL_TIMEOUT_MS,
            slack: None,
            pagerduty: None,
            servicenow: None,
            grafana: None,
            webhooks: Vec::new(),
        }
    }
}

const fn default_channel_timeout_ms() -> u64 {
    DEFAULT_CHANNEL_TIMEOUT_MS
}

const fn severity_info() -> Severity {
    Severity::Info
}

const fn severity_warning() -> Severity {
    Severity::Warning
}

const fn default_true() -> bool {
    true
}

/// Slack incoming-webhook channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Incoming webhook URL. The URL embeds the credential.
    #[serde(with = "secret_serde")]
    pub webhook_url: SecretString,
    /// Grafana base URL used for per-kind dashboard links.
    #[serde(default)]
    pub dashboard_url: Option<String>,
    /// Lowest severity sent to this channel.
    #[serde(default = "severity_info")]
    pub min_severity: Severity,
}

/// Default `PagerDuty` Events v2 endpoint.
pub const PAGERDUTY_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

/// Default `PagerDuty` REST API base.
pub const PAGERDUTY_API_URL: &str = "https://api.pagerduty.com";

fn default_pagerduty_events_url() -> String {
    PAGERDUTY_EVENTS_URL.to_string()
}

fn default_pagerduty_api_url() -> String {
    PAGERDUTY_API_URL.to_string()
}

/// `PagerDuty` channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagerDutyConfig {
    /// Events v2 integration routing key.
    #[serde(with = "secret_serde")]
    pub routing_key: SecretString,
    /// Events v2 endpoint.
    #[serde(default = "default_pagerduty_events_url")]
    pub events_url: String,
    /// REST API base, used by the incident poller.
    #[serde(default = "default_pagerduty_api_url")]
    pub api_url: String,
    /// REST API token, used by the incident poller.
    #[serde(default, with = "optional_secret_serde")]
    pub api_key: Option<SecretString>,
    /// Lowest severity sent to this channel.
    #[serde(default = "severity_warning")]
    pub min_severity: Severity,
}

/// `ServiceNow` incident-table channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceNowConfig {
    /// Instance base URL, e.g. `https://acme.service-now.com`.
    pub instance: String,
    /// Basic-auth user.
    pub user: String,
    /// Basic-auth password.
    #[serde(with = "secret_serde")]
    pub password: SecretString,
    /// Lowest severity sent to this channel.
    #[serde(default = "severity_warning")]
    pub min_severity: Severity,
}

/// Grafana annotation channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrafanaConfig {
    /// Grafana base URL.
    pub url: String,
    /// Service account token.
    #[serde(with = "secret_serde")]
    pub api_key: SecretString,
    /// Dashboard to annotate; organization-wide annotation when unset.
    #[serde(default)]
    pub dashboard_uid: Option<String>,
    /// Lowest severity sent to this channel.
    #[serde(default = "severity_info")]
    pub min_severity: Severity,
}

/// A generic webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    /// Name used in logs and metrics.
    pub name: String,
    /// Target URL.
    pub url: String,
    /// Authentication.
    #[serde(default)]
    pub auth: WebhookAuth,
    /// Retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Lowest severity sent to this endpoint.
    #[serde(default = "severity_info")]
    pub min_severity: Severity,
    /// Disabled endpoints are skipped at construction.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Authentication for a generic webhook.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookAuth {
    /// `Authorization: Bearer <token>`.
    Bearer {
        /// The bearer token.
        #[serde(with = "secret_serde")]
        token: SecretString,
    },
    /// `X-Riskwatch-Signature: sha256=<hex>` over the body.
    Hmac {
        /// Shared signing secret.
        #[serde(with = "secret_serde")]
        secret: SecretString,
    },
    /// Both headers.
    Both {
        /// The bearer token.
        #[serde(with = "secret_serde")]
        token: SecretString,
        /// Shared signing secret.
        #[serde(with = "secret_serde")]
        secret: SecretString,
    },
    /// No authentication.
    #[default]
    None,
}

impl WebhookAuth {
    /// Returns the bearer token if configured.
    #[must_use]
    pub const fn bearer_token(&self) -> Option<&SecretString> {
        match self {
            Self::Bearer { token } | Self::Both { token, .. } => Some(token),
            _ => None,
        }
    }

    /// Returns the HMAC secret if configured.
    #[must_use]
    pub const fn hmac_secret(&self) -> Option<&SecretString> {
        match self {
            Self::Hmac { secret } | Self::Both { secret, .. } => Some(secret),
            _ => None,
        }
    }
}

/// Retry policy for a generic webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_base_delay_ms() -> u64 {
    200
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry `attempt` (1-based): `base_delay_ms * 2^(attempt - 1)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        self.base_delay_ms
            .saturating_mul(1 << (attempt - 1).min(10))
    }
}
