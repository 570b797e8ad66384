//! Vendor channels: Slack, `PagerDuty`, `ServiceNow`, Grafana.

use super::config::{GrafanaConfig, PagerDutyConfig, ServiceNowConfig, SlackConfig};
use super::{AlertChannel, check_status, transport_error};
use crate::Result;
use crate::models::{Alert, AlertKind, Severity};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::json;

/// Grafana panel paths linked from Slack messages, per alert kind.
const DASHBOARD_PATHS: &[(AlertKind, &str)] = &[
    (
        AlertKind::Bias,
        "/d/GpK4WWlmz/fraud-detection-metrics?orgId=1&viewPanel=9",
    ),
    (
        AlertKind::Retrain,
        "/d/GpK4WWlmz/retrain-dashboard?orgId=1&viewPanel=5",
    ),
    (
        AlertKind::FraudSpike,
        "/d/GpK4WWlmz/fraud-spike-dashboard?orgId=1&viewPanel=12",
    ),
];

/// Slack incoming-webhook channel.
pub struct SlackChannel {
    config: SlackConfig,
    client: reqwest::Client,
}

impl SlackChannel {
    /// Creates the channel.
    #[must_use]
    pub const fn new(config: SlackConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Message text, with a dashboard link when one is configured for the
    /// alert's kind.
    #[must_use]
    pub fn format_text(&self, alert: &Alert) -> String {
        let mut text = format!("[{}] {}", alert.severity, alert.message);
        let link = self.config.dashboard_url.as_deref().and_then(|base| {
            DASHBOARD_PATHS
                .iter()
                .find(|(kind, _)| *kind == alert.kind)
                .map(|(_, path)| format!("{}{path}", base.trim_end_matches('/')))
        });
        if let Some(link) = link {
            text.push_str(&format!("\nView dashboard: <{link}|Grafana Panel>"));
        }
        text
    }
}

#[async_trait]
impl AlertChannel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    fn min_severity(&self) -> Severity {
        self.config.min_severity
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(self.config.webhook_url.expose_secret())
            .json(&json!({ "text": self.format_text(alert) }))
            .send()
            .await
            .map_err(|e| transport_error(self.name(), &e))?;
        check_status(self.name(), &response)
    }
}

/// `PagerDuty` Events v2 channel.
pub struct PagerDutyChannel {
    config: PagerDutyConfig,
    client: reqwest::Client,
}

impl PagerDutyChannel {
    /// Creates the channel.
    #[must_use]
    pub const fn new(config: PagerDutyConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Events v2 `trigger` body.
    #[must_use]
    pub fn event_body(&self, alert: &Alert) -> serde_json::Value {
        json!({
            "routing_key": self.config.routing_key.expose_secret(),
            "event_action": "trigger",
            "dedup_key": alert.id,
            "payload": {
                "summary": alert.message,
                "severity": alert.severity.as_str(),
                "source": "riskwatch",
                "component": alert.kind.as_str(),
                "timestamp": alert.created_at.to_rfc3339(),
                "custom_details": alert.details,
            }
        })
    }
}

#[async_trait]
impl AlertChannel for PagerDutyChannel {
    fn name(&self) -> &str {
        "pagerduty"
    }

    fn min_severity(&self) -> Severity {
        self.config.min_severity
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.config.events_url)
            .json(&self.event_body(alert))
            .send()
            .await
            .map_err(|e| transport_error(self.name(), &e))?;
        check_status(self.name(), &response)
    }
}

/// `ServiceNow` incident-table channel.
pub struct ServiceNowChannel {
    config: ServiceNowConfig,
    client: reqwest::Client,
}

impl ServiceNowChannel {
    /// Creates the channel.
    #[must_use]
    pub const fn new(config: ServiceNowConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Incident record body.
    #[must_use]
    pub fn incident_body(alert: &Alert) -> serde_json::Value {
        let urgency = match alert.severity {
            Severity::Critical => "1",
            Severity::Error => "2",
            Severity::Warning | Severity::Info => "3",
        };
        let short_description: String = alert.message.chars().take(160).collect();
        json!({
            "short_description": short_description,
            "description": format!(
                "{}\n\nkind: {}\nseverity: {}\ndetails: {}",
                alert.message, alert.kind, alert.severity, alert.details
            ),
            "urgency": urgency,
            "category": "riskwatch",
            "correlation_id": alert.id,
        })
    }
}

#[async_trait]
impl AlertChannel for ServiceNowChannel {
    fn name(&self) -> &str {
        "servicenow"
    }

    fn min_severity(&self) -> Severity {
        self.config.min_severity
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let url = format!(
            "{}/api/now/table/incident",
            self.config.instance.trim_end_matches('/')
        );
        let response = self
            .client
            .post(url)
            .basic_auth(&self.config.user, Some(self.config.password.expose_secret()))
            .json(&Self::incident_body(alert))
            .send()
            .await
            .map_err(|e| transport_error(self.name(), &e))?;
        check_status(self.name(), &response)
    }
}

/// Grafana annotation channel.
pub struct GrafanaChannel {
    config: GrafanaConfig,
    client: reqwest::Client,
}

impl GrafanaChannel {
    /// Creates the channel.
    #[must_use]
    pub const fn new(config: GrafanaConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Annotation body.
    #[must_use]
    pub fn annotation_body(&self, alert: &Alert) -> serde_json::Value {
        let mut body = json!({
            "time": alert.created_at.timestamp_millis(),
            "text": alert.message,
            "tags": ["riskwatch", alert.kind.as_str()],
        });
        if let (Some(uid), Some(map)) = (&self.config.dashboard_uid, body.as_object_mut()) {
            map.insert("dashboardUID".to_string(), json!(uid));
        }
        body
    }
}

#[async_trait]
impl AlertChannel for GrafanaChannel {
    fn name(&self) -> &str {
        "grafana"
    }

    fn min_severity(&self) -> Severity {
        self.config.min_severity
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let url = format!("{}/api/annotations", self.config.url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&self.annotation_body(alert))
            .send()
            .await
            .map_err(|e| transport_error(self.name(), &e))?;
        check_status(self.name(), &response)
    }
}
