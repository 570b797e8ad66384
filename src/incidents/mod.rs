//! Incident relay: external feeds, the poller, and the broadcast hub.
//!
//! ```text
//! PagerDutyFeed --+
//!                 +--> IncidentPoller --(on change)--> IncidentHub --> /ws/incidents
//! ServiceNowFeed -+                                        ^
//!                                   POST /broadcast_incident
//! ```

mod feeds;
mod hub;
mod poller;

pub use feeds::{FETCH_LIMIT, IncidentFeed, PagerDutyFeed, ServiceNowFeed};
pub use hub::{DEFAULT_SUBSCRIBER_BUFFER, IncidentHub, SubscriberHandle};
pub use poller::{IncidentPoller, incidents_message};

use crate::alerts::AlertsConfig;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// `[incidents]` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentsConfig {
    /// Seconds between polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Per-subscriber queue depth.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// `PagerDuty` REST token. Falls back to `alerts.pagerduty.api_key`.
    #[serde(default, with = "crate::config::optional_secret_serde")]
    pub pagerduty_api_key: Option<SecretString>,
    /// `PagerDuty` REST API base. Falls back to `alerts.pagerduty.api_url`.
    #[serde(default)]
    pub pagerduty_api_url: Option<String>,
    /// `ServiceNow` instance. Falls back to `alerts.servicenow`.
    #[serde(default)]
    pub servicenow_instance: Option<String>,
    /// `ServiceNow` user.
    #[serde(default)]
    pub servicenow_user: Option<String>,
    /// `ServiceNow` password.
    #[serde(default, with = "crate::config::optional_secret_serde")]
    pub servicenow_password: Option<SecretString>,
}

impl Default for IncidentsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            subscriber_buffer: default_subscriber_buffer(),
            pagerduty_api_key: None,
            pagerduty_api_url: None,
            servicenow_instance: None,
            servicenow_user: None,
            servicenow_password: None,
        }
    }
}

const fn default_poll_interval_secs() -> u64 {
    5
}

const fn default_subscriber_buffer() -> usize {
    DEFAULT_SUBSCRIBER_BUFFER
}

/// Builds the feeds that have credentials, reusing alerting credentials when
/// the incident section leaves them out.
#[must_use]
pub fn build_feeds(
    config: &IncidentsConfig,
    alerts: &AlertsConfig,
    client: &reqwest::Client,
) -> Vec<Arc<dyn IncidentFeed>> {
    let mut feeds: Vec<Arc<dyn IncidentFeed>> = Vec::new();

    let pagerduty = alerts.pagerduty.as_ref();
    let pd_key = config
        .pagerduty_api_key
        .clone()
        .or_else(|| pagerduty.and_then(|p| p.api_key.clone()));
    if let Some(key) = pd_key {
        let api_url = config
            .pagerduty_api_url
            .clone()
            .or_else(|| pagerduty.map(|p| p.api_url.clone()))
            .unwrap_or_else(|| crate::alerts::config::PAGERDUTY_API_URL.to_string());
        feeds.push(Arc::new(PagerDutyFeed::new(api_url, key, client.clone())));
    }

    let servicenow = alerts.servicenow.as_ref();
    let instance = config
        .servicenow_instance
        .clone()
        .or_else(|| servicenow.map(|s| s.instance.clone()));
    let user = config
        .servicenow_user
        .clone()
        .or_else(|| servicenow.map(|s| s.user.clone()));
    let password = config
        .servicenow_password
        .clone()
        .or_else(|| servicenow.map(|s| s.password.clone()));
    if let (Some(instance), Some(user), Some(password)) = (instance, user, password) {
        feeds.push(Arc::new(ServiceNowFeed::new(
            instance,
            user,
            password,
            client.clone(),
        )));
    }

    feeds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::config::ServiceNowConfig;
    use crate::alerts::http_client;
    use crate::models::{IncidentSource, Severity};
    use std::time::Duration;

    #[test]
    fn test_feeds_reuse_alert_credentials() {
        let client = http_client(Duration::from_secs(1));
        assert!(build_feeds(&IncidentsConfig::default(), &AlertsConfig::default(), &client).is_empty());

        let alerts = AlertsConfig {
            servicenow: Some(ServiceNowConfig {
                instance: "https://acme.service-now.com".to_string(),
                user: "svc".to_string(),
                password: SecretString::from("pw"),
                min_severity: Severity::Warning,
            }),
            ..AlertsConfig::default()
        };
        let config = IncidentsConfig {
            pagerduty_api_key: Some(SecretString::from("pd")),
            ..IncidentsConfig::default()
        };
        let feeds = build_feeds(&config, &alerts, &client);
        let sources: Vec<IncidentSource> = feeds.iter().map(|f| f.source()).collect();
        assert_eq!(sources, vec![IncidentSource::PagerDuty, IncidentSource::ServiceNow]);
    }
}
