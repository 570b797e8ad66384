//! External incident sources.

use crate::models::{Incident, IncidentSource};
use crate::{Error, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Page size requested from each source.
pub const FETCH_LIMIT: usize = 10;

/// A source of currently open incidents.
#[async_trait]
pub trait IncidentFeed: Send + Sync {
    /// Which system this feed reads.
    fn source(&self) -> IncidentSource;

    /// Fetches the currently open incidents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] on transport, status or decoding
    /// failures.
    async fn fetch(&self) -> Result<Vec<Incident>>;
}

/// Triggered incidents from the `PagerDuty` REST API.
pub struct PagerDutyFeed {
    api_url: String,
    api_key: SecretString,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct PagerDutyIncidents {
    #[serde(default)]
    incidents: Vec<PagerDutyIncident>,
}

#[derive(Debug, Deserialize)]
struct PagerDutyIncident {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    status: String,
}

impl PagerDutyFeed {
    /// Creates a feed against `api_url` (normally `https://api.pagerduty.com`).
    #[must_use]
    pub fn new(api_url: impl Into<String>, api_key: SecretString, client: reqwest::Client) -> Self {
        Self {
            api_url: api_url.into(),
            api_key,
            client,
        }
    }
}

#[async_trait]
impl IncidentFeed for PagerDutyFeed {
    fn source(&self) -> IncidentSource {
        IncidentSource::PagerDuty
    }

    async fn fetch(&self) -> Result<Vec<Incident>> {
        let url = format!("{}/incidents", self.api_url.trim_end_matches('/'));
        let limit = FETCH_LIMIT.to_string();
        let response = self
            .client
            .get(url)
            .header(
                "Authorization",
                format!("Token token={}", self.api_key.expose_secret()),
            )
            .header("Accept", "application/vnd.pagerduty+json;version=2")
            .query(&[("statuses[]", "triggered"), ("limit", limit.as_str())])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::operation("fetch_pagerduty_incidents", e))?;

        let body: PagerDutyIncidents = response
            .json()
            .await
            .map_err(|e| Error::operation("decode_pagerduty_incidents", e))?;

        Ok(body
            .incidents
            .into_iter()
            .map(|i| Incident {
                source: IncidentSource::PagerDuty,
                external_id: i.id,
                title: i.title,
                status: i.status,
            })
            .collect())
    }
}

/// New incidents (`state=1`) from the `ServiceNow` table API.
pub struct ServiceNowFeed {
    instance: String,
    user: String,
    password: SecretString,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ServiceNowIncidents {
    #[serde(default)]
    result: Vec<ServiceNowIncident>,
}

#[derive(Debug, Deserialize)]
struct ServiceNowIncident {
    #[serde(default)]
    sys_id: String,
    #[serde(default)]
    number: Option<String>,
    #[serde(default)]
    short_description: String,
    #[serde(default)]
    state: String,
}

impl ServiceNowFeed {
    /// Creates a feed against a `ServiceNow` instance base URL.
    #[must_use]
    pub fn new(
        instance: impl Into<String>,
        user: impl Into<String>,
        password: SecretString,
        client: reqwest::Client,
    ) -> Self {
        Self {
            instance: instance.into(),
            user: user.into(),
            password,
            client,
        }
    }
}

#[async_trait]
impl IncidentFeed for ServiceNowFeed {
    fn source(&self) -> IncidentSource {
        IncidentSource::ServiceNow
    }

    async fn fetch(&self) -> Result<Vec<Incident>> {
        let url = format!(
            "{}/api/now/table/incident",
            self.instance.trim_end_matches('/')
        );
        let limit = FETCH_LIMIT.to_string();
        let response = self
            .client
            .get(url)
            .basic_auth(&self.user, Some(self.password.expose_secret()))
            .query(&[("sysparm_query", "state=1"), ("sysparm_limit", limit.as_str())])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::operation("fetch_servicenow_incidents", e))?;

        let body: ServiceNowIncidents = response
            .json()
            .await
            .map_err(|e| Error::operation("decode_servicenow_incidents", e))?;

        Ok(body
            .result
            .into_iter()
            .map(|i| Incident {
                source: IncidentSource::ServiceNow,
                external_id: i.number.unwrap_or(i.sys_id),
                title: i.short_description,
                status: i.state,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::http_client;
    use crate::alerts::testing::CaptureServer;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pagerduty_fetch() {
        let server = CaptureServer::start_with(
            vec![200],
            json!({"incidents": [{"id": "P1", "title": "db down", "status": "triggered", "urgency": "high"}]}),
        )
        .await;
        let feed = PagerDutyFeed::new(
            server.url(""),
            SecretString::from("pd-key"),
            http_client(Duration::from_secs(2)),
        );

        let incidents = feed.fetch().await.expect("fetch");

        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].external_id, "P1");
        assert_eq!(incidents[0].source, IncidentSource::PagerDuty);
        let request = &server.requests()[0];
        assert!(request.path.starts_with("/incidents?"));
        assert!(request.path.contains("limit=10"));
        assert_eq!(request.header("authorization"), Some("Token token=pd-key"));
    }

    #[tokio::test]
    async fn test_servicenow_prefers_number() {
        let server = CaptureServer::start_with(
            vec![200],
            json!({"result": [
                {"sys_id": "abc", "number": "INC0010001", "short_description": "fraud spike", "state": "1"},
                {"sys_id": "def", "short_description": "queue lag", "state": "1"}
            ]}),
        )
        .await;
        let feed = ServiceNowFeed::new(
            server.url(""),
            "svc",
            SecretString::from("pw"),
            http_client(Duration::from_secs(2)),
        );

        let incidents = feed.fetch().await.expect("fetch");

        assert_eq!(incidents[0].external_id, "INC0010001");
        assert_eq!(incidents[1].external_id, "def");
        assert!(server.requests()[0].path.contains("sysparm_query=state%3D1"));
    }

    #[tokio::test]
    async fn test_error_status_is_failure() {
        let server = CaptureServer::start(503).await;
        let feed = PagerDutyFeed::new(
            server.url(""),
            SecretString::from("k"),
            http_client(Duration::from_secs(2)),
        );
        assert!(matches!(
            feed.fetch().await,
            Err(Error::OperationFailed { .. })
        ));
    }
}
