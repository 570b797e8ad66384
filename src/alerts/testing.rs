//! Channel fakes for unit tests.

#![allow(clippy::expect_used, clippy::panic)]

use super::AlertChannel;
use crate::models::{Alert, Severity};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Records every alert it receives.
pub struct RecordingChannel {
    name: String,
    min_severity: Severity,
    received: Mutex<Vec<Alert>>,
}

impl RecordingChannel {
    pub fn new(name: &str) -> Self {
        Self::with_min_severity(name, Severity::Info)
    }

    pub fn with_min_severity(name: &str, min_severity: Severity) -> Self {
        Self {
            name: name.to_string(),
            min_severity,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn received(&self) -> Vec<Alert> {
        self.received.lock().expect("lock").clone()
    }

    /// Polls until at least `count` alerts arrived or `timeout` elapsed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Alert> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let received = self.received();
            if received.len() >= count || tokio::time::Instant::now() >= deadline {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl AlertChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_severity(&self) -> Severity {
        self.min_severity
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        self.received.lock().expect("lock").push(alert.clone());
        Ok(())
    }
}

/// Always fails.
pub struct FailingChannel {
    name: String,
}

impl FailingChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl AlertChannel for FailingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, _alert: &Alert) -> Result<()> {
        Err(Error::ChannelDelivery {
            channel: self.name.clone(),
            cause: "HTTP 503".to_string(),
        })
    }
}

/// Sleeps before succeeding.
pub struct SlowChannel {
    name: String,
    delay: Duration,
}

impl SlowChannel {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl AlertChannel for SlowChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, _alert: &Alert) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// Panics inside `send`.
pub struct PanickingChannel {
    name: String,
}

impl PanickingChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl AlertChannel for PanickingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    #[allow(clippy::panic)]
    async fn send(&self, _alert: &Alert) -> Result<()> {
        panic!("channel {} exploded", self.name);
    }
}

/// One request seen by a [`CaptureServer`].
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: std::collections::HashMap<String, String>,
    pub raw_body: Vec<u8>,
    pub body: serde_json::Value,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Local HTTP endpoint that records requests and answers with canned
/// statuses. The last status repeats once the sequence is exhausted.
pub struct CaptureServer {
    addr: std::net::SocketAddr,
    requests: std::sync::Arc<Mutex<Vec<CapturedRequest>>>,
    task: tokio::task::JoinHandle<()>,
}

impl CaptureServer {
    pub async fn start(status: u16) -> Self {
        Self::start_with(vec![status], serde_json::json!({})).await
    }

    pub async fn start_with(statuses: Vec<u16>, response: serde_json::Value) -> Self {
        use axum::http::{HeaderMap, Method, StatusCode, Uri};

        let requests = std::sync::Arc::new(Mutex::new(Vec::<CapturedRequest>::new()));
        let recorded = std::sync::Arc::clone(&requests);
        let app = axum::Router::new().fallback(
            move |method: Method, uri: Uri, headers: HeaderMap, body: axum::body::Bytes| {
                let recorded = std::sync::Arc::clone(&recorded);
                let statuses = statuses.clone();
                let response = response.clone();
                async move {
                    let mut seen = recorded.lock().expect("lock");
                    let index = seen.len().min(statuses.len().saturating_sub(1));
                    seen.push(CapturedRequest {
                        method: method.to_string(),
                        path: uri
                            .path_and_query()
                            .map_or_else(|| uri.path().to_string(), ToString::to_string),
                        headers: headers
                            .iter()
                            .map(|(k, v)| {
                                (k.as_str().to_string(), v.to_str().unwrap_or("").to_string())
                            })
                            .collect(),
                        raw_body: body.to_vec(),
                        body: serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null),
                    });
                    drop(seen);
                    let status = StatusCode::from_u16(statuses.get(index).copied().unwrap_or(200))
                        .expect("status");
                    (status, axum::Json(response))
                }
            },
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            addr,
            requests,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

impl Drop for CaptureServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
