//! HTTP surface integration tests.
//!
//! Drives the `axum` router with `tower::ServiceExt::oneshot`, no sockets:
//! - Token checks on every route but `/health` and `/metrics`
//! - Response shapes of the scoring, feedback and lifecycle routes
//! - Error payloads carry the failure kind

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use riskwatch::alerts::AlertDispatcher;
use riskwatch::http::{AppState, router};
use riskwatch::incidents::IncidentHub;
use riskwatch::storage::{FeedbackStore, MemoryRecordStore, MemoryVersionStore, VersionStore};
use riskwatch::training::{ConstantScorer, Dataset, LogisticTrainer};
use riskwatch::{
    ActiveVersionCache, FairnessAuditor, PredictionService, RetrainOrchestrator,
};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const TOKEN: &str = "test-token-123";

// ============================================================================
// Test Helpers
// ============================================================================

struct Fixture {
    app: Router,
    store: Arc<MemoryVersionStore>,
    records: Arc<MemoryRecordStore>,
    orchestrator: Arc<RetrainOrchestrator>,
    hub: Arc<IncidentHub>,
}

/// Builds the router over in-memory stores. With `activate`, versions 1
/// (p=0.2) and 2 (p=0.8) are published and version 2 is active.
fn fixture(activate: bool) -> Fixture {
    let store = Arc::new(MemoryVersionStore::new());
    let records = Arc::new(MemoryRecordStore::new());
    let dispatcher = Arc::new(AlertDispatcher::disabled());
    let cache = Arc::new(ActiveVersionCache::empty());

    if activate {
        store.publish(Arc::new(ConstantScorer::new(0.2)), 0.5).unwrap();
        let v2 = store.publish(Arc::new(ConstantScorer::new(0.8)), 0.6).unwrap();
        store.set_current(v2.version).unwrap();
        cache.swap(v2);
    }

    let orchestrator = Arc::new(
        RetrainOrchestrator::new(
            store.clone(),
            Arc::clone(&cache),
            records.clone(),
            Arc::new(LogisticTrainer::default()),
            Arc::clone(&dispatcher),
        )
        .with_base_dataset(Dataset::default()),
    );
    let hub = Arc::new(IncidentHub::default());
    let state = AppState {
        predictions: Arc::new(PredictionService::new(
            Arc::clone(&cache),
            records.clone(),
            Arc::clone(&dispatcher),
            0.9,
        )),
        orchestrator: Arc::clone(&orchestrator),
        auditor: Arc::new(FairnessAuditor::new(records.clone(), dispatcher, 0.05)),
        feedback: records.clone(),
        hub: Arc::clone(&hub),
        api_token: Arc::new(SecretString::from(TOKEN.to_string())),
        protected_attributes: vec!["Gender".to_string()].into(),
        metrics: None,
    };

    Fixture {
        app: router(state),
        store,
        records,
        orchestrator,
        hub,
    }
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn transaction(gender: &str) -> Value {
    json!({ "Amount": 120.5, "Hour": 3, "Gender": gender })
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_health_needs_no_token() {
    let f = fixture(true);
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&f.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_version"], 2);
}

#[tokio::test]
async fn test_missing_token_is_rejected_before_state_changes() {
    let f = fixture(true);
    let request = Request::builder()
        .method("POST")
        .uri("/feedback")
        .header("content-type", "application/json")
        .body(Body::from(
            json!([{ "features": transaction("F"), "analyst_label": 1 }]).to_string(),
        ))
        .unwrap();

    let (status, body) = send(&f.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["kind"], "auth_error");
    assert!(f.records.feedback_since(None).unwrap().is_empty());
}

#[tokio::test]
async fn test_wrong_token_is_rejected() {
    let f = fixture(true);
    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header("authorization", "Bearer nope")
        .header("content-type", "application/json")
        .body(Body::from(transaction("F").to_string()))
        .unwrap();
    let (status, body) = send(&f.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["kind"], "auth_error");
}

#[tokio::test]
async fn test_bare_token_header_is_accepted() {
    let f = fixture(true);
    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header("token", TOKEN)
        .header("content-type", "application/json")
        .body(Body::from(transaction("F").to_string()))
        .unwrap();
    let (status, _) = send(&f.app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_incident_stream_requires_token() {
    let f = fixture(true);
    let request = Request::builder()
        .uri("/ws/incidents")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&f.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Scoring and feedback
// ============================================================================

#[tokio::test]
async fn test_predict_returns_label_probability_threshold() {
    let f = fixture(true);
    let (status, body) = send(&f.app, post("/predict", &transaction("F"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fraud_prediction"], 1);
    assert!((body["fraud_probability"].as_f64().unwrap() - 0.8).abs() < 1e-9);
    assert!((body["threshold"].as_f64().unwrap() - 0.6).abs() < 1e-9);
    assert_eq!(body["version"], 2);
}

#[tokio::test]
async fn test_predict_without_model_is_unavailable() {
    let f = fixture(false);
    let (status, body) = send(&f.app, post("/predict", &transaction("F"))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["kind"], "no_active_version");
}

#[tokio::test]
async fn test_predict_rejects_malformed_body() {
    let f = fixture(true);
    let (status, body) = send(&f.app, post("/predict", &json!([1, 2, 3]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_input");
}

#[tokio::test]
async fn test_feedback_is_stored() {
    let f = fixture(true);
    let items = json!([
        { "features": transaction("F"), "analyst_label": 1 },
        { "features": transaction("M"), "analyst_label": 0 },
    ]);
    let (status, body) = send(&f.app, post("/feedback", &items)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "feedback_saved");
    assert_eq!(body["new_records"], 2);
    let stored = f.records.feedback_since(None).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].true_label, 1);
}

#[tokio::test]
async fn test_feedback_rejects_non_binary_label() {
    let f = fixture(true);
    let items = json!([{ "features": transaction("F"), "analyst_label": 3 }]);
    let (status, body) = send(&f.app, post("/feedback", &items)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_input");
    assert!(f.records.feedback_since(None).unwrap().is_empty());
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_rollback_known_and_unknown_versions() {
    let f = fixture(true);

    let (status, body) = send(&f.app, post_empty("/rollback_model?v=9")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");
    assert_eq!(f.orchestrator.cache().active_version(), Some(2));

    let (status, body) = send(&f.app, post_empty("/rollback_model?v=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "rolled_back", "version": 1 }));
    assert_eq!(f.store.current_version().unwrap(), 1);

    let (_, body) = send(&f.app, post("/predict", &transaction("F"))).await;
    assert_eq!(body["version"], 1);
    assert_eq!(body["fraud_prediction"], 0);
}

#[tokio::test]
async fn test_rollback_requires_version_parameter() {
    let f = fixture(true);
    let (status, body) = send(&f.app, post_empty("/rollback_model")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_input");
}

#[tokio::test]
async fn test_reload_reads_pointer() {
    let f = fixture(true);
    f.store.set_current(1).unwrap();

    let (status, body) = send(&f.app, post_empty("/model/reload")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "reloaded", "version": 1 }));
    assert_eq!(f.orchestrator.cache().active_version(), Some(1));
}

#[tokio::test]
async fn test_retrain_is_accepted_then_conflicts_while_busy() {
    let f = fixture(true);

    let ticket = f.orchestrator.begin().unwrap();
    let (status, body) = send(&f.app, post_empty("/retrain")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "retrain_in_progress");
    drop(ticket);

    let (status, body) = send(&f.app, post_empty("/retrain?force=false")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["force"], false);
}

#[tokio::test]
async fn test_cancel_without_cycle() {
    let f = fixture(true);
    let (status, body) = send(&f.app, post_empty("/retrain/cancel")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "nothing_to_cancel");
    assert_eq!(body["state"], "idle");
}

#[tokio::test]
async fn test_model_summary() {
    let f = fixture(true);
    let (status, body) = send(&f.app, get("/model")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"]["version"], 2);
    assert_eq!(body["active"]["scorer_kind"], "constant");
    assert_eq!(body["state"], "idle");
    assert_eq!(body["versions"], json!([1, 2]));
}

// ============================================================================
// Audit, incidents, metrics
// ============================================================================

#[tokio::test]
async fn test_audit_uses_configured_attributes_by_default() {
    let f = fixture(true);
    send(&f.app, post("/predict", &transaction("F"))).await;
    f.orchestrator.rollback(1).await.unwrap();
    send(&f.app, post("/predict", &transaction("M"))).await;

    let (status, body) = send(&f.app, post_empty("/audit")).await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["attribute_name"], "Gender");
    assert!((results[0]["outcome_gap"].as_f64().unwrap() - 1.0).abs() < 1e-9);

    let (_, body) = send(&f.app, post("/audit", &json!({ "attributes": ["Region"] }))).await;
    assert!(body["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_broadcast_reaches_subscribers() {
    let f = fixture(true);
    let mut subscriber = f.hub.subscribe();

    let message = json!({ "type": "manual", "title": "DB failover" });
    let (status, body) = send(&f.app, post("/broadcast_incident", &message)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "broadcasted");
    assert_eq!(body["delivered"], 1);

    let received = tokio::time::timeout(Duration::from_secs(1), subscriber.recv())
        .await
        .unwrap()
        .unwrap();
    let parsed: Value = serde_json::from_str(&received).unwrap();
    assert_eq!(parsed, message);
}

#[tokio::test]
async fn test_metrics_disabled() {
    let f = fixture(true);
    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = f.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
