//! Route handlers.

use super::AppState;
use super::error::{ApiError, ApiResult};
use crate::Error;
use crate::models::{Features, FeedbackRecord};
use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

fn bad_request(rejection: &impl std::fmt::Display) -> ApiError {
    Error::InvalidInput(rejection.to_string()).into()
}

async fn blocking<T, F>(operation: &'static str, f: F) -> ApiResult<T>
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::operation(operation, e))?
        .map_err(ApiError::from)
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "active_version": state.predictions.cache().active_version(),
        "retrain_state": state.orchestrator.state(),
        "subscribers": state.hub.subscriber_count(),
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

pub async fn predict(
    State(state): State<AppState>,
    body: Result<Json<Features>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(features) = body.map_err(|e| bad_request(&e))?;
    let service = Arc::clone(&state.predictions);
    let prediction = blocking("predict", move || service.predict(features)).await?;

    Ok(Json(json!({
        "fraud_prediction": prediction.label,
        "fraud_probability": prediction.probability,
        "threshold": prediction.threshold,
        "version": prediction.version,
    })))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackItem {
    features: Features,
    analyst_label: u8,
}

pub async fn feedback(
    State(state): State<AppState>,
    body: Result<Json<Vec<FeedbackItem>>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(items) = body.map_err(|e| bad_request(&e))?;
    if let Some(bad) = items.iter().find(|item| item.analyst_label > 1) {
        return Err(Error::InvalidInput(format!(
            "analyst_label must be 0 or 1, got {}",
            bad.analyst_label
        ))
        .into());
    }

    let records: Vec<FeedbackRecord> = items
        .into_iter()
        .map(|item| FeedbackRecord::new(item.features, item.analyst_label))
        .collect();
    let store = Arc::clone(&state.feedback);
    let stored = blocking("feedback", move || store.append_feedback(&records)).await?;
    tracing::info!(records = stored, "Feedback stored");

    Ok(Json(json!({ "status": "feedback_saved", "new_records": stored })))
}

#[derive(Debug, Default, Deserialize)]
pub struct RetrainParams {
    #[serde(default)]
    force: bool,
}

/// Starts a cycle in the background and answers before it finishes.
pub async fn retrain(
    State(state): State<AppState>,
    params: Result<Query<RetrainParams>, QueryRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Query(params) = params.map_err(|e| bad_request(&e))?;
    let ticket = state.orchestrator.begin()?;
    let orchestrator = Arc::clone(&state.orchestrator);
    let force = params.force;

    tokio::spawn(async move {
        match orchestrator.run(ticket, force).await {
            Ok(outcome) => tracing::debug!(?outcome, "Requested retrain finished"),
            Err(e) => tracing::debug!(error = %e, "Requested retrain did not complete"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "force": force })),
    ))
}

pub async fn cancel_retrain(State(state): State<AppState>) -> Json<Value> {
    let cancelled = state.orchestrator.cancel();
    Json(json!({
        "status": if cancelled { "cancelled" } else { "nothing_to_cancel" },
        "state": state.orchestrator.state(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct RollbackParams {
    v: u64,
}

pub async fn rollback(
    State(state): State<AppState>,
    params: Result<Query<RollbackParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = params.map_err(|e| bad_request(&e))?;
    let orchestrator = Arc::clone(&state.orchestrator);
    let (from, version) = blocking("rollback", move || orchestrator.activate(params.v)).await?;
    state
        .orchestrator
        .announce_rollback(from, version.version)
        .await;
    Ok(Json(json!({ "status": "rolled_back", "version": version.version })))
}

pub async fn reload(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let orchestrator = Arc::clone(&state.orchestrator);
    let version = blocking("reload", move || orchestrator.reload()).await?;
    Ok(Json(json!({ "status": "reloaded", "version": version.version })))
}

pub async fn model(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let orchestrator = Arc::clone(&state.orchestrator);
    let versions = blocking("list_versions", move || orchestrator.store().versions()).await?;
    let active = state.predictions.cache().snapshot().map(|v| v.summary());

    Ok(Json(json!({
        "active": active,
        "state": state.orchestrator.state(),
        "versions": versions,
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditRequest {
    #[serde(default)]
    attributes: Vec<String>,
}

/// Runs an audit over the requested attributes, or the configured ones when
/// the body is empty or names none.
pub async fn audit(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    let request: AuditRequest = if body.is_empty() {
        AuditRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(&e))?
    };
    let attributes = if request.attributes.is_empty() {
        state.protected_attributes.to_vec()
    } else {
        request.attributes
    };

    let results = state.auditor.audit(&attributes).await?;
    Ok(Json(json!({
        "results": results,
        "max_gap": state.auditor.max_gap(),
    })))
}

pub async fn broadcast_incident(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(message) = body.map_err(|e| bad_request(&e))?;
    let delivered = state.hub.publish(&message);
    Ok(Json(json!({ "status": "broadcasted", "delivered": delivered })))
}
