//! HTTP surface.
//!
//! | Route | Method | Auth |
//! |-------|--------|------|
//! | `/health` | GET | no |
//! | `/metrics` | GET | no |
//! | `/predict` | POST | yes |
//! | `/feedback` | POST | yes |
//! | `/retrain` | POST | yes |
//! | `/retrain/cancel` | POST | yes |
//! | `/rollback_model?v=N` | POST | yes |
//! | `/model/reload` | POST | yes |
//! | `/model` | GET | yes |
//! | `/audit` | POST | yes |
//! | `/broadcast_incident` | POST | yes |
//! | `/ws/incidents` | GET (upgrade) | yes |

mod auth;
mod error;
mod handlers;
mod ws;

pub use auth::require_token;
pub use error::{ApiError, ApiResult};

use crate::incidents::IncidentHub;
use crate::observability::MetricsHandle;
use crate::services::{FairnessAuditor, RetrainOrchestrator};
use crate::serving::PredictionService;
use crate::storage::FeedbackStore;
use crate::{Error, Result};
use axum::Router;
use axum::http::header;
use axum::routing::{get, post};
use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Scores requests.
    pub predictions: Arc<PredictionService>,
    /// Retrain, rollback and reload.
    pub orchestrator: Arc<RetrainOrchestrator>,
    /// On-demand fairness audits.
    pub auditor: Arc<FairnessAuditor>,
    /// Destination for analyst feedback.
    pub feedback: Arc<dyn FeedbackStore>,
    /// Incident relay.
    pub hub: Arc<IncidentHub>,
    /// Token every authenticated route requires.
    pub api_token: Arc<SecretString>,
    /// Attributes audited when a request names none.
    pub protected_attributes: Arc<[String]>,
    /// Metrics renderer, absent when metrics are disabled.
    pub metrics: Option<MetricsHandle>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("predictions", &self.predictions)
            .field("orchestrator", &self.orchestrator)
            .field("hub", &self.hub)
            .field("api_token", &"[REDACTED]")
            .field("protected_attributes", &self.protected_attributes)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

/// Builds the router with auth, security headers and request tracing.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/predict", post(handlers::predict))
        .route("/feedback", post(handlers::feedback))
        .route("/retrain", post(handlers::retrain))
        .route("/retrain/cancel", post(handlers::cancel_retrain))
        .route("/rollback_model", post(handlers::rollback))
        .route("/model/reload", post(handlers::reload))
        .route("/model", get(handlers::model))
        .route("/audit", post(handlers::audit))
        .route("/broadcast_incident", post(handlers::broadcast_incident))
        .route("/ws/incidents", get(ws::incidents))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .merge(protected)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            header::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            header::HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `app` on `bind` until `shutdown` turns true.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the address cannot be bound or the
/// server fails.
pub async fn serve(bind: &str, app: Router, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| Error::operation("bind", format!("{bind}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| Error::operation("bind", e))?;
    tracing::info!(addr = %local, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            tracing::info!("HTTP server shutting down");
        })
        .await
        .map_err(|e| Error::operation("serve", e))
}
