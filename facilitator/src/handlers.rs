//! HTTP endpoints of the fluxa402 facilitator.
//!
//! Protocol-critical endpoints (`POST /verify`, `POST /settle`) plus
//! discovery (`GET /supported`, `GET /health`) and the benchmark counters
//! (`GET /benchmark/metrics`).
//!
//! Semantic payment failures travel inside 200-OK bodies; only malformed
//! requests and internal failures produce HTTP errors.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::instrument;

use fluxa402_odp::OdpDeferredFacilitator;
use fluxa402_types::facilitator::{Facilitator, SchemeDispatcher};
use fluxa402_types::proto::{ErrorResponse, SettleRequest, VerifyRequest};

use crate::metrics;

/// Shared state of the HTTP surface.
pub struct AppState {
    pub facilitator: SchemeDispatcher,
    pub odp: Option<Arc<OdpDeferredFacilitator>>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/verify", post(post_verify))
        .route("/settle", post(post_settle))
        .route("/supported", get(get_supported))
        .route("/health", get(get_health))
        .route("/benchmark/metrics", get(get_benchmark_metrics))
}

/// `POST /verify`: check a payment payload against requirements.
#[instrument(skip_all)]
async fn post_verify(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyRequest>,
) -> impl IntoResponse {
    match state.facilitator.verify(&body).await {
        Ok(response) => {
            let result = if response.is_valid { "valid" } else { "invalid" };
            metrics::VERIFY_REQUESTS.with_label_values(&[result]).inc();
            if !response.is_valid {
                tracing::debug!(reason = ?response.invalid_reason, "verification rejected");
            }
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(error) => {
            metrics::VERIFY_REQUESTS.with_label_values(&["error"]).inc();
            tracing::error!(error = %error, "verification failed internally");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: error.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// `POST /settle`: execute (or batch-trigger) settlement of a payment.
#[instrument(skip_all)]
async fn post_settle(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SettleRequest>,
) -> impl IntoResponse {
    match state.facilitator.settle(&body).await {
        Ok(response) => {
            let result = if response.success { "success" } else { "rejected" };
            metrics::SETTLE_REQUESTS.with_label_values(&[result]).inc();
            if !response.success {
                tracing::debug!(reason = ?response.error_reason, "settlement rejected");
            }
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(error) => {
            metrics::SETTLE_REQUESTS.with_label_values(&["error"]).inc();
            tracing::error!(error = %error, "settlement failed internally");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: error.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// `GET /supported`: the payment kinds and signers this facilitator serves.
#[instrument(skip_all)]
async fn get_supported(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.facilitator.supported().await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: error.to_string(),
            }),
        )
            .into_response(),
    }
}

/// `GET /health`: liveness probe.
async fn get_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "fluxa402-facilitator",
        "schemes": state.facilitator.registry().len(),
    }))
}

/// `GET /benchmark/metrics`: counters for verified and settled receipts,
/// settlement transactions, and pending sessions.
async fn get_benchmark_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if let Some(odp) = state.odp.as_ref() {
        let stats = odp.stats();
        metrics::VERIFIED_RECEIPTS.set(stats.verified_receipts as i64);
        metrics::SETTLED_RECEIPTS.set(stats.settled_receipts as i64);
        metrics::SETTLEMENT_TXS.set(stats.settlement_txs as i64);
        metrics::PENDING_SESSIONS.set(stats.pending_sessions as i64);
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics::metrics_output(),
    )
}
