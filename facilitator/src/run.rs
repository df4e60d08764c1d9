//! fluxa402 facilitator HTTP entrypoint.
//!
//! Launches the Axum server hosting the x402 v2 verify/settle surface:
//!
//! - `POST /verify` – verify a payment payload against requirements
//! - `POST /settle` – settle an accepted payment payload
//! - `GET /supported` – list supported payment kinds and signers
//! - `GET /health` – liveness probe
//! - `GET /benchmark/metrics` – Prometheus counters
//!
//! Also spawns the deferred scheme's background settlement loop when
//! configured. Shutdown is coordinated through a cancellation token raised
//! on SIGTERM/SIGINT; in-flight settlements run to completion.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control the binding address
//! - `RUST_LOG` controls the tracing filter

use axum::http::Method;
use axum::Router;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors;
use tower_http::limit::RequestBodyLimitLayer;

use fluxa402_odp::scheduler::AutoSettler;

use crate::config::Config;
use crate::handlers::{self, AppState};
use crate::schemes;
use crate::util::shutdown_token;

/// Payment payloads are small; anything bigger than this is not a payment.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Initializes and runs the facilitator server until shutdown.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::load()?;
    let schemes = schemes::build(&config)?;

    let shutdown_token = shutdown_token()?;

    let mut scheduler_handle = None;
    if let Some(odp_config) = config.odp() {
        if let (Some(interval), Some(odp)) = (
            odp_config.auto_settle_interval_seconds,
            schemes.odp.as_ref(),
        ) {
            let settler = AutoSettler::new(odp.clone(), Duration::from_secs(interval));
            scheduler_handle = Some(settler.spawn(shutdown_token.clone()));
            tracing::info!(interval_seconds = interval, "settlement scheduler started");
        }
    }

    let state = Arc::new(AppState {
        facilitator: schemes.dispatcher,
        odp: schemes.odp,
    });
    let http_endpoints = Router::new()
        .merge(handlers::routes())
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let axum_cancellation_token = shutdown_token.clone();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    if let Some(handle) = scheduler_handle {
        // The scheduler observes the same token; wait for its last pass.
        let _ = handle.await;
    }

    Ok(())
}
