//! HTTP API over the telemetry source and the live poller
//!
//! Every `/api` route except `/api/vitals/live` fetches a fresh batch from
//! the source per request. Nothing is cached between requests.

use crate::aggregator::{daily_summaries, DailySummary};
use crate::alerts::{filter_alerts, TemperatureRule, VitalsRule};
use crate::config::Config;
use crate::error::{ApiError, ServerError};
use crate::export::{to_csv, EXPORT_FILENAME};
use crate::poller::{LiveView, PollState, Poller};
use crate::readings::Reading;
use crate::telemetry::TelemetrySource;
use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::Method;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::FixedOffset;
use log::{debug, info};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

/// Shared state handed to every handler
pub struct AppState {
    source: Arc<dyn TelemetrySource>,
    poller: Arc<Poller>,
    vitals_rule: VitalsRule,
    temperature_rule: TemperatureRule,
    offset: FixedOffset,
}

impl AppState {
    /// Build handler state from the configured thresholds and reporting offset
    pub fn new(source: Arc<dyn TelemetrySource>, poller: Arc<Poller>, config: &Config) -> Self {
        Self {
            source,
            poller,
            vitals_rule: config.vitals_rule(),
            temperature_rule: config.temperature_rule(),
            offset: config.report_offset(),
        }
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/api/data", get(data_handler))
        .route("/api/alerts", get(temperature_alerts_handler))
        .route("/api/vitals/alerts", get(vitals_alerts_handler))
        .route("/api/vitals/summary", get(summary_handler))
        .route("/api/vitals/export", get(export_handler))
        .route("/api/vitals/live", get(live_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` flips to `true`
///
/// # Errors
///
/// Returns `ServerError::Bind` if the address cannot be bound and
/// `ServerError::Serve` if the server fails while running.
pub async fn run(
    address: &str,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    info!("Binding to {}", address);
    let listener = TcpListener::bind(address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.to_string(),
            source,
        })?;

    if let Ok(local) = listener.local_addr() {
        info!("Server running on {}", local);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            info!("Shutdown requested, draining connections");
        })
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn data_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Reading>>, ApiError> {
    let readings = state.source.fetch().await.map_err(ApiError::FetchData)?;
    debug!("GET /api/data -> {} readings", readings.len());
    Ok(Json(readings))
}

async fn temperature_alerts_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Reading>>, ApiError> {
    let readings = state.source.fetch().await.map_err(ApiError::FetchAlerts)?;
    Ok(Json(filter_alerts(&state.temperature_rule, &readings)))
}

async fn vitals_alerts_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Reading>>, ApiError> {
    let readings = state
        .source
        .fetch()
        .await
        .map_err(ApiError::FetchVitalsAlerts)?;
    Ok(Json(filter_alerts(&state.vitals_rule, &readings)))
}

async fn summary_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DailySummary>>, ApiError> {
    let readings = state.source.fetch().await.map_err(ApiError::FetchData)?;
    Ok(Json(daily_summaries(&readings, state.offset)))
}

async fn export_handler(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let readings = state.source.fetch().await.map_err(ApiError::FetchData)?;
    let body = to_csv(&readings, state.offset);

    let headers = [
        (CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
        (
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", EXPORT_FILENAME),
        ),
    ];
    Ok((headers, body))
}

async fn live_handler(State(state): State<Arc<AppState>>) -> Json<LiveView> {
    Json(state.poller.snapshot())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "polling": state.poller.state() == PollState::Polling,
    }))
}
