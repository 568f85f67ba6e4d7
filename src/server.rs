//! HTTP trigger and marker-data server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/blip/fetch` | Run one ingestion cycle (bearer `CRON_SECRET`) |
//! | `GET`  | `/api/blip/incidents?from=` | Rated incidents since `from` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Trigger contract
//!
//! The fetch route answers with the cron-facing shapes:
//!
//! ```json
//! { "error": "Unauthorized" }
//! { "success": true, "message": "Incident data updated successfully.", "stats": { ... },
//!   "startedAt": "...", "finishedAt": "..." }
//! { "success": false, "error": "source request failed: 503 ..." }
//! ```
//!
//! Other routes use the error contract
//! `{ "error": { "code": "bad_request", "message": "..." } }`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser map can
//! read marker data directly.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::incidents::{list_incidents, parse_since, MarkerResponse};
use crate::ingest::Pipeline;
use crate::models::CycleStats;

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    secret: Arc<String>,
}

/// Start the server with production clients.
///
/// Reads `CRON_SECRET` from the environment and refuses to start without
/// it; API keys for the extractor and geocoder are read the same way.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let secret = match std::env::var("CRON_SECRET") {
        Ok(s) if !s.is_empty() => s,
        _ => anyhow::bail!("CRON_SECRET environment variable not set"),
    };
    let pipeline = Pipeline::from_config(config).await?;
    run_server_with_pipeline(config, Arc::new(pipeline), secret).await
}

/// Start the server around an already-wired [`Pipeline`].
///
/// ```rust,no_run
/// use blip::ingest::Pipeline;
/// use blip::server::run_server_with_pipeline;
/// use std::sync::Arc;
///
/// # async fn example(config: &blip::config::Config, pipeline: Pipeline) -> anyhow::Result<()> {
/// run_server_with_pipeline(config, Arc::new(pipeline), "s3cret".to_string()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_server_with_pipeline(
    config: &Config,
    pipeline: Arc<Pipeline>,
    secret: String,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let state = AppState {
        pipeline,
        secret: Arc::new(secret),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/blip/fetch", post(handle_fetch))
        .route("/api/blip/incidents", get(handle_incidents))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(%bind_addr, "blip server listening");
    println!("blip server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

// ============ Auth ============

/// Compare two byte strings without short-circuiting on the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

fn is_authorized(headers: &HeaderMap, secret: &str) -> bool {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    match value.strip_prefix("Bearer ") {
        Some(token) => constant_time_eq(token.as_bytes(), secret.as_bytes()),
        None => false,
    }
}

// ============ POST /api/blip/fetch ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchSuccess {
    success: bool,
    message: &'static str,
    stats: CycleStats,
    started_at: String,
    finished_at: String,
}

async fn handle_fetch(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !is_authorized(&headers, &state.secret) {
        tracing::warn!("rejected fetch trigger with bad credentials");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Unauthorized" })),
        )
            .into_response();
    }

    let started = Utc::now();
    match state.pipeline.run_cycle_at(started).await {
        Ok(stats) => {
            let body = FetchSuccess {
                success: true,
                message: "Incident data updated successfully.",
                stats,
                started_at: started.to_rfc3339_opts(SecondsFormat::Millis, true),
                finished_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "ingestion cycle failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

// ============ GET /api/blip/incidents ============

#[derive(Deserialize)]
struct IncidentsParams {
    from: Option<String>,
}

async fn handle_incidents(
    State(state): State<AppState>,
    Query(params): Query<IncidentsParams>,
) -> Result<Json<MarkerResponse>, AppError> {
    let since = match params.from.as_deref() {
        Some(raw) => parse_since(raw).map_err(|e| bad_request(e.to_string()))?,
        None => Utc::now() - Duration::hours(24),
    };

    let response = list_incidents(state.pipeline.store().as_ref(), since, false, None)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(response))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
