//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/incidents/{id}/analyze` | Run the analysis pipeline, return the report |
//! | `GET`  | `/incidents/{id}/similar?threshold=` | Similar incidents above the threshold |
//! | `GET`  | `/incidents/{id}/analysis` | Stored analysis result |
//! | `GET`  | `/ai/health` | Probe the AI endpoint |
//! | `GET`  | `/ai/status` | AI usage and connectivity counters |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "not found: incident CR-1" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use bugseek_core::models::{AnalysisResult, AnalysisType, ServiceStatus};
use bugseek_core::store::{AnalysisSink, PersistError};

use crate::ai_client::ConnectionCheck;
use crate::app::App;
use crate::config::Config;
use crate::similar::SimilarityReport;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    app: Arc<App>,
}

/// Start the HTTP server on `[server] bind`. Runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = App::open(config).await?;
    let bind_addr = config.server.bind.clone();
    let router = router(Arc::new(config.clone()), Arc::new(app));

    println!("BugSeek server listening on http://{}", bind_addr);
    info!(bind = %bind_addr, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

fn router(config: Arc<Config>, app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/incidents/{id}/analyze", post(handle_analyze))
        .route("/incidents/{id}/similar", get(handle_similar))
        .route("/incidents/{id}/analysis", get(handle_get_analysis))
        .route("/ai/health", get(handle_ai_health))
        .route("/ai/status", get(handle_ai_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { config, app })
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
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<PersistError> for AppError {
    fn from(err: PersistError) -> Self {
        match err {
            PersistError::NotFound(_) => not_found(err.to_string()),
            other => internal(other.to_string()),
        }
    }
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

// ============ POST /incidents/{id}/analyze ============

/// Runs on its own task so a dropped request still ends the run as `failed`
/// rather than leaving it in `processing`.
async fn handle_analyze(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let app = state.app.clone();
    let task = tokio::spawn(async move {
        app.analyzer
            .analyze(&id, &cancel)
            .await
            .map(|report| serde_json::to_value(report.view()))
    });

    let value = task
        .await
        .map_err(|e| internal(format!("analysis task failed: {}", e)))??
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(value))
}

// ============ GET /incidents/{id}/similar ============

#[derive(Deserialize)]
struct SimilarParams {
    threshold: Option<f64>,
}

async fn handle_similar(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SimilarParams>,
) -> Result<Json<SimilarityReport>, AppError> {
    if let Some(t) = params.threshold {
        if !(0.0..=1.0).contains(&t) {
            return Err(bad_request("threshold must be between 0.0 and 1.0"));
        }
    }
    let report = state.app.similarity.find_similar(&id, params.threshold).await?;
    Ok(Json(report))
}

// ============ GET /incidents/{id}/analysis ============

async fn handle_get_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnalysisResult>, AppError> {
    state
        .app
        .store
        .get_analysis_result(&id, AnalysisType::Complete)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("no analysis for incident {}", id)))
}

// ============ GET /ai/health, GET /ai/status ============

async fn handle_ai_health(State(state): State<AppState>) -> Json<ConnectionCheck> {
    Json(state.app.check_ai(&state.config).await)
}

async fn handle_ai_status(
    State(state): State<AppState>,
) -> Result<Json<ServiceStatus>, AppError> {
    state
        .app
        .service_status()
        .await?
        .map(Json)
        .ok_or_else(|| not_found("no AI calls recorded yet"))
}
