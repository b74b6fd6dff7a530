//! HTTP front for the snippet sandbox.
//!
//! Exposes the execution core to an upstream snippet service. Persisting the
//! verdict stays with the caller; this layer only validates the language,
//! resolves limits and maps verdicts to status codes.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use snippet_exec::{
    CodeExecutionService, ExecutionRequest, ExecutionResult, HarnessMode, Language,
    ResourceLimits, SandboxConfig, Verdict,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Only Python snippets are supported for running tests, got: {0}")]
    UnsupportedLanguage(String),
    #[error("Invalid configuration: {0}")]
    Config(#[from] snippet_exec::Error),
    #[error("Server error: {0}")]
    ServerError(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match self {
            ServerError::UnsupportedLanguage(_) => StatusCode::BAD_REQUEST,
            ServerError::Config(_) | ServerError::ServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Test run request from the snippet service
#[derive(Debug, Deserialize, Serialize)]
pub struct RunRequest {
    #[serde(default)]
    pub snippet_id: Option<i64>,
    pub code: String,
    pub language: String,
    pub test_code: String,
    /// CPU and wall-clock budget in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
    #[serde(default)]
    pub harness: Option<HarnessMode>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet_id: Option<i64>,
    #[serde(flatten)]
    pub result: ExecutionResult,
}

#[derive(Clone)]
pub struct AppState {
    service: CodeExecutionService,
    config: Arc<SandboxConfig>,
}

impl AppState {
    /// Limits for a request: configured defaults, overridden by whatever the
    /// caller supplied.
    fn limits_for(&self, request: &RunRequest) -> ResourceLimits {
        let mut limits = self.config.limits.clone();
        if let Some(timeout_ms) = request.timeout_ms {
            limits.cpu_time = Duration::from_millis(timeout_ms);
            limits.wall_clock = Duration::from_millis(timeout_ms);
        }
        if let Some(memory_mb) = request.memory_limit_mb {
            limits.memory = memory_mb.saturating_mul(1024 * 1024);
        }
        limits
    }
}

pub async fn create_app(config: SandboxConfig) -> Result<Router, ServerError> {
    config.validate()?;

    let service = CodeExecutionService::from_config(&config);
    if let Err(e) = service.check_tools() {
        warn!("{}; every run will report an error verdict", e);
    }

    let state = AppState {
        service,
        config: Arc::new(config),
    };

    let cors = CorsLayer::permissive();

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/run/python", post(run_python))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    Ok(app)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;
    serve(listener, app).await
}

pub async fn serve(listener: TcpListener, app: Router) -> Result<(), ServerError> {
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::ServerError(e.to_string()))?;
    info!("Starting snippet runner on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

async fn health_check() -> &'static str {
    "OK"
}

async fn run_python(
    State(state): State<AppState>,
    Json(payload): Json<RunRequest>,
) -> Result<(StatusCode, Json<RunResponse>), ServerError> {
    let language: Language = payload
        .language
        .parse()
        .map_err(|_| ServerError::UnsupportedLanguage(payload.language.clone()))?;

    let request = ExecutionRequest {
        language,
        harness: payload.harness.unwrap_or(state.config.harness),
        limits: state.limits_for(&payload),
        source_code: payload.code,
        test_code: payload.test_code,
    };

    let result = state.service.execute(request).await;
    let status = match result.verdict {
        Verdict::Error => StatusCode::INTERNAL_SERVER_ERROR,
        Verdict::Success | Verdict::Failure => StatusCode::OK,
    };

    Ok((
        status,
        Json(RunResponse {
            snippet_id: payload.snippet_id,
            result,
        }),
    ))
}
