use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::status::Custom;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::{catch, catchers, get, post, routes, Build, Rocket, State};
use serde::{Deserialize, Serialize};

use common::Config;

use crate::error::AnalysisError;
use crate::pipeline::{ReportPipeline, ReportResult};
use crate::prompts::ChatTurn;
use crate::setup::CacheMode;

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub pipeline: Arc<ReportPipeline>,
    pub cache_mode: CacheMode,
}

/// Response structure for `/api/v1/status`.
#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    cache: String,
    model_namespaces: Vec<String>,
    lock_ttl_seconds: u64,
    report_ttl_seconds: u64,
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    company: String,
}

#[derive(Deserialize)]
struct AskRequest {
    company: String,
    question: String,
    #[serde(default)]
    history: Vec<ChatTurn>,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
}

/// JSON error body; `retry_after_seconds` is only set for retry-later rejections.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub retryable: bool,
    pub retry_after_seconds: Option<u64>,
}

/// HTTP status for each terminal analysis outcome
pub fn status_for(err: &AnalysisError) -> Status {
    match err {
        AnalysisError::InputInvalid(_) => Status::BadRequest,
        AnalysisError::Busy { .. } => Status::TooManyRequests,
        AnalysisError::NoSourceData { .. } => Status::NotFound,
        AnalysisError::ReportNotFound { .. } => Status::NotFound,
        AnalysisError::NoModelAvailable { .. } => Status::ServiceUnavailable,
        AnalysisError::UpstreamAuthOrQuota(_) => Status::BadGateway,
        AnalysisError::Upstream(_) => Status::BadGateway,
        AnalysisError::Timeout(_) => Status::GatewayTimeout,
    }
}

pub struct ApiError(pub AnalysisError);

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        ApiError(err)
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let err = self.0;
        let retry_after = err.retry_after().map(|d| d.as_secs());
        let body = ErrorBody {
            error: err.kind().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            retry_after_seconds: retry_after,
        };

        let mut response = Json(body).respond_to(request)?;
        response.set_status(status_for(&err));
        if let Some(secs) = retry_after {
            response.set_raw_header("Retry-After", secs.to_string());
        }
        Ok(response)
    }
}

/// Request bodies rejected by the JSON data guard get the same error shape as
/// pipeline errors.
fn rejected_body(code: Status, message: &str) -> Custom<Json<ErrorBody>> {
    Custom(
        code,
        Json(ErrorBody {
            error: "input_invalid".to_string(),
            message: message.to_string(),
            retryable: false,
            retry_after_seconds: None,
        }),
    )
}

#[catch(400)]
fn bad_request() -> Custom<Json<ErrorBody>> {
    rejected_body(Status::BadRequest, "request body is not valid JSON")
}

#[catch(422)]
fn unprocessable_entity() -> Custom<Json<ErrorBody>> {
    rejected_body(Status::UnprocessableEntity, "request body is missing required fields")
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

/// Status endpoint returning uptime and the effective pipeline settings.
#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    let settings = state.pipeline.settings();

    Json(StatusResponse {
        status: "ok",
        uptime_seconds: uptime,
        cache: state.cache_mode.to_string(),
        model_namespaces: state.pipeline.namespaces().to_vec(),
        lock_ttl_seconds: settings.lock_ttl.as_secs(),
        report_ttl_seconds: settings.report_ttl.as_secs(),
    })
}

#[post("/api/v1/analyze", data = "<body>")]
async fn analyze(state: &State<AppState>, body: Json<AnalyzeRequest>) -> Result<Json<ReportResult>, ApiError> {
    let result = state.pipeline.analyze(&body.company).await?;
    Ok(Json(result))
}

#[post("/api/v1/ask", data = "<body>")]
async fn ask(state: &State<AppState>, body: Json<AskRequest>) -> Result<Json<AskResponse>, ApiError> {
    let answer = state
        .pipeline
        .follow_up(&body.company, &body.question, &body.history)
        .await?;
    Ok(Json(AskResponse { answer }))
}

/// Build the Rocket instance with managed state and routes (no network binding).
pub fn build_rocket(state: AppState, config: Option<&Config>) -> Rocket<Build> {
    let mut fig = rocket::Config::figment();
    if let Some(cfg) = config {
        if let Some(bind) = &cfg.server.bind {
            fig = fig.merge(("address", bind.clone()));
        }
        if let Some(port) = cfg.server.port {
            fig = fig.merge(("port", port));
        }
    }

    rocket::custom(fig)
        .manage(state)
        .mount("/", routes![health, status, analyze, ask])
        .register("/", catchers![bad_request, unprocessable_entity])
}

/// Build and launch a Rocket server.
///
/// This function blocks until the Rocket server shuts down.
pub async fn launch_rocket(state: AppState, config: &Config) -> Result<()> {
    tracing::info!("Starting Rocket HTTP server");
    build_rocket(state, Some(config))
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
