use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::AuditError;
use crate::graphql::http::{HttpTransportFactory, TransportFactory};
use crate::jobs::{spawn_report_job, JobId, JobState, JobStore, JobStoreError, JobSummary};
use crate::pipeline::ReportRequest;
use crate::report::resolve_date_range;
use crate::types::Credentials;

#[derive(Clone)]
pub struct ApiState {
    config: Arc<Config>,
    jobs: JobStore,
    transports: Arc<dyn TransportFactory>,
}

impl ApiState {
    pub fn new(config: Config, transports: Arc<dyn TransportFactory>) -> Self {
        let jobs = JobStore::new(
            Duration::from_secs(config.server.job_ttl_secs),
            config.server.max_jobs,
        );
        Self {
            config: Arc::new(config),
            jobs,
            transports,
        }
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }
}

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    ok: bool,
    data: T,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    ok: bool,
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error.to_string(),
        }
    }
}

impl From<AuditError> for ApiError {
    fn from(error: AuditError) -> Self {
        if error.is_validation() {
            Self::bad_request(error.to_string())
        } else {
            Self::internal(error)
        }
    }
}

impl From<JobStoreError> for ApiError {
    fn from(error: JobStoreError) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorBody {
            ok: false,
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

/// Account ids arrive as text from forms and as numbers from JSON clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AccountIdInput {
    Number(i64),
    Text(String),
}

impl AccountIdInput {
    fn as_text(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RunRequest {
    api_key: Option<String>,
    account_id: Option<AccountIdInput>,
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct JobCreated {
    job_id: JobId,
    status_url: String,
}

#[derive(Debug, Deserialize)]
struct DownloadPath {
    kind: String,
    job_id: String,
}

pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/run", post(run_form))
        .route("/v1/jobs", post(run_json))
        .route("/v1/jobs/:job_id", get(job_status).delete(cancel_job))
        .route("/v1/jobs/:job_id/download/:kind", get(download))
        .route("/download/:kind/:job_id", get(download))
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(config: Config, bind: SocketAddr) -> Result<()> {
    let factory = HttpTransportFactory {
        endpoint: config.newrelic.graphql_url.clone(),
        connect_timeout: config.connect_timeout(),
    };
    let sweep_every = Duration::from_secs(config.server.sweep_interval_secs.max(1));
    let state = ApiState::new(config, Arc::new(factory));

    let jobs = state.jobs().clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            let evicted = jobs.evict_expired();
            if evicted > 0 {
                debug!(evicted, remaining = jobs.len(), "evicted expired jobs");
            }
        }
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("alert audit API listening on http://{bind}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index() -> &'static str {
    "New Relic alert audit API: POST /run or /v1/jobs, then poll GET /v1/jobs/{id}"
}

async fn health() -> Json<ApiResponse<HealthResponse>> {
    ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn run_form(
    State(state): State<ApiState>,
    Form(request): Form<RunRequest>,
) -> std::result::Result<(StatusCode, Json<ApiResponse<JobCreated>>), ApiError> {
    start_job(&state, request)
}

async fn run_json(
    State(state): State<ApiState>,
    Json(request): Json<RunRequest>,
) -> std::result::Result<(StatusCode, Json<ApiResponse<JobCreated>>), ApiError> {
    start_job(&state, request)
}

async fn job_status(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> ApiResult<JobSummary> {
    let id = parse_job_id(&job_id)?;
    let record = state
        .jobs
        .get(&id)
        .ok_or_else(|| ApiError::not_found("Results not found or expired."))?;
    Ok(ok(record.summary()))
}

async fn cancel_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> ApiResult<JobSummary> {
    let id = parse_job_id(&job_id)?;
    if !state.jobs.cancel(&id) {
        return Err(ApiError::not_found("Results not found or expired."));
    }
    info!(%id, "cancellation requested");
    let record = state
        .jobs
        .get(&id)
        .ok_or_else(|| ApiError::not_found("Results not found or expired."))?;
    Ok(ok(record.summary()))
}

async fn download(
    State(state): State<ApiState>,
    Path(path): Path<DownloadPath>,
) -> std::result::Result<Response, ApiError> {
    let id = parse_job_id(&path.job_id)?;
    let record = state
        .jobs
        .get(&id)
        .ok_or_else(|| ApiError::not_found("File not found or expired."))?;
    if record.state != JobState::Complete {
        return Err(ApiError::conflict(format!(
            "job is not complete: {}",
            record.status
        )));
    }
    let table = match path.kind.as_str() {
        "alerts" => record.alerts,
        "audit" => record.audit,
        other => return Err(ApiError::not_found(format!("unknown report kind: {other}"))),
    };
    let Some(body) = table else {
        return Err(ApiError::not_found(format!(
            "No {} data available.",
            path.kind
        )));
    };

    let disposition = format!("attachment; filename=new_relic_{}.csv", path.kind);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

fn start_job(
    state: &ApiState,
    request: RunRequest,
) -> std::result::Result<(StatusCode, Json<ApiResponse<JobCreated>>), ApiError> {
    let today = Local::now().date_naive();
    let range = resolve_date_range(
        request.start_date.as_deref(),
        request.end_date.as_deref(),
        today,
        state.config.report.lookback_days,
    )?;
    let account_id = request.account_id.as_ref().map(AccountIdInput::as_text);
    let credentials = Credentials::from_parts(request.api_key.as_deref(), account_id.as_deref())?;

    let transport = state.transports.connect(&credentials.api_key)?;
    let handle = state.jobs.create().map_err(|error| {
        warn!("rejecting report job: {error}");
        ApiError::from(error)
    })?;
    let job_id = handle.id();
    info!(
        %job_id,
        account_id = credentials.account_id,
        start = %range.start,
        end = %range.end,
        "report job accepted"
    );
    spawn_report_job(
        handle,
        transport,
        state.config.fetch_settings(),
        ReportRequest {
            account_id: credentials.account_id,
            range,
        },
    );

    Ok((
        StatusCode::ACCEPTED,
        ok(JobCreated {
            job_id,
            status_url: format!("/v1/jobs/{job_id}"),
        }),
    ))
}

fn parse_job_id(raw: &str) -> std::result::Result<JobId, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::not_found("Results not found or expired."))
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { ok: true, data })
}
