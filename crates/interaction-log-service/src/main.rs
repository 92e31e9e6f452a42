use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use interaction_log_api::{
    AddInteractionRequest, InteractionLogApi, ListInteractionsRequest, API_CONTRACT_VERSION,
};
use interaction_log_core::{InteractionError, InteractionLog};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: InteractionLogApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "interaction-log-service")]
#[command(about = "Local HTTP service for learner interaction logs")]
struct Args {
    #[arg(long, env = "INTERACTION_LOG_DB", default_value = "./interaction_log.sqlite3")]
    db: PathBuf,
    #[arg(long, env = "INTERACTION_LOG_BIND", default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(InteractionError::Validation(message)) = err.downcast_ref::<InteractionError>()
        {
            tracing::debug!(%message, "rejected invalid interaction");
            return ServiceState::error(StatusCode::BAD_REQUEST, err.to_string());
        }
        tracing::error!(error = %format!("{err:#}"), "interaction log request failed");
        ServiceState::error(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
    }
}

impl ServiceState {
    fn error(status: StatusCode, message: impl Into<String>) -> ServiceError {
        ServiceError {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/openapi", get(openapi))
        .route("/interactions/", get(interactions_list).post(interactions_add))
        .route("/interactions", get(interactions_list).post(interactions_add))
        .with_state(state)
}

/// Log level selected by `-v` occurrences; `None` defers to `RUST_LOG`.
fn verbosity_level(verbose: u8) -> Option<&'static str> {
    match verbose {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbosity_level(verbose) {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let api = InteractionLogApi::new(args.db.clone());
    api.migrate(false)?;
    let state = ServiceState { api };

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, db = %args.db.display(), "interaction log service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn interactions_list(
    State(state): State<ServiceState>,
    Query(request): Query<ListInteractionsRequest>,
) -> Result<Json<Vec<InteractionLog>>, ServiceError> {
    let records = run_blocking(move || state.api.list_interactions(request)).await?;
    Ok(Json(records))
}

async fn interactions_add(
    State(state): State<ServiceState>,
    Json(request): Json<AddInteractionRequest>,
) -> Result<(StatusCode, Json<InteractionLog>), ServiceError> {
    let record = run_blocking(move || state.api.add_interaction(request)).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Run a synchronous api call off the async workers; SQLite may wait on `busy_timeout`.
async fn run_blocking<T, F>(task: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(task).await.context("blocking api task failed")?;
    Ok(result?)
}
