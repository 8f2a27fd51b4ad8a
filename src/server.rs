//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/status` | Retrieval store status |
//! | `POST` | `/search` | Ranked procedure passages for a query |
//! | `POST` | `/ingest` | Chunk and index one text document |
//! | `POST` | `/reviews` | Run a design change review |
//! | `POST` | `/ask` | Answer a question from the procedures |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_initialized` (503),
//! `infrastructure` (502, body also carries the partial `state`),
//! `model_error` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use qms_review_core::models::{SearchHit, StoreStatus, SynthesisResult};
use qms_review_core::state::ReviewState;
use qms_review_core::{RetrievalError, RetrievalStore, ReviewError};

use crate::config::Config;
use crate::history::{append, JsonlHistory, ReviewSink};
use crate::ingest::ingest_text;
use crate::llm::create_model;
use crate::orchestrator::{ReviewOrchestrator, ReviewOutcome};
use crate::procedure::{ProcedureAgent, ProcedureAnswer};

/// Shared state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<RetrievalStore>,
    pub orchestrator: Arc<ReviewOrchestrator>,
    pub procedures: Arc<ProcedureAgent>,
    pub history: Option<Arc<dyn ReviewSink>>,
}

impl AppState {
    /// Wire models, reviewers, and history from configuration around an
    /// existing store.
    pub fn from_config(config: &Config, store: Arc<RetrievalStore>) -> anyhow::Result<Self> {
        let orchestrator = ReviewOrchestrator::from_config(config, store.clone())?;
        let procedures = ProcedureAgent::new(
            store.clone(),
            create_model(&config.model, config.model.temperature)?,
            config.model.timeout(),
            config.retrieval.answer_passages,
        );
        let history: Option<Arc<dyn ReviewSink>> = match &config.history.path {
            Some(path) => Some(Arc::new(JsonlHistory::open(path)?)),
            None => None,
        };

        Ok(Self {
            config: Arc::new(config.clone()),
            store,
            orchestrator: Arc::new(orchestrator),
            procedures: Arc::new(procedures),
            history,
        })
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/search", post(handle_search))
        .route("/ingest", post(handle_ingest))
        .route("/reviews", post(handle_review))
        .route("/ask", post(handle_ask))
        .layer(cors)
        .with_state(state)
}

/// Serve on an already bound listener until the process is terminated.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Bind `[server].bind` and serve.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "HTTP server listening");
    println!("QMS review server listening on http://{}", bind_addr);
    serve(listener, state).await
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<serde_json::Value>,
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
    state: Option<serde_json::Value>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            state: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
            state: self.state,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn internal(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

fn retrieval_error(err: RetrievalError) -> AppError {
    match err {
        RetrievalError::NotInitialized => {
            AppError::new(StatusCode::SERVICE_UNAVAILABLE, "not_initialized", err.to_string())
        }
        RetrievalError::Embedding(_) => internal(err.to_string()),
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

// ============ GET /status ============

async fn handle_status(State(state): State<AppState>) -> Json<StoreStatus> {
    Json(state.store.status())
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let k = req.k.unwrap_or(state.config.retrieval.context_passages);
    let results = state
        .store
        .search(&req.query, k)
        .await
        .map_err(retrieval_error)?;
    Ok(Json(SearchResponse { results }))
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    source_id: String,
    text: String,
}

#[derive(Serialize)]
struct IngestResponse {
    chunks: usize,
    indexed: usize,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    if req.source_id.trim().is_empty() {
        return Err(bad_request("source_id must not be empty"));
    }
    let options = state.config.chunking.options();
    let (chunks, indexed) = ingest_text(&state.store, &options, &req.source_id, &req.text)
        .await
        .map_err(|e| internal(format!("{:#}", e)))?;
    Ok(Json(IngestResponse { chunks, indexed }))
}

// ============ POST /reviews ============

#[derive(Deserialize)]
struct ReviewRequest {
    description: String,
}

async fn handle_review(
    State(state): State<AppState>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<ReviewOutcome>, AppError> {
    if req.description.trim().is_empty() {
        return Err(bad_request("description must not be empty"));
    }

    match state.orchestrator.process_design_change(&req.description).await {
        Ok(outcome) => {
            record(&state, outcome.state.clone(), outcome.synthesis.clone()).await;
            Ok(Json(outcome))
        }
        Err(ReviewError::Infrastructure { message, state: review }) => {
            let mut err = AppError::new(StatusCode::BAD_GATEWAY, "infrastructure", message);
            err.state = serde_json::to_value(&*review).ok();
            record(&state, *review, None).await;
            Err(err)
        }
        Err(e) => Err(internal(e.to_string())),
    }
}

async fn record(state: &AppState, review: ReviewState, synthesis: Option<SynthesisResult>) {
    let Some(history) = state.history.clone() else {
        return;
    };
    let request_id = review.request_id().to_string();
    if let Err(e) = append(history, review, synthesis).await {
        warn!(request_id = %request_id, error = %e, "failed to record review history");
    }
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<ProcedureAnswer>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let answer = state
        .procedures
        .ask(&req.question)
        .await
        .map_err(|e| AppError::new(StatusCode::BAD_GATEWAY, "model_error", format!("{:#}", e)))?;
    Ok(Json(answer))
}
