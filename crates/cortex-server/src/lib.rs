//! HTTP/JSON API over a [`Brain`], consumed by the Cortex dashboard.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/status` | Component readiness |
//! | `POST` | `/api/process` | Start an ingestion run in the background |
//! | `GET`/`POST` | `/api/search` | Semantic search (`query`, `collection`, `limit`) |
//! | `GET`/`POST` | `/api/search/date` | Journal entries of a day (`date`, `limit`) |
//! | `GET`/`POST` | `/api/search/tag` | Chunks carrying a tag (`tag`, `collection`, `limit`) |
//! | `POST` | `/api/enhance` | LLM task on text (`content`, `task`) |
//! | `GET`  | `/api/notes/stats` | Stats of the last ingestion run |
//! | `GET`  | `/api/models` | Models available on the LLM backend |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Errors are `{ "error": "<message>", "code": "<code>" }` with codes
//! `empty_input`, `invalid_task`, `invalid_date`, `invalid_collection`,
//! `bad_request` (400), `already_running` (409), `llm_unavailable` (503),
//! `upstream_timeout` (504) and `internal` (500).

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use cortex_core::search::{parse_date, DEFAULT_LIMIT};
use cortex_core::{
    BackendError, Brain, Collection, EnhanceError, IndexError, NoteKind, QueryError, ScoredChunk,
    SearchOutcome, Synthesis, SystemStatus, Task,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub brain: Brain,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(handle_status))
        .route("/api/process", post(handle_process))
        .route("/api/search", get(handle_search_query).post(handle_search_json))
        .route("/api/search/date", get(handle_date_query).post(handle_date_json))
        .route("/api/search/tag", get(handle_tag_query).post(handle_tag_json))
        .route("/api/enhance", post(handle_enhance))
        .route("/api/notes/stats", get(handle_stats))
        .route("/api/models", get(handle_models))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `bind_addr` until Ctrl+C.
pub async fn serve(brain: Brain, bind_addr: &str) -> std::io::Result<()> {
    let app = router(AppState { brain });
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Cortex API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

// ============ Errors ============

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

/// Error response carrying an HTTP status and a machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!("{} ({}): {}", self.status, self.code, self.message);
        }
        let body = ErrorBody {
            error: self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<BackendError> for ApiError {
    fn from(e: BackendError) -> Self {
        let (status, code) = match e {
            BackendError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout"),
            BackendError::Unavailable(_) | BackendError::InvalidResponse(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "llm_unavailable")
            }
        };
        Self::new(status, code, e.to_string())
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::EmptyInput => Self::new(StatusCode::BAD_REQUEST, "empty_input", e.to_string()),
            QueryError::InvalidCollection(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_collection", e.to_string())
            }
            QueryError::InvalidDate(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_date", e.to_string())
            }
            QueryError::Backend(e) => e.into(),
            QueryError::EmptyReply => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "llm_unavailable", e.to_string())
            }
        }
    }
}

impl From<EnhanceError> for ApiError {
    fn from(e: EnhanceError) -> Self {
        match e {
            EnhanceError::EmptyInput => {
                Self::new(StatusCode::BAD_REQUEST, "empty_input", e.to_string())
            }
            EnhanceError::InvalidTask(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_task", e.to_string())
            }
            EnhanceError::Backend(e) => e.into(),
            EnhanceError::EmptyReply => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "llm_unavailable", e.to_string())
            }
        }
    }
}

impl From<IndexError> for ApiError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::AlreadyRunning => {
                Self::new(StatusCode::CONFLICT, "already_running", e.to_string())
            }
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::bad_request(e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::bad_request(e.body_text())
    }
}

// ============ Result items ============

/// One entry of a search response: a hit, or the synthesized lead item.
#[derive(Debug, Serialize)]
pub struct ResultItem {
    pub content: String,
    pub metadata: ResultMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct ResultMetadata {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_summary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<NoteKind>,
}

impl From<Synthesis> for ResultItem {
    fn from(s: Synthesis) -> Self {
        Self {
            content: s.text,
            metadata: ResultMetadata {
                title: s.title,
                journal_date: s.journal_date,
                tags: Vec::new(),
                is_summary: true,
                source_path: None,
                kind: None,
            },
            score: None,
        }
    }
}

impl From<ScoredChunk> for ResultItem {
    fn from(hit: ScoredChunk) -> Self {
        let is_summary = hit.chunk.is_summary();
        let meta = hit.chunk.metadata;
        Self {
            content: hit.chunk.text,
            metadata: ResultMetadata {
                title: meta.title,
                journal_date: meta.journal_date,
                tags: meta.tags.into_iter().collect(),
                is_summary,
                source_path: Some(meta.source_path.to_string_lossy().replace('\\', "/")),
                kind: Some(meta.note_kind),
            },
            score: Some(hit.score),
        }
    }
}

fn into_items(outcome: SearchOutcome) -> Vec<ResultItem> {
    outcome
        .synthesis
        .map(ResultItem::from)
        .into_iter()
        .chain(outcome.results.into_iter().map(ResultItem::from))
        .collect()
}

// ============ Handlers ============

async fn handle_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(state.brain.status().await)
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub started: bool,
}

/// Starts a background run. The body is optional; `{"force": true}` re-indexes everything.
async fn handle_process(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ProcessResponse>, ApiError> {
    let request: ProcessRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ProcessRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?
    };
    // The run continues in the background after the handle is dropped.
    let _handle = state.brain.start_processing(request.force)?;
    tracing::info!("ingestion started (force={})", request.force);
    Ok(Json(ProcessResponse { started: true }))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

async fn handle_search_query(
    State(state): State<AppState>,
    request: Result<Query<SearchRequest>, QueryRejection>,
) -> Result<Json<Vec<ResultItem>>, ApiError> {
    run_search(&state, request?.0).await
}

async fn handle_search_json(
    State(state): State<AppState>,
    request: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Vec<ResultItem>>, ApiError> {
    run_search(&state, request?.0).await
}

async fn run_search(
    state: &AppState,
    request: SearchRequest,
) -> Result<Json<Vec<ResultItem>>, ApiError> {
    let collection = match request.collection.as_deref() {
        Some(c) => c.parse()?,
        None => Collection::All,
    };
    let limit = request.limit.unwrap_or(DEFAULT_LIMIT);
    let outcome = state.brain.search(&request.query, collection, limit).await?;
    Ok(Json(into_items(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct DateRequest {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

async fn handle_date_query(
    State(state): State<AppState>,
    request: Result<Query<DateRequest>, QueryRejection>,
) -> Result<Json<Vec<ResultItem>>, ApiError> {
    run_date_search(&state, request?.0).await
}

async fn handle_date_json(
    State(state): State<AppState>,
    request: Result<Json<DateRequest>, JsonRejection>,
) -> Result<Json<Vec<ResultItem>>, ApiError> {
    run_date_search(&state, request?.0).await
}

async fn run_date_search(
    state: &AppState,
    request: DateRequest,
) -> Result<Json<Vec<ResultItem>>, ApiError> {
    let date = parse_date(&request.date)?;
    let limit = request.limit.unwrap_or(DEFAULT_LIMIT);
    let outcome = state.brain.search_by_date(date, limit).await?;
    Ok(Json(into_items(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct TagRequest {
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

async fn handle_tag_query(
    State(state): State<AppState>,
    request: Result<Query<TagRequest>, QueryRejection>,
) -> Result<Json<Vec<ResultItem>>, ApiError> {
    run_tag_search(&state, request?.0).await
}

async fn handle_tag_json(
    State(state): State<AppState>,
    request: Result<Json<TagRequest>, JsonRejection>,
) -> Result<Json<Vec<ResultItem>>, ApiError> {
    run_tag_search(&state, request?.0).await
}

async fn run_tag_search(
    state: &AppState,
    request: TagRequest,
) -> Result<Json<Vec<ResultItem>>, ApiError> {
    let collection = match request.collection.as_deref() {
        Some(c) => c.parse()?,
        None => Collection::All,
    };
    let limit = request.limit.unwrap_or(DEFAULT_LIMIT);
    let outcome = state.brain.search_by_tag(&request.tag, collection, limit).await?;
    Ok(Json(into_items(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct EnhanceRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub task: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnhanceResponse {
    pub response: String,
}

async fn handle_enhance(
    State(state): State<AppState>,
    request: Result<Json<EnhanceRequest>, JsonRejection>,
) -> Result<Json<EnhanceResponse>, ApiError> {
    let Json(request) = request?;
    let task = match request.task.as_deref() {
        Some(t) => t.parse()?,
        None => Task::default(),
    };
    let response = state.brain.enhance(&request.content, task).await?;
    Ok(Json(EnhanceResponse { response }))
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state.brain.stats();
    if !stats.has_run() {
        return Ok(Json(
            serde_json::json!({ "message": "No processing has been run yet" }),
        ));
    }
    serde_json::to_value(stats)
        .map(Json)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string()))
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
}

async fn handle_models(State(state): State<AppState>) -> Result<Json<ModelsResponse>, ApiError> {
    let models = state.brain.models().await?;
    Ok(Json(ModelsResponse { models }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use cortex_core::{Config, Embedder, Generator};

    use super::*;

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn model(&self) -> &str {
            "fake"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0, t.matches('a').count() as f32])
                .collect())
        }

        async fn ping(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    struct FakeGenerator {
        reply: Result<String, BackendError>,
        delay: Duration,
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        fn model(&self) -> &str {
            "fake"
        }

        async fn generate(&self, _prompt: &str) -> Result<String, BackendError> {
            tokio::time::sleep(self.delay).await;
            self.reply.clone()
        }

        async fn list_models(&self) -> Result<Vec<String>, BackendError> {
            Ok(vec!["fake".into()])
        }
    }

    fn state_with(notes: &Path, reply: Result<String, BackendError>) -> AppState {
        let mut config = Config::default();
        config.notes_root = Some(notes.to_string_lossy().into_owned());
        config.ollama.timeout_secs = 1;
        let generator = FakeGenerator {
            reply,
            delay: Duration::ZERO,
        };
        AppState {
            brain: Brain::new(config, Arc::new(FakeEmbedder), Arc::new(generator)),
        }
    }

    fn write_journal(notes: &Path) {
        let dir = notes.join("journals");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("2024_01_05.md"),
            "- Met with #Alice about [[Project X]]",
        )
        .unwrap();
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn enhance_rejects_empty_content() {
        let notes = tempfile::tempdir().unwrap();
        let state = state_with(notes.path(), Ok("unused".into()));
        let request = EnhanceRequest {
            content: "  ".into(),
            task: Some("summarize".into()),
        };
        let err = handle_enhance(State(state), Ok(Json(request)))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "empty_input");

        let body = body_json(err.into_response()).await;
        assert_eq!(body["code"], "empty_input");
        assert!(body["error"].as_str().unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn enhance_rejects_unknown_task() {
        let notes = tempfile::tempdir().unwrap();
        let state = state_with(notes.path(), Ok("unused".into()));
        let request = EnhanceRequest {
            content: "note".into(),
            task: Some("translate".into()),
        };
        let err = handle_enhance(State(state), Ok(Json(request)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_task");
    }

    #[tokio::test]
    async fn enhance_maps_backend_failures() {
        let notes = tempfile::tempdir().unwrap();
        let state = state_with(
            notes.path(),
            Err(BackendError::Unavailable("connection refused".into())),
        );
        let request = EnhanceRequest {
            content: "note".into(),
            task: None,
        };
        let err = handle_enhance(State(state), Ok(Json(request)))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "llm_unavailable");

        let timeout = ApiError::from(BackendError::Timeout(Duration::from_secs(1)));
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(timeout.code(), "upstream_timeout");
    }

    #[tokio::test]
    async fn enhance_returns_model_reply() {
        let notes = tempfile::tempdir().unwrap();
        let state = state_with(notes.path(), Ok(" Better note. ".into()));
        let request = EnhanceRequest {
            content: "note".into(),
            task: Some("enhance".into()),
        };
        let Json(response) = handle_enhance(State(state), Ok(Json(request)))
            .await
            .unwrap();
        assert_eq!(response.response, "Better note.");
    }

    #[tokio::test]
    async fn stats_before_any_run_is_a_message() {
        let notes = tempfile::tempdir().unwrap();
        let state = state_with(notes.path(), Ok("unused".into()));
        let Json(body) = handle_stats(State(state)).await.unwrap();
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn process_then_search_by_date() {
        let notes = tempfile::tempdir().unwrap();
        write_journal(notes.path());
        let state = state_with(notes.path(), Ok("You met Alice.".into()));

        state.brain.process_all(false).await.unwrap();
        let Json(stats) = handle_stats(State(state.clone())).await.unwrap();
        assert_eq!(stats["status"], "completed");
        assert_eq!(stats["journals_processed"], 1);

        let request = DateRequest {
            date: "2024-01-05".into(),
            limit: None,
        };
        let Json(items) = handle_date_json(State(state), Ok(Json(request)))
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].metadata.is_summary);
        assert_eq!(items[0].content, "You met Alice.");
        assert!(items[0].score.is_none());
        assert_eq!(items[1].metadata.tags, vec!["Alice".to_string()]);
        assert_eq!(items[1].score, Some(1.0));
        assert_eq!(
            items[1].metadata.source_path.as_deref(),
            Some("journals/2024_01_05.md")
        );
    }

    #[tokio::test]
    async fn tag_search_over_query_and_json() {
        let notes = tempfile::tempdir().unwrap();
        write_journal(notes.path());
        let state = state_with(notes.path(), Ok("unused".into()));
        state.brain.process_all(false).await.unwrap();

        let request = TagRequest {
            tag: "#alice".into(),
            collection: Some("journals".into()),
            limit: None,
        };
        let Json(items) = handle_tag_query(State(state.clone()), Ok(Query(request)))
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].metadata.journal_date, NaiveDate::from_ymd_opt(2024, 1, 5));
        assert_eq!(items[0].score, Some(1.0));

        let request = TagRequest {
            tag: "alice".into(),
            collection: Some("notes".into()),
            limit: None,
        };
        let Json(items) = handle_tag_json(State(state.clone()), Ok(Json(request)))
            .await
            .unwrap();
        assert!(items.is_empty());

        let request = TagRequest {
            tag: String::new(),
            collection: None,
            limit: None,
        };
        let err = handle_tag_json(State(state), Ok(Json(request)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "empty_input");
    }

    #[tokio::test]
    async fn bad_dates_and_collections_are_client_errors() {
        let notes = tempfile::tempdir().unwrap();
        let state = state_with(notes.path(), Ok("unused".into()));

        let request = DateRequest {
            date: "05/01/2024".into(),
            limit: None,
        };
        let err = handle_date_json(State(state.clone()), Ok(Json(request)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_date");

        let request = SearchRequest {
            query: "alice".into(),
            collection: Some("everything".into()),
            limit: None,
        };
        let err = handle_search_json(State(state.clone()), Ok(Json(request)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_collection");

        let request = SearchRequest {
            query: " ".into(),
            collection: None,
            limit: None,
        };
        let err = handle_search_json(State(state), Ok(Json(request)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "empty_input");
    }

    #[tokio::test]
    async fn concurrent_process_request_conflicts() {
        let notes = tempfile::tempdir().unwrap();
        write_journal(notes.path());
        let state = state_with(notes.path(), Ok("unused".into()));

        let Json(started) = handle_process(State(state.clone()), Bytes::new())
            .await
            .unwrap();
        assert!(started.started);

        let err = handle_process(State(state.clone()), Bytes::from_static(b"{\"force\":true}"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "already_running");

        let err = handle_process(State(state), Bytes::from_static(b"{not json"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_version() {
        let Json(health) = handle_health().await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }
}
