//! HTTP API.
//!
//! Exposes upload, document inspection, keyword/semantic search, question
//! answering and index maintenance as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Status, version, LLM availability, index counts |
//! | `POST` | `/upload` | Multipart upload (field `file`) |
//! | `GET`  | `/documents` | Indexed documents |
//! | `GET`  | `/documents/{filename}/info` | Metadata of one document |
//! | `GET`  | `/documents/{filename}/chunks` | Chunks in order |
//! | `GET`  | `/documents/{filename}/content` | Full extracted text |
//! | `GET`  | `/documents/{filename}/preview` | First `max_chars` characters (default 1000) |
//! | `GET`  | `/documents/{filename}/download` | Stored file as an attachment |
//! | `DELETE` | `/documents/{filename}` | Remove from index and disk |
//! | `GET`  | `/search` | Keyword search (`q`, `top_k`, `offset`) |
//! | `GET`  | `/semantic_search` | Semantic search (`q`, `top_k`, `offset`) |
//! | `GET`/`POST` | `/ask` | Grounded answer from the local LLM |
//! | `POST` | `/reindex` | Rebuild the index from the library |
//! | `GET`  | `/stats` | Index counters |
//! | `GET`  | `/llm/status` | Whether Ollama is reachable |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "document not found: a.pdf" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `validation_error` | 400 |
//! | `not_found` | 404 |
//! | `dimension_mismatch` | 409 |
//! | `unsupported_type` | 415 |
//! | `extraction_failed` | 422 |
//! | `internal` | 500 |
//! | `dependency_unavailable` | 503 |
//! | `timeout` | 504 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser UI served
//! from another port can call the API.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use refchat_core::models::{Chunk, DocumentMeta, IndexStats, SearchHit, SearchMode};
use refchat_core::prompt::{format_snippet, render_citation};
use refchat_core::retriever::SearchRequest;
use refchat_core::Error;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::ingest;
use crate::state::AppState;

const DEFAULT_PREVIEW_CHARS: usize = 1000;
const MAX_PREVIEW_CHARS: usize = 10_000;

/// Build state, bind `[server].bind` and serve until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::build(config).await?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("refchat listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    state.shutdown();
    Ok(())
}

/// The full API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Room for multipart framing on top of the file itself; the exact file
    // limit is enforced by the library.
    let body_limit = state.config.library.max_file_size_bytes() as usize + 64 * 1024;

    Router::new()
        .route("/health", get(handle_health))
        .route("/upload", post(handle_upload))
        .route("/documents", get(handle_list_documents))
        .route("/documents/{filename}", axum::routing::delete(handle_delete))
        .route("/documents/{filename}/info", get(handle_document_info))
        .route("/documents/{filename}/chunks", get(handle_document_chunks))
        .route("/documents/{filename}/content", get(handle_document_content))
        .route("/documents/{filename}/preview", get(handle_document_preview))
        .route("/documents/{filename}/download", get(handle_document_download))
        .route("/search", get(handle_keyword_search))
        .route("/semantic_search", get(handle_semantic_search))
        .route("/ask", get(handle_ask_get).post(handle_ask_post))
        .route("/reindex", post(handle_reindex))
        .route("/stats", get(handle_stats))
        .route("/llm/status", get(handle_llm_status))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
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

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, code = %self.code, message = %self.message, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::DimensionMismatch { .. } => StatusCode::CONFLICT,
            Error::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::ExtractionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        };
        AppError {
            status,
            code: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    Error::Validation(message.into()).into()
}

type ApiResult<T> = Result<Json<T>, AppError>;

// ============ Shared views ============

/// A ranked chunk as returned by search and ask.
#[derive(Serialize)]
struct SearchResult {
    chunk_id: u64,
    doc_id: u64,
    filename: String,
    chunk_index: usize,
    score: f64,
    text_snippet: String,
    citation: String,
}

impl SearchResult {
    fn from_hit(hit: &SearchHit, snippet_chars: usize) -> Self {
        Self {
            chunk_id: hit.chunk.chunk_id,
            doc_id: hit.chunk.doc_id,
            filename: hit.chunk.filename.clone(),
            chunk_index: hit.chunk.chunk_index,
            score: hit.score,
            text_snippet: format_snippet(&hit.chunk.text, snippet_chars),
            citation: render_citation(&hit.chunk.filename, hit.chunk.chunk_index),
        }
    }
}

/// Default `top_k` when absent; reject values outside `1..=max_top_k`.
fn resolve_top_k(state: &AppState, top_k: Option<usize>) -> Result<usize, AppError> {
    Ok(state.config.retrieval.resolve_top_k(top_k)?)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    llm_available: bool,
    embedding_model: String,
    documents: usize,
    chunks: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.retriever.index().stats();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        llm_available: state.llm.health().await,
        embedding_model: state.retriever.embedder().model_name().to_string(),
        documents: stats.total_documents,
        chunks: stats.total_chunks,
    })
}

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    filename: String,
    message: String,
    file_size: u64,
    chunks_created: usize,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<UploadResponse> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| bad_request("the file field has no filename"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
        upload = Some((filename, bytes.to_vec()));
        break;
    }
    let (filename, bytes) = upload.ok_or_else(|| bad_request("missing multipart field 'file'"))?;

    let outcome = ingest::upload_document(&state, &filename, bytes).await?;
    let verb = if outcome.replaced { "replaced" } else { "uploaded" };
    Ok(Json(UploadResponse {
        message: format!(
            "{} {} and indexed into {} chunks",
            outcome.filename, verb, outcome.meta.chunks_count
        ),
        filename: outcome.filename,
        file_size: outcome.file_size,
        chunks_created: outcome.meta.chunks_count,
    }))
}

// ============ Documents ============

#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<DocumentMeta>,
    total_count: usize,
}

async fn handle_list_documents(State(state): State<AppState>) -> Json<DocumentsResponse> {
    let documents = state.retriever.index().list_documents();
    Json(DocumentsResponse {
        total_count: documents.len(),
        documents,
    })
}

async fn handle_document_info(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<DocumentMeta> {
    Ok(Json(state.retriever.index().document(&filename)?))
}

#[derive(Serialize)]
struct ChunksResponse {
    filename: String,
    total_chunks: usize,
    chunks: Vec<Chunk>,
}

async fn handle_document_chunks(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<ChunksResponse> {
    let chunks = state.retriever.index().get_chunks(&filename)?;
    Ok(Json(ChunksResponse {
        filename,
        total_chunks: chunks.len(),
        chunks,
    }))
}

#[derive(Serialize)]
struct ContentResponse {
    filename: String,
    content: String,
    character_count: usize,
    word_count: usize,
}

async fn handle_document_content(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<ContentResponse> {
    let content = ingest::document_text(&state, &filename).await?;
    Ok(Json(ContentResponse {
        filename,
        character_count: content.chars().count(),
        word_count: refchat_core::chunk::word_count(&content),
        content,
    }))
}

#[derive(Deserialize)]
struct PreviewParams {
    max_chars: Option<usize>,
}

#[derive(Serialize)]
struct PreviewResponse {
    filename: String,
    preview: String,
    total_characters: usize,
    truncated: bool,
}

async fn handle_document_preview(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(params): Query<PreviewParams>,
) -> ApiResult<PreviewResponse> {
    let max_chars = params.max_chars.unwrap_or(DEFAULT_PREVIEW_CHARS);
    if !(1..=MAX_PREVIEW_CHARS).contains(&max_chars) {
        return Err(bad_request(format!(
            "max_chars must be between 1 and {}",
            MAX_PREVIEW_CHARS
        )));
    }
    let content = ingest::document_text(&state, &filename).await?;
    let total_characters = content.chars().count();
    Ok(Json(PreviewResponse {
        filename,
        preview: format_snippet(&content, max_chars),
        total_characters,
        truncated: total_characters > max_chars,
    }))
}

async fn handle_document_download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let (file_type, bytes) = ingest::document_file(&state, &filename).await?;
    let headers = [
        (header::CONTENT_TYPE, file_type.mime().to_string()),
        (header::CONTENT_DISPOSITION, attachment_disposition(&filename)),
    ];
    Ok((headers, bytes).into_response())
}

fn attachment_disposition(filename: &str) -> String {
    let escaped = filename.replace('\\', "\\\\").replace('"', "\\\"");
    format!("attachment; filename=\"{}\"", escaped)
}

#[derive(Serialize)]
struct DeleteResponse {
    message: String,
    chunks_removed: usize,
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<DeleteResponse> {
    let chunks_removed = ingest::delete_document(&state, &filename).await?;
    Ok(Json(DeleteResponse {
        message: format!("{} deleted", filename),
        chunks_removed,
    }))
}

// ============ Search ============

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    top_k: Option<usize>,
    offset: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    query: String,
    mode: SearchMode,
    top_k: usize,
    offset: usize,
    total_matches: usize,
    results: Vec<SearchResult>,
}

async fn handle_keyword_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<SearchResponse> {
    search(&state, SearchMode::Keyword, params).await
}

async fn handle_semantic_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<SearchResponse> {
    search(&state, SearchMode::Semantic, params).await
}

async fn search(state: &AppState, mode: SearchMode, params: SearchParams) -> ApiResult<SearchResponse> {
    let query = params.q.unwrap_or_default();
    let request = SearchRequest {
        query: query.clone(),
        mode,
        top_k: resolve_top_k(state, params.top_k)?,
        offset: params.offset.unwrap_or(0),
    };
    let page = state.retriever.search(&request).await?;
    let snippet_chars = state.config.retrieval.snippet_chars;
    Ok(Json(SearchResponse {
        query,
        mode,
        top_k: request.top_k,
        offset: request.offset,
        total_matches: page.total_matches,
        results: page
            .hits
            .iter()
            .map(|hit| SearchResult::from_hit(hit, snippet_chars))
            .collect(),
    }))
}

// ============ Ask ============

#[derive(Deserialize)]
struct AskParams {
    q: Option<String>,
    question: Option<String>,
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct AskResponse {
    question: String,
    answer: String,
    grounded: bool,
    context: Vec<SearchResult>,
}

async fn handle_ask_get(
    State(state): State<AppState>,
    Query(params): Query<AskParams>,
) -> ApiResult<AskResponse> {
    ask(&state, params).await
}

async fn handle_ask_post(
    State(state): State<AppState>,
    Json(params): Json<AskParams>,
) -> ApiResult<AskResponse> {
    ask(&state, params).await
}

async fn ask(state: &AppState, params: AskParams) -> ApiResult<AskResponse> {
    let question = params.question.or(params.q).unwrap_or_default();
    let top_k = resolve_top_k(state, params.top_k)?;
    let answer = state.retriever.answer(&question, top_k).await?;
    let snippet_chars = state.config.retrieval.snippet_chars;
    Ok(Json(AskResponse {
        question: answer.question,
        answer: answer.answer,
        grounded: answer.grounded,
        context: answer
            .context
            .iter()
            .map(|hit| SearchResult::from_hit(hit, snippet_chars))
            .collect(),
    }))
}

// ============ Maintenance ============

#[derive(Serialize)]
struct ReindexResponse {
    message: String,
    documents_processed: usize,
    chunks_created: usize,
    skipped: Vec<String>,
}

async fn handle_reindex(State(state): State<AppState>) -> ApiResult<ReindexResponse> {
    let report = ingest::reindex_library(&state).await?;
    Ok(Json(ReindexResponse {
        message: format!(
            "Reindexed {} documents into {} chunks",
            report.documents_processed, report.chunks_created
        ),
        documents_processed: report.documents_processed,
        chunks_created: report.chunks_created,
        skipped: report.skipped,
    }))
}

async fn handle_stats(State(state): State<AppState>) -> Json<IndexStats> {
    Json(state.retriever.index().stats())
}

#[derive(Serialize)]
struct LlmStatusResponse {
    available: bool,
    url: String,
    model: String,
}

async fn handle_llm_status(State(state): State<AppState>) -> Json<LlmStatusResponse> {
    Json(LlmStatusResponse {
        available: state.llm.health().await,
        url: state.llm.url().to_string(),
        model: state.config.llm.model.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: Error) -> (StatusCode, String) {
        let app: AppError = err.into();
        (app.status, app.code)
    }

    #[test]
    fn every_error_kind_has_a_distinct_status() {
        let cases = vec![
            Error::Validation("x".into()),
            Error::NotFound("x".into()),
            Error::DimensionMismatch {
                expected: 3,
                actual: 2,
            },
            Error::UnsupportedType("x".into()),
            Error::ExtractionFailed("x".into()),
            Error::Internal("x".into()),
            Error::DependencyUnavailable("x".into()),
            Error::Timeout("x".into()),
        ];
        let mut statuses: Vec<u16> = cases
            .into_iter()
            .map(|e| status_of(e).0.as_u16())
            .collect();
        statuses.sort_unstable();
        statuses.dedup();
        assert_eq!(statuses, vec![400, 404, 409, 415, 422, 500, 503, 504]);
    }

    #[test]
    fn attachment_filename_is_quoted() {
        assert_eq!(
            attachment_disposition("notes.txt"),
            "attachment; filename=\"notes.txt\""
        );
        assert_eq!(
            attachment_disposition("a\"b.txt"),
            "attachment; filename=\"a\\\"b.txt\""
        );
    }

    #[test]
    fn error_code_matches_kind() {
        assert_eq!(
            status_of(Error::NotFound("a.pdf".into())),
            (StatusCode::NOT_FOUND, "not_found".to_string())
        );
    }
}
