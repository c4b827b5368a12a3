// Document Manager - Web Server
// REST API with Axum over the document service

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use document_manager::logging::{init_tracing, DEFAULT_FILTER};
use document_manager::{
    AppConfig, CsvCodec, Document, DocumentDetail, DocumentItem, DocumentService, Event,
    ExportSummary, GatewayError, ImportError, ImportSummary, Phase, Preview, SqliteGateway,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
struct AppState {
    service: DocumentService<SqliteGateway>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    /// Phases that stayed committed when an import failed part-way
    #[serde(skip_serializing_if = "Vec::is_empty")]
    committed: Vec<Phase>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            committed: Vec::new(),
        }
    }
}

/// ImportError rendered as an HTTP response
struct ApiError(ImportError);

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ImportError::Path { .. } | ImportError::EmptyInput { .. } => StatusCode::BAD_REQUEST,
            ImportError::Parse { .. }
            | ImportError::Validation { .. }
            | ImportError::MissingHeaderReference { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ImportError::Persistence {
                source: GatewayError::NotFound { .. },
                ..
            } => StatusCode::NOT_FOUND,
            ImportError::Cancelled { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let body: ApiResponse<()> = ApiResponse {
            success: false,
            data: None,
            error: Some(self.0.to_string()),
            committed: self.0.committed_phases().to_vec(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Deserialize)]
struct FilePair {
    documents_path: PathBuf,
    items_path: PathBuf,
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Deserialize)]
struct EventFilter {
    entity_type: Option<String>,
    entity_id: Option<String>,
}

#[derive(Deserialize)]
struct EditedRecords {
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    items: Vec<DocumentItem>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/documents - All documents
async fn get_documents(State(state): State<AppState>) -> ApiResult<Vec<Document>> {
    Ok(Json(ApiResponse::ok(state.service.list_documents().await?)))
}

/// GET /api/documents/search?q= - Case-insensitive search
async fn search_documents(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<Document>> {
    Ok(Json(ApiResponse::ok(state.service.search_documents(&params.q).await?)))
}

/// GET /api/documents/:id - One document with its items
async fn get_document(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.service.document_detail(id).await {
        Ok(Some(detail)) => Json(ApiResponse::<DocumentDetail>::ok(detail)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()> {
                success: false,
                data: None,
                error: Some(format!("document {} not found", id)),
                committed: Vec::new(),
            }),
        )
            .into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

/// GET /api/documents/:id/items - Items of one document
async fn get_document_items(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Vec<DocumentItem>> {
    Ok(Json(ApiResponse::ok(state.service.list_items(id).await?)))
}

/// DELETE /api/documents/:id - Delete a document and its items
async fn delete_document(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<i64> {
    state.service.delete_document(id).await?;
    Ok(Json(ApiResponse::ok(id)))
}

/// PUT /api/documents - Save edited documents and items
async fn save_edited(State(state): State<AppState>, Json(edits): Json<EditedRecords>) -> ApiResult<usize> {
    let count = edits.documents.len() + edits.items.len();
    state.service.save_edited(edits.documents, edits.items).await?;
    Ok(Json(ApiResponse::ok(count)))
}

/// POST /api/preview - Read and flag rows, no writes
async fn preview(State(state): State<AppState>, Json(files): Json<FilePair>) -> ApiResult<Preview> {
    let preview = state
        .service
        .read_for_preview(&files.documents_path, &files.items_path)
        .await?;
    Ok(Json(ApiResponse::ok(preview)))
}

/// POST /api/import - Reconcile a file pair into the store
async fn import(State(state): State<AppState>, Json(files): Json<FilePair>) -> ApiResult<ImportSummary> {
    let summary = state
        .service
        .import_batch(&files.documents_path, &files.items_path)
        .await?;
    Ok(Json(ApiResponse::ok(summary)))
}

/// POST /api/export - Write the whole store to a file pair
async fn export(State(state): State<AppState>, Json(files): Json<FilePair>) -> ApiResult<ExportSummary> {
    let summary = state
        .service
        .export_all(&files.documents_path, &files.items_path)
        .await?;
    Ok(Json(ApiResponse::ok(summary)))
}

/// GET /api/events?entity_type=&entity_id= - Audit trail, newest first
async fn get_events(State(state): State<AppState>, Query(filter): Query<EventFilter>) -> ApiResult<Vec<Event>> {
    let events = match (filter.entity_type, filter.entity_id) {
        (Some(entity_type), Some(entity_id)) => state.service.entity_history(&entity_type, &entity_id).await?,
        _ => state.service.history().await?,
    };
    Ok(Json(ApiResponse::ok(events)))
}

// ============================================================================
// Main Server
// ============================================================================

/// Document Manager web server
#[derive(Parser, Debug)]
#[command(name = "document-server", version, about)]
struct Args {
    /// JSON settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the SQLite database
    #[arg(long)]
    db: Option<PathBuf>,

    /// Address to bind, e.g. 127.0.0.1:3000
    #[arg(long)]
    addr: Option<String>,
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/documents", get(get_documents).put(save_edited))
        .route("/documents/search", get(search_documents))
        .route("/documents/:id", get(get_document).delete(delete_document))
        .route("/documents/:id/items", get(get_document_items))
        .route("/preview", post(preview))
        .route("/import", post(import))
        .route("/export", post(export))
        .route("/events", get(get_events))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = args.db {
        config.database_path = db;
    }
    if let Some(addr) = args.addr {
        config.server_addr = addr;
    }

    init_tracing(config.log_format, &format!("{},tower_http=debug", DEFAULT_FILTER));

    println!("🌐 Document Manager - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let gateway = SqliteGateway::open(&config.database_path)
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
    println!("✓ Database opened: {:?}", config.database_path);
    println!("✓ Strategy: {}", config.strategy);

    let state = AppState {
        service: DocumentService::new(gateway, CsvCodec::polish(), config.strategy),
    };

    let listener = tokio::net::TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server_addr))?;

    println!("\n🚀 Server running on http://{}", config.server_addr);
    println!("   API: http://{}/api/documents", config.server_addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;

    Ok(())
}
