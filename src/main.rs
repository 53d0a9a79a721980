//! Patent Extractor - strategy-driven patent filing analysis server.

mod aggregate;
mod chunker;
mod config;
mod error;
mod gemini;
mod jobs;
mod pdf;
mod pipeline;
mod progress;
mod schema;
mod storage;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use config::Settings;
use error::ExtractError;
use gemini::GeminiClient;
use jobs::{JobProgress, JobStore};
use pipeline::{Analyzer, DocumentInput};
use progress::NoopProgress;
use schema::{AnalysisRecord, OfficeActionData};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use storage::{content_hash, BlobStore, GcsStore, MemoryStore};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    analyzer: Arc<Analyzer>,
    blobs: Arc<dyn BlobStore>,
    jobs: JobStore,
    analyses: Arc<RwLock<HashMap<String, AnalysisRecord>>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "patent_extractor=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();
    let http = reqwest::Client::new();

    let gemini = GeminiClient::from_env(http.clone(), &settings)?;
    let analyzer = Arc::new(Analyzer::new(Arc::new(gemini), settings));

    let blobs: Arc<dyn BlobStore> = match GcsStore::from_env(http) {
        Some(gcs) => Arc::new(gcs),
        None => {
            info!("GCS not configured, using in-memory document storage");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState {
        analyzer,
        blobs,
        jobs: JobStore::new(),
        analyses: Arc::new(RwLock::new(HashMap::new())),
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze_document))
        .route("/analyses/:id", get(get_analysis))
        .route("/documents", post(submit_document))
        .route("/jobs/:id", get(get_job))
        .route("/office-actions/analyze", post(analyze_office_action))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024)) // 100MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Server listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Upload a patent filing and analyze it synchronously.
async fn analyze_document(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<AnalysisRecord>, (StatusCode, String)> {
    let (filename, file_data) = read_upload(multipart).await?;
    info!("Received file: {} ({} bytes)", filename, file_data.len());

    let hash = content_hash(&file_data);
    if let Err(e) = state
        .blobs
        .put_bytes(&blob_key(&hash), &file_data, "application/pdf")
        .await
    {
        error!("Failed to persist document: {}", e);
    }

    let metadata = state
        .analyzer
        .analyze(DocumentInput::Bytes(file_data), Arc::new(NoopProgress))
        .await
        .map_err(|e| {
            error!("Analysis failed: {}", e);
            (error_status(&e), e.to_string())
        })?;

    let record = AnalysisRecord::new(filename, hash, metadata);
    {
        let mut analyses = state.analyses.write().unwrap();
        analyses.insert(record.id.clone(), record.clone());
    }

    info!("Analysis complete: {}", record.id);
    Ok(Json(record))
}

/// Get a completed analysis by ID.
async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnalysisRecord>, StatusCode> {
    let analyses = state.analyses.read().unwrap();
    analyses
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(serde::Serialize)]
struct SubmitResponse {
    job_id: String,
}

/// Upload a patent filing for background analysis; poll the returned job.
async fn submit_document(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), (StatusCode, String)> {
    let (filename, file_data) = read_upload(multipart).await?;
    info!(
        "Queued file: {} ({} bytes) for background analysis",
        filename,
        file_data.len()
    );

    let hash = content_hash(&file_data);
    if let Err(e) = state
        .blobs
        .put_bytes(&blob_key(&hash), &file_data, "application/pdf")
        .await
    {
        error!("Failed to persist document: {}", e);
    }

    let job_id = state.jobs.create(&filename);
    let job_id_out = job_id.clone();

    tokio::spawn(async move {
        let progress = Arc::new(JobProgress::new(state.jobs.clone(), job_id.clone()));
        match state
            .analyzer
            .analyze(DocumentInput::Bytes(file_data), progress)
            .await
        {
            Ok(metadata) => {
                let record = AnalysisRecord::new(filename, hash, metadata);
                {
                    let mut analyses = state.analyses.write().unwrap();
                    analyses.insert(record.id.clone(), record.clone());
                }
                match serde_json::to_value(&record) {
                    Ok(value) => state.jobs.complete(&job_id, value),
                    Err(e) => state.jobs.fail(&job_id, &e.to_string()),
                }
            }
            Err(e) => {
                error!("Background analysis failed: {}", e);
                state.jobs.fail(&job_id, &e.to_string());
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse { job_id: job_id_out }),
    ))
}

/// Poll a background analysis job.
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::Job>, StatusCode> {
    state.jobs.get(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

/// Upload a USPTO Office Action and analyze it synchronously.
async fn analyze_office_action(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<OfficeActionData>, (StatusCode, String)> {
    let (filename, file_data) = read_upload(multipart).await?;
    info!(
        "Received office action: {} ({} bytes)",
        filename,
        file_data.len()
    );

    let data = state
        .analyzer
        .analyze_office_action(DocumentInput::Bytes(file_data), Arc::new(NoopProgress))
        .await
        .map_err(|e| {
            error!("Office action analysis failed: {}", e);
            (error_status(&e), e.to_string())
        })?;

    Ok(Json(data))
}

// ============================================================================
// Helper functions
// ============================================================================

/// Read the `file` field out of a multipart upload.
async fn read_upload(
    mut multipart: Multipart,
) -> Result<(String, Vec<u8>), (StatusCode, String)> {
    let mut filename = String::new();
    let mut file_data = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("document.pdf").to_string();
            file_data = field
                .bytes()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e)))?
                .to_vec();
            break;
        }
    }

    if file_data.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()));
    }
    Ok((filename, file_data))
}

fn blob_key(hash: &str) -> String {
    format!("documents/{}.pdf", hash)
}

/// Rate limiting maps to 503 so clients know the document itself is fine.
fn error_status(e: &ExtractError) -> StatusCode {
    match e {
        ExtractError::RateLimited => StatusCode::SERVICE_UNAVAILABLE,
        ExtractError::Document(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
