//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload_csv` | Multipart upload (field `file`) that replaces the catalog |
//! | `POST` | `/ask_query` | JSON `{"query": "..."}`, answered as `{"response": "..."}` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Errors are a flat JSON object with a human-readable message:
//!
//! ```json
//! { "error": "No file part" }
//! ```
//!
//! Invalid input is `400`; a store or embedding failure during upload is
//! `502`. `/ask_query` only fails for a malformed request body: upstream
//! problems are folded into the `response` text.
//!
//! # CORS
//!
//! Allowed origins come from `[server].cors_origins`; a single `"*"` entry
//! permits any origin.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart,
        State,
    },
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::catalog::CatalogIndexer;
use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::error::CatalogError;
use crate::generative;
use crate::responder::Responder;
use crate::store::sqlite::SqliteStore;
use crate::store::ProductStore;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
///
/// Everything in here is built once at startup and only read afterwards.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ProductStore>,
    pub indexer: Arc<CatalogIndexer>,
    pub responder: Arc<Responder>,
}

impl AppState {
    /// Wire the SQLite store, embedding client, and generative client from
    /// configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let store: Arc<dyn ProductStore> =
            Arc::new(SqliteStore::new(pool, config.catalog.collection.clone()));
        let embedder = embedding::create_embedder(&config.embedding, &config.credentials)?;
        let generator = generative::create_generator(&config.generative, &config.credentials)?;

        let indexer = CatalogIndexer::new(store.clone(), embedder);
        let responder = Responder::new(
            store.clone(),
            generator,
            config.responder.clone(),
            config.catalog.fuzzy_limit,
        );

        Ok(Self {
            config: Arc::new(config.clone()),
            store,
            indexer: Arc::new(indexer),
            responder: Arc::new(responder),
        })
    }
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> Result<()> {
    let state = AppState::from_config(config).await?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("listening on http://{}", listener.local_addr()?);
    serve(listener, state).await
}

/// Serves the API on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/upload_csv", post(handle_upload_csv))
        .route("/ask_query", post(handle_ask_query))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::InvalidInput(message) => bad_request(message),
            CatalogError::UpstreamUnavailable(e) => {
                warn!(error = %format!("{:#}", e), "catalog upload failed upstream");
                AppError {
                    status: StatusCode::BAD_GATEWAY,
                    message: format!("Failed to index CSV data: {:#}", e),
                }
            }
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

// ============ POST /upload_csv ============

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    documents: usize,
}

/// Handler for `POST /upload_csv`.
///
/// Reads the multipart field named `file`, then hands its name and bytes to
/// the indexer. Other fields are ignored, and so is a `file` field without a
/// `filename` parameter since that is a plain form value, not an upload. A
/// request that is not multipart at all is reported the same way as one
/// without a `file` field.
async fn handle_upload_csv(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut multipart = multipart.map_err(|_| bad_request("No file part"))?;

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await.map_err(|e| bad_request(e.body_text()))?;
        upload = Some((file_name, bytes.to_vec()));
        break;
    }

    let (file_name, bytes) = upload.ok_or_else(|| bad_request("No file part"))?;
    info!(file = %file_name, bytes = bytes.len(), "received catalog upload");

    let report = state.indexer.index_catalog(&file_name, &bytes).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "CSV data indexed successfully.".to_string(),
            documents: report.documents_written,
        }),
    ))
}

// ============ POST /ask_query ============

#[derive(Serialize)]
struct AskResponse {
    response: String,
}

/// Handler for `POST /ask_query`.
///
/// Always answers `200` once the body holds a string `query`; see
/// [`Responder`] for how the answer is produced.
async fn handle_ask_query(
    State(state): State<AppState>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Json(body) = payload.map_err(|e| bad_request(e.body_text()))?;
    let query = body
        .get("query")
        .and_then(|q| q.as_str())
        .ok_or_else(|| bad_request("Request body must include a string 'query' field"))?;

    let answer = state.responder.answer(query).await;
    info!(source = ?answer.source, "answered query");

    Ok(Json(AskResponse {
        response: answer.text,
    }))
}
