use crate::config::{ApiConfig, UploadConfig};
use crate::decoder::DECODER_VERSION;
use crate::error::{InputError, PipelineError};
use crate::keys::RemoteKey;
use crate::pipeline::{UploadPipeline, UploadRequest};
use crate::staging::StagingError;
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, Query, State},
    http::{HeaderValue, Method},
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use std::convert::Infallible;
use std::future::Future;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Headroom above the upload ceiling for multipart framing and text fields
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Owner used when identifiers are optional and none was sent
const ANONYMOUS_OWNER: &str = "anonymous";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: UploadPipeline,
    pub upload: UploadConfig,
}

/// Identifiers accepted on the query string
#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    #[serde(rename = "ownerID", alias = "userid")]
    pub owner_id: Option<String>,
    #[serde(rename = "artifactID", alias = "replayid")]
    pub artifact_id: Option<String>,
}

/// Owner and artifact ids gathered from the form and the query string
#[derive(Debug, Default)]
struct Identifiers {
    owner_id: Option<String>,
    artifact_id: Option<String>,
}

impl Identifiers {
    fn from_query(query: UploadQuery) -> Self {
        Self {
            owner_id: non_blank(query.owner_id),
            artifact_id: non_blank(query.artifact_id),
        }
    }

    fn is_complete(&self) -> bool {
        self.owner_id.is_some() && self.artifact_id.is_some()
    }

    /// Form fields win over the query string
    fn set_from_field(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "ownerID" | "userid" => &mut self.owner_id,
            "artifactID" | "replayid" => &mut self.artifact_id,
            _ => return false,
        };
        if let Some(value) = non_blank(Some(value)) {
            *slot = Some(value);
        }
        true
    }

    fn resolve(self, required: bool) -> Result<(String, String), InputError> {
        let owner_id = match self.owner_id {
            Some(id) => id,
            None if required => return Err(InputError::MissingIdentifier("ownerID")),
            None => ANONYMOUS_OWNER.to_string(),
        };
        let artifact_id = match self.artifact_id {
            Some(id) => id,
            None if required => return Err(InputError::MissingIdentifier("artifactID")),
            None => Uuid::new_v4().to_string(),
        };
        Ok((owner_id, artifact_id))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A file field read into memory because it came before the identifiers
struct BufferedFile {
    filename: String,
    chunks: Vec<Bytes>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        let methods = [
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ];
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(methods)
                .allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(methods)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    // Oversized files must reach the pipeline so they get a 413 from there
    let body_limit = usize::try_from(state.upload.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/upload", post(upload))
        .nest_service("/replays", ServeDir::new(&config.replays_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Landing page
async fn index() -> Html<&'static str> {
    Html("<h1>Replay Server</h1>")
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "replay-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "decoder_version": DECODER_VERSION,
        "store": state.pipeline.store_backend(),
    }))
}

/// Accept a replay upload and run it through the pipeline.
///
/// The file is streamed straight into staging when the identifiers are
/// already known. Otherwise it is buffered up to the size ceiling and
/// processed once the rest of the form has been read.
#[instrument(skip(state, query, multipart))]
async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<String, PipelineError> {
    let mut ids = Identifiers::from_query(query);
    let mut buffered: Option<BufferedFile> = None;
    let file_field = state.upload.file_field.as_str();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == file_field {
            if buffered.is_some() {
                return Err(InputError::DuplicateFile(name).into());
            }
            let filename = field
                .file_name()
                .map(str::to_string)
                .ok_or(InputError::MissingFilename)?;

            if ids.is_complete() {
                let (owner_id, artifact_id) = ids.resolve(state.upload.require_identifiers)?;
                let outcome = state
                    .pipeline
                    .process(UploadRequest {
                        owner_id,
                        artifact_id,
                        filename,
                        payload: Box::pin(field),
                    })
                    .await?;
                return Ok(response_body(outcome.response_key()));
            }

            debug!(field = %name, "File arrived before identifiers, buffering");
            let chunks = buffer_field(field, state.upload.max_upload_bytes).await?;
            buffered = Some(BufferedFile { filename, chunks });
            continue;
        }

        let value = field.text().await.map_err(multipart_error)?;
        if !ids.set_from_field(&name, value) {
            debug!(field = %name, "Ignoring unknown form field");
        }
    }

    let file = buffered.ok_or_else(|| InputError::MissingFile(file_field.to_string()))?;
    let (owner_id, artifact_id) = ids.resolve(state.upload.require_identifiers)?;

    let payload = futures::stream::iter(file.chunks.into_iter().map(Ok::<_, Infallible>));
    let outcome = state
        .pipeline
        .process(UploadRequest {
            owner_id,
            artifact_id,
            filename: file.filename,
            payload,
        })
        .await?;

    Ok(response_body(outcome.response_key()))
}

/// Read a file field into memory, refusing more than `limit` bytes
async fn buffer_field(mut field: Field<'_>, limit: u64) -> Result<Vec<Bytes>, PipelineError> {
    let mut chunks = Vec::new();
    let mut total: u64 = 0;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        total += chunk.len() as u64;
        if total > limit {
            return Err(StagingError::TooLarge { limit }.into());
        }
        chunks.push(chunk);
    }

    Ok(chunks)
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> InputError {
    InputError::Multipart(e.body_text())
}

fn response_body(key: Option<&RemoteKey>) -> String {
    key.map(ToString::to_string).unwrap_or_default()
}

/// Start the API server, serving until `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(
        address = %addr,
        replays_dir = %config.replays_dir.display(),
        "Starting replay relay API server"
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
