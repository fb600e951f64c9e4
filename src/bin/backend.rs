#![forbid(unsafe_code)]

//! Axum backend for the media relay.
//!
//! `/api/jonell` runs the acquisition-and-relay pipeline for one source URL,
//! `/api/library` returns every entry recorded so far, and anything else is
//! served from the public web root.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State, rejection::QueryRejection},
    http::{Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use jonell_relay::{
    auth::SessionCookie,
    config::{SettingsOverrides, resolve_settings},
    library::{LibraryEntry, LibraryStore},
    pipeline::{AcquisitionRequest, Pipeline},
};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_LEVEL: &str = "info";
const PROCESS_FAILED: &str = "Error processing video";
const LIBRARY_FAILED: &str = "Error reading library";

#[derive(Debug, Parser)]
#[command(name = "backend", about = "Relays YouTube/TikTok audio to a public file host")]
struct BackendArgs {
    /// Port to listen on (overrides PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Address to bind (overrides HOST).
    #[arg(long)]
    host: Option<String>,
    /// Directory that receives downloads and the library file.
    #[arg(long)]
    work_dir: Option<PathBuf>,
    /// Directory served for non-API paths.
    #[arg(long)]
    www_root: Option<PathBuf>,
    /// Alternate `.env` file.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn into_overrides(self) -> SettingsOverrides {
        SettingsOverrides {
            port: self.port,
            host: self.host,
            work_dir: self.work_dir,
            www_root: self.www_root,
            env_path: self.env_file,
        }
    }
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/HOST")
}

/// Shared state injected into every handler.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    library: Arc<LibraryStore>,
    www_root: Arc<PathBuf>,
}

/// Failures leave the API as plain text; callers only ever see a generic
/// message while the cause goes to the log.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct MediaQuery {
    url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProcessedResponse {
    #[serde(rename = "Successfully")]
    successfully: LibraryEntry,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let settings = resolve_settings(BackendArgs::parse().into_overrides())?;
    let host = parse_host_arg(&settings.host)?;

    tokio::fs::create_dir_all(&settings.work_dir)
        .await
        .with_context(|| format!("creating {}", settings.work_dir.display()))?;
    let cookie = SessionCookie::load(&settings.cookies_path)?;
    let library = Arc::new(LibraryStore::new(&settings.library_path));
    let pipeline = Pipeline::from_settings(&settings, cookie, library.clone())
        .context("initializing relay pipeline")?;

    let state = AppState {
        pipeline: Arc::new(pipeline),
        library,
        www_root: Arc::new(settings.www_root.clone()),
    };

    let addr = SocketAddr::new(host, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(
        %addr,
        strategy = ?settings.fetch_strategy,
        large_file_host = settings.alt_host_url.as_deref().unwrap_or("disabled"),
        "server is running"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/jonell", get(process_media))
        .route("/api/library", get(get_library))
        .fallback(static_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still ends the process.
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn process_media(
    State(state): State<AppState>,
    query: Result<Query<MediaQuery>, QueryRejection>,
) -> ApiResult<Json<ProcessedResponse>> {
    let Query(query) = query.map_err(|err| {
        error!(error = %err, "rejected media query");
        ApiError::internal(PROCESS_FAILED)
    })?;
    let request = AcquisitionRequest::new(query.url.unwrap_or_default());
    let source_url = request.source_url.clone();
    match state.pipeline.run(request).await {
        Ok(entry) => Ok(Json(ProcessedResponse {
            successfully: entry,
        })),
        Err(err) => {
            error!(url = %source_url, error = ?err, "error processing video");
            Err(ApiError::internal(PROCESS_FAILED))
        }
    }
}

async fn get_library(State(state): State<AppState>) -> ApiResult<Json<Vec<LibraryEntry>>> {
    let library = state.library.clone();
    let loaded = tokio::task::spawn_blocking(move || library.load())
        .await
        .map_err(|err| {
            error!(error = %err, "library task failed");
            ApiError::internal(LIBRARY_FAILED)
        })?;
    loaded.map(Json).map_err(|err| {
        error!(error = ?err, "error reading library");
        ApiError::internal(LIBRARY_FAILED)
    })
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }

    match serve_www_path(&state.www_root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => stream_file(target.join("index.html")).await,
        Ok(_) => stream_file(target).await,
        Err(_) => Err(ApiError::not_found("file not found")),
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = mime.to_string().parse()
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}
