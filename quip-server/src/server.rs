use crate::config::Config;
use axum::{
    Json, Router,
    body::Body,
    extract::{
        DefaultBodyLimit, Multipart, Path, State,
        multipart::MultipartError,
        rejection::JsonRejection,
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use quip_core::{
    BlobStore, Clock, ContentService, CreateFileRequest, CreatePasteRequest, Entry, IdGenerator,
    MetadataStore, QuipError, Reaper, Result, ServiceLimits, StagedBlob, SystemClock, Ttl,
    download_name,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Room for the other paste fields on top of the content.
const JSON_OVERHEAD: u64 = 64 * 1024;

/// A content byte costs at most six bytes once JSON-escaped (`\u00XX`).
const JSON_ESCAPE_FACTOR: u64 = 6;

pub struct AppState {
    pub service: Arc<ContentService>,
    /// Prefix for link fields, without a trailing slash.
    pub base_url: String,
}

/// Everything the server and the sweep command need, wired to one data directory.
pub struct Components {
    pub service: Arc<ContentService>,
    pub reaper: Arc<Reaper>,
}

pub fn build_components(config: &Config, clock: Arc<dyn Clock>) -> Result<Components> {
    let blobs = Arc::new(BlobStore::new(config.storage.data_dir.clone())?);
    let metadata = Arc::new(MetadataStore::new(config.storage.db_path())?);

    let service = Arc::new(ContentService::new(
        blobs.clone(),
        metadata.clone(),
        IdGenerator::new()?,
        clock.clone(),
        ServiceLimits::from(&config.limits),
    ));
    let reaper = Arc::new(Reaper::new(
        metadata,
        blobs,
        clock,
        config.reaper.batch_size,
    ));

    Ok(Components { service, reaper })
}

pub fn router(state: Arc<AppState>) -> Router {
    let limits = state.service.limits();
    let upload_limit = body_limit(limits.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD));
    let paste_limit = body_limit(
        limits
            .max_paste_bytes
            .saturating_mul(JSON_ESCAPE_FACTOR)
            .saturating_add(JSON_OVERHEAD),
    );

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/file",
            post(upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/file/:id", get(download_file).delete(delete_file))
        .route("/api/file/:id/info", get(get_file_info))
        .route(
            "/api/paste",
            post(create_paste).layer(DefaultBodyLimit::max(paste_limit)),
        )
        .route("/api/paste/:id", get(get_paste).delete(delete_paste))
        .route("/api/paste/:id/raw", get(get_paste_raw))
        .route("/api/view/:id", get(view_entry))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn body_limit(bytes: u64) -> usize {
    usize::try_from(bytes).unwrap_or(usize::MAX)
}

pub async fn run_server(config: Config) -> Result<()> {
    let components = build_components(&config, Arc::new(SystemClock))?;

    let orphans = components
        .reaper
        .sweep_orphans(config.reaper.orphan_grace())
        .await?;
    if orphans > 0 {
        tracing::info!("Removed {} orphaned blobs at startup", orphans);
    }

    let reaper = components.reaper.clone().spawn(config.reaper.interval());

    let state = Arc::new(AppState {
        service: components.service,
        base_url: config.base_url(),
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!("Server listening on {}", config.server.bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    reaper.shutdown().await;
    served?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining connections");
}

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] QuipError);

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            QuipError::InvalidTtl(_) | QuipError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            QuipError::NotFoundOrExpired | QuipError::BlobNotFound(_) => StatusCode::NOT_FOUND,
            QuipError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self.0 {
            QuipError::BlobNotFound(_) => QuipError::NotFoundOrExpired.to_string(),
            e if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %e, "Request failed");
                "internal server error".to_string()
            }
            e => e.to_string(),
        };

        (status, Json(ErrorBody { message })).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn multipart_error(e: MultipartError, limit: u64) -> QuipError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        QuipError::PayloadTooLarge { limit }
    } else {
        QuipError::InvalidRequest(e.body_text())
    }
}

fn json_error(e: JsonRejection, limit: u64) -> QuipError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        QuipError::PayloadTooLarge { limit }
    } else {
        QuipError::InvalidRequest(e.body_text())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct FileResponse {
    #[serde(rename = "ID")]
    id: String,
    original_name: String,
    size: u64,
    content_type: String,
    downloads: u64,
    max_downloads: u64,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    #[serde(rename = "download")]
    download: String,
    #[serde(rename = "view")]
    view: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PasteResponse {
    #[serde(rename = "ID")]
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    language: String,
    title: String,
    views: u64,
    max_views: u64,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    #[serde(rename = "raw")]
    raw: String,
    #[serde(rename = "view")]
    view: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "Kind")]
enum ViewResponse {
    File(FileResponse),
    Paste(PasteResponse),
}

fn file_response(entry: &Entry, base_url: &str) -> Result<FileResponse> {
    let file = entry
        .as_file()
        .ok_or_else(|| QuipError::Internal(format!("entry {} is not a file", entry.id)))?;

    Ok(FileResponse {
        id: entry.id.clone(),
        original_name: file.original_name.clone(),
        size: file.size,
        content_type: file.content_type.clone(),
        downloads: entry.access_count,
        max_downloads: entry.max_access,
        created_at: entry.created_at,
        expires_at: entry.expires_at,
        download: format!("{}/api/file/{}", base_url, entry.id),
        view: format!("{}/api/view/{}", base_url, entry.id),
    })
}

/// View-limited pastes never carry their content here; only the raw endpoint spends a view.
fn paste_response(entry: &Entry, base_url: &str) -> Result<PasteResponse> {
    let paste = entry
        .as_paste()
        .ok_or_else(|| QuipError::Internal(format!("entry {} is not a paste", entry.id)))?;

    Ok(PasteResponse {
        id: entry.id.clone(),
        content: (entry.max_access == 0).then(|| paste.content.clone()),
        language: paste.language.clone(),
        title: paste.title.clone(),
        views: entry.access_count,
        max_views: entry.max_access,
        created_at: entry.created_at,
        expires_at: entry.expires_at,
        raw: format!("{}/api/paste/{}/raw", base_url, entry.id),
        view: format!("{}/api/view/{}", base_url, entry.id),
    })
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<FileResponse>)> {
    let mut form = CreateFileRequest::default();
    let mut staged: Option<StagedBlob> = None;

    let read = read_upload_form(&state.service, &mut multipart, &mut form, &mut staged).await;
    let staged = match (read, staged) {
        (Ok(()), Some(staged)) => staged,
        (Ok(()), None) => {
            return Err(QuipError::InvalidRequest("missing file field".to_string()).into());
        }
        (Err(e), Some(staged)) => {
            state.service.discard_staged(staged).await;
            return Err(e.into());
        }
        (Err(e), None) => return Err(e.into()),
    };

    let entry = state.service.commit_staged_file(form, staged).await?;
    Ok((StatusCode::CREATED, Json(file_response(&entry, &state.base_url)?)))
}

/// Collect the form fields, streaming the `file` part straight into the blob store.
///
/// A `ttl` that arrives before the file is checked before any bytes are written.
async fn read_upload_form(
    service: &ContentService,
    multipart: &mut Multipart,
    form: &mut CreateFileRequest,
    staged: &mut Option<StagedBlob>,
) -> Result<()> {
    let limit = service.limits().max_upload_bytes;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "ttl" => {
                form.ttl = field.text().await.map_err(|e| multipart_error(e, limit))?;
                form.ttl.parse::<Ttl>()?;
            }
            "max_downloads" => {
                let text = field.text().await.map_err(|e| multipart_error(e, limit))?;
                form.max_downloads = parse_limit(&text, "max_downloads")?;
            }
            "file" => {
                if staged.is_some() {
                    return Err(QuipError::InvalidRequest(
                        "only one file may be uploaded per request".to_string(),
                    ));
                }
                form.name = field.file_name().unwrap_or_default().to_string();
                form.content_type = field.content_type().unwrap_or_default().to_string();

                let body = field.map(|chunk| chunk.map_err(|e| multipart_error(e, limit)));
                *staged = Some(service.stage_blob(body).await?);
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown upload field");
            }
        }
    }

    Ok(())
}

fn parse_limit(text: &str, field: &str) -> Result<Option<u64>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse::<u64>()
        .map(Some)
        .map_err(|_| QuipError::InvalidRequest(format!("{} must be a non-negative integer", field)))
}

async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let download = state.service.open_file_download(&id).await?;
    let file = download
        .entry
        .as_file()
        .ok_or_else(|| QuipError::Internal(format!("entry {} is not a file", id)))?;

    let name = download_name(&file.original_name, state.service.clock().now());

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&file.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.size));
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&name));
    if let Ok(etag) = HeaderValue::from_str(&format!("\"{}\"", file.sha256)) {
        headers.insert(header::ETAG, etag);
    }

    Ok((StatusCode::OK, headers, Body::from_stream(download.reader)).into_response())
}

/// `attachment` with an ASCII fallback name plus the exact name in RFC 5987 form.
fn content_disposition(name: &str) -> HeaderValue {
    let fallback: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut encoded = String::with_capacity(name.len() * 3);
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }

    HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

async fn get_file_info(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<FileResponse>> {
    let entry = state.service.get_file_info(&id).await?;
    Ok(Json(file_response(&entry, &state.base_url)?))
}

async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.service.delete_file(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CreatePasteBody {
    content: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    ttl: String,
    #[serde(default)]
    max_views: Option<u64>,
}

async fn create_paste(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<CreatePasteBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<PasteResponse>)> {
    let Json(body) = body.map_err(|e| json_error(e, state.service.limits().max_paste_bytes))?;

    let entry = state
        .service
        .create_paste(CreatePasteRequest {
            content: body.content,
            language: body.language,
            title: body.title,
            ttl: body.ttl,
            max_views: body.max_views,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(paste_response(&entry, &state.base_url)?)))
}

async fn get_paste(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<PasteResponse>> {
    let entry = state.service.get_paste(&id).await?;
    Ok(Json(paste_response(&entry, &state.base_url)?))
}

async fn get_paste_raw(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let entry = state.service.get_paste_raw(&id).await?;
    let content = match entry.content {
        quip_core::EntryContent::Paste(paste) => paste.content,
        quip_core::EntryContent::File(_) => {
            return Err(QuipError::Internal(format!("entry {} is not a paste", id)).into());
        }
    };

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        content,
    )
        .into_response())
}

async fn delete_paste(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.service.delete_paste(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Resolve an id of either kind for the share page. Never counts an access.
async fn view_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ViewResponse>> {
    match state.service.get_paste(&id).await {
        Ok(entry) => {
            return Ok(Json(ViewResponse::Paste(paste_response(&entry, &state.base_url)?)));
        }
        Err(QuipError::NotFoundOrExpired) => {}
        Err(e) => return Err(e.into()),
    }

    let entry = state.service.get_file_info(&id).await?;
    Ok(Json(ViewResponse::File(file_response(&entry, &state.base_url)?)))
}
