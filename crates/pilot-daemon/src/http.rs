use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use pilot_proto::protocol::{ErrorResponse, PlayRequest, ReloadResponse, SeekRequest, Status};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::controller::Controller;
use crate::error::ControlError;
use crate::library::{self, Library};

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub library: Arc<RwLock<Library>>,
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let code = match &self {
            ControlError::NotFound(_) => StatusCode::NOT_FOUND,
            ControlError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            ControlError::Hardware(_) => StatusCode::SERVICE_UNAVAILABLE,
            ControlError::Backend(_) => StatusCode::BAD_GATEWAY,
        };
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (code, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Status>, ControlError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/play", post(play))
        .route("/api/pause", post(pause))
        .route("/api/resume", post(resume))
        .route("/api/stop", post(stop))
        .route("/api/seek", post(seek))
        .route("/api/turn_on", post(turn_on))
        .route("/api/turn_off", post(turn_off))
        .route("/api/files", get(files))
        .route("/api/reload", post(reload))
        .route("/api/download", get(download))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: AppState,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(state.controller.status().await)
}

async fn play(State(state): State<AppState>, Json(req): Json<PlayRequest>) -> ApiResult {
    info!("HTTP API: play {:?}", req.file);
    Ok(Json(state.controller.play(&req.file).await?))
}

async fn pause(State(state): State<AppState>) -> ApiResult {
    info!("HTTP API: pause");
    Ok(Json(state.controller.pause().await?))
}

async fn resume(State(state): State<AppState>) -> ApiResult {
    info!("HTTP API: resume");
    Ok(Json(state.controller.resume().await?))
}

async fn stop(State(state): State<AppState>) -> ApiResult {
    info!("HTTP API: stop");
    Ok(Json(state.controller.stop().await?))
}

async fn seek(State(state): State<AppState>, Json(req): Json<SeekRequest>) -> ApiResult {
    info!("HTTP API: seek {} ms", req.milliseconds);
    Ok(Json(state.controller.seek(req.milliseconds).await?))
}

async fn turn_on(State(state): State<AppState>) -> ApiResult {
    info!("HTTP API: turn on");
    Ok(Json(state.controller.turn_on().await?))
}

async fn turn_off(State(state): State<AppState>) -> ApiResult {
    info!("HTTP API: turn off");
    Ok(Json(state.controller.turn_off().await?))
}

/// File list with an entity tag; a matching `If-None-Match` gets 304.
async fn files(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let library = state.library.read().await;
    let etag = library.etag();

    let mut response = match headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        Some(seen) if seen.split(',').any(|t| t.trim() == etag || t.trim() == "*") => {
            StatusCode::NOT_MODIFIED.into_response()
        }
        _ => Json(library.files()).into_response(),
    };

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(etag) {
        headers.insert(ETAG, value);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

async fn reload(State(state): State<AppState>) -> Json<ReloadResponse> {
    let num_files = library::reload(&state.library).await;
    info!("HTTP API: reload, {} files", num_files);
    Json(ReloadResponse {
        num_files,
        status: state.controller.status().await,
    })
}

#[derive(Deserialize)]
struct DownloadQuery {
    file: String,
}

/// The media file itself, as an attachment.  Only library entries are
/// served; ranges are handled by `ServeFile`.
async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
    request: Request,
) -> Result<Response, ControlError> {
    let path = {
        let library = state.library.read().await;
        if !library.contains(&query.file) {
            return Err(ControlError::NotFound(query.file));
        }
        library.path_of(&query.file)
    };
    info!("HTTP API: download {}", query.file);

    let mut response = match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    };
    if response.status().is_success() {
        let name = query
            .file
            .rsplit('/')
            .next()
            .unwrap_or(&query.file)
            .replace('"', "'");
        let value = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", name))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
        response.headers_mut().insert(CONTENT_DISPOSITION, value);
    }
    Ok(response)
}
