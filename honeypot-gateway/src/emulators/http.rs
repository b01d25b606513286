//! HTTP emulator: accepts any method on any path, captures the request, and answers from a fixed
//! path-based response table so automated scanners see plausible status codes. Multipart uploads
//! are streamed to the quarantine directory field by field.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Multipart, Request, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Router;

use capture_store::FileCaptureRecord;

use crate::event::{EventType, FileUploadInfo, Payload, RawCapture, Service};
use crate::AppState;

const LANDING_PAGE: &str = "<html><body><h1>It works!</h1></body></html>";

/// Caps how much of a non-file field or body is kept for the captured event, independent of the
/// session-wide max-bytes budget (a single oversized field shouldn't blow the transcript).
const BODY_PREVIEW_CAP: usize = 4096;

/// Hard ceiling on a non-multipart body read, so a client streaming forever can't exhaust memory
/// before the session-level budget tracker ever gets a chance to close the connection.
const MAX_BODY_READ: usize = 2 * 1024 * 1024;

pub fn router(state: AppState) -> Router<()> {
    Router::new().fallback(handle_any).with_state(state)
}

async fn handle_any(State(state): State<AppState>, ConnectInfo(peer): ConnectInfo<SocketAddr>, req: Request) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let path = uri.path().to_owned();
    let query = uri.query().map(ToOwned::to_owned);
    let user_agent = req
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned);
    let header_pairs: Vec<(String, String)> = req
        .headers()
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_owned())))
        .collect();
    let is_multipart = req
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let (files, body_preview, body_len) = if is_multipart {
        match Multipart::from_request(req, &state).await {
            Ok(multipart) => {
                let files = collect_multipart_files(multipart, &state).await;
                (files, None, 0)
            }
            Err(error) => {
                tracing::debug!(%error, "failed to parse multipart body");
                (Vec::new(), None, 0)
            }
        }
    } else {
        match axum::body::to_bytes(req.into_body(), MAX_BODY_READ).await {
            Ok(body) if body.is_empty() => (Vec::new(), None, 0),
            Ok(body) => {
                let preview = String::from_utf8_lossy(&body[..body.len().min(BODY_PREVIEW_CAP)]).into_owned();
                (Vec::new(), Some(preview), body.len())
            }
            Err(error) => {
                tracing::debug!(%error, "failed to read request body");
                (Vec::new(), None, 0)
            }
        }
    };

    state
        .bus
        .publish(RawCapture {
            capture_id: uuid::Uuid::new_v4(),
            service: Service::Http,
            source_ip: peer.ip(),
            source_port: peer.port(),
            started_at: time::OffsetDateTime::now_utc(),
            ended_at: Some(time::OffsetDateTime::now_utc()),
            session_id: None,
            event_type: EventType::HttpRequest,
            payload: Payload {
                method: Some(method.to_string()),
                path: Some(path.clone()),
                query,
                headers: Some(header_pairs),
                user_agent,
                body_preview,
                body_size: Some(body_len),
                files: if files.is_empty() { None } else { Some(files) },
                ..Default::default()
            },
        })
        .await;

    respond_for_path(&path)
}

async fn collect_multipart_files(mut multipart: Multipart, state: &AppState) -> Vec<FileUploadInfo> {
    let mut files = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(error) => {
                tracing::debug!(%error, "multipart read error");
                break;
            }
        };

        let Some(filename) = field.file_name().map(ToOwned::to_owned) else {
            // Non-file field: drained but not otherwise recorded here (it's bounded by the
            // outer body-size cap already applied at the connection level).
            let _ = field.bytes().await;
            continue;
        };

        let content_type = field.content_type().unwrap_or("application/octet-stream").to_owned();
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::debug!(%error, filename, "failed to read multipart file field");
                continue;
            }
        };

        match state.quarantine.store(&bytes, &filename).await {
            Ok(stored) => {
                let record = FileCaptureRecord {
                    sha256: stored.sha256.clone(),
                    original_filename: filename.clone(),
                    size: stored.size,
                    content_type: content_type.clone(),
                    stored_path: stored.stored_path.to_string_lossy().into_owned(),
                    created_at: time::OffsetDateTime::now_utc(),
                };
                if let Err(error) = state.store.insert_file_capture(record).await {
                    tracing::error!(%error, filename, "failed to index quarantined file");
                }

                files.push(FileUploadInfo {
                    sha256: stored.sha256,
                    original_filename: filename,
                    size: stored.size,
                    content_type,
                });
            }
            Err(error) => {
                tracing::error!(%error, filename, "failed to quarantine uploaded file");
            }
        }
    }

    files
}

fn respond_for_path(path: &str) -> Response {
    if path == "/" {
        return (StatusCode::OK, Html(LANDING_PAGE)).into_response();
    }

    const ADMIN_PATHS: &[&str] = &["/admin", "/admin/", "/wp-admin", "/administrator"];
    if ADMIN_PATHS.iter().any(|p| path.starts_with(p)) {
        return StatusCode::FORBIDDEN.into_response();
    }

    if path.ends_with(".php") {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    const STATIC_EXTENSIONS: &[&str] = &[".css", ".js", ".png", ".jpg", ".ico", ".map"];
    if STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return StatusCode::NOT_FOUND.into_response();
    }

    StatusCode::OK.into_response()
}
