//! `GET /captures` and `GET /captures/{sha256}/download`: metadata and raw bytes for files
//! uploaded through the HTTP emulator and written to the quarantine directory.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use capture_store::FileCaptureRecord;

use crate::error::HttpError;
use crate::AppState;

pub async fn list_captures(State(state): State<AppState>) -> Result<Json<Vec<FileCaptureRecord>>, HttpError> {
    let captures = state
        .store
        .list_file_captures()
        .await
        .map_err(HttpError::internal().err())?;
    Ok(Json(captures))
}

pub async fn download_capture(State(state): State<AppState>, Path(sha256): Path<String>) -> Result<impl IntoResponse, HttpError> {
    let record = state
        .store
        .get_file_capture(&sha256)
        .await
        .map_err(HttpError::internal().err())?
        .ok_or_else(|| HttpError::not_found().msg("no such capture"))?;

    let bytes = tokio::fs::read(&record.stored_path)
        .await
        .map_err(HttpError::internal().err())?;

    Ok((
        [
            (header::CONTENT_TYPE, record.content_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", record.original_filename),
            ),
        ],
        bytes,
    ))
}
