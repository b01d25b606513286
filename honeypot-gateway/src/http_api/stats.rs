//! `GET /stats`: aggregate counters over the whole store, computed fresh on each request. The
//! push endpoint also periodically broadcasts a small subset of this via `stats_update` messages.

use axum::extract::State;
use axum::Json;
use capture_store::Stats;
use time::OffsetDateTime;

use crate::error::HttpError;
use crate::AppState;

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<Stats>, HttpError> {
    let stats = state
        .store
        .stats(OffsetDateTime::now_utc())
        .await
        .map_err(HttpError::internal().err())?;
    Ok(Json(stats))
}
