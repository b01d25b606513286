//! `GET /events?limit=&offset=&service=&from=&to=`

use axum::extract::{Query, State};
use axum::Json;
use capture_store::{EventFilter, EventRecord};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::HttpError;
use crate::AppState;

/// Ceiling enforced regardless of what the caller asks for, so a single request can never force
/// an unbounded scan of the store.
const MAX_LIMIT: u32 = 1000;
const DEFAULT_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub service: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub from: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub to: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub total: u64,
    pub events: Vec<EventRecord>,
}

pub async fn list_events(State(state): State<AppState>, Query(query): Query<EventsQuery>) -> Result<Json<EventsResponse>, HttpError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let filter = EventFilter {
        service: query.service,
        from: query.from,
        to: query.to,
        limit,
        offset: query.offset.unwrap_or(0),
    };

    let (events, total) = state
        .store
        .list_events(filter)
        .await
        .map_err(HttpError::internal().err())?;

    Ok(Json(EventsResponse { total, events }))
}
