use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// One row of the indexed event store.
///
/// `event_data_json` carries the full canonical event (including `geo` and `payload`) so the
/// store never needs a bespoke column per service; indexed columns are pulled out for query
/// performance only and must stay consistent with what is embedded in the JSON blob.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub service: String,
    pub event_type: String,
    pub session_id: Option<Uuid>,
    pub source_ip: String,
    pub source_port: u16,
    pub country: Option<String>,
    pub risk_score: i32,
    pub risk_level: String,
    pub event_data_json: String,
}

/// Query filter for `list_events`.
///
/// `limit` is clamped by callers to the query API's documented maximum; the store itself does
/// not enforce a ceiling so it stays reusable outside the HTTP layer.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub service: Option<String>,
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
    pub limit: u32,
    pub offset: u32,
}

/// Aggregate statistics over the whole store, as of `now`.
#[derive(Clone, Debug, Serialize)]
pub struct Stats {
    pub total_events: i64,
    pub unique_sources_24h: i64,
    pub events_by_service: HashMap<String, i64>,
    pub events_per_hour: Vec<HourCount>,
    pub top_sources: Vec<SourceCount>,
}

#[derive(Clone, Debug, Serialize)]
pub struct HourCount {
    #[serde(with = "time::serde::rfc3339")]
    pub hour: OffsetDateTime,
    pub count: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct SourceCount {
    pub source_ip: String,
    pub count: i64,
}

/// Metadata for a file captured by the HTTP emulator's upload handling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileCaptureRecord {
    pub sha256: String,
    pub original_filename: String,
    pub size: u64,
    pub content_type: String,
    pub stored_path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

pub type DynCaptureStore = Arc<dyn CaptureStore>;

/// Storage-agnostic interface for the capture log's indexed representation.
///
/// This is the "convenience index" half of the capture log (see the append-only JSON log for
/// the audit-of-record half); a single logical writer inserts rows while the query API and the
/// stats endpoint read concurrently.
#[async_trait]
pub trait CaptureStore: Send + Sync {
    /// Performs initial setup (schema migration) required before using the store.
    async fn setup(&self) -> anyhow::Result<()>;

    /// Inserts a single event row. `record.id` is caller-assigned (the bus's global counter) and
    /// must already be unique and increasing.
    async fn insert_event(&self, record: EventRecord) -> anyhow::Result<()>;

    /// Lists events matching `filter`, most recent first, along with the total matching count
    /// ignoring `limit`/`offset`.
    async fn list_events(&self, filter: EventFilter) -> anyhow::Result<(Vec<EventRecord>, u64)>;

    /// Computes aggregate statistics as of `now`.
    async fn stats(&self, now: OffsetDateTime) -> anyhow::Result<Stats>;

    /// Records metadata for a stored file. A no-op if the sha256 already has a row (the
    /// quarantine directory itself enforces write-once on the bytes).
    async fn insert_file_capture(&self, record: FileCaptureRecord) -> anyhow::Result<()>;

    /// Lists all known file captures, most recently created first.
    async fn list_file_captures(&self) -> anyhow::Result<Vec<FileCaptureRecord>>;

    /// Looks up a single file capture by its content hash.
    async fn get_file_capture(&self, sha256: &str) -> anyhow::Result<Option<FileCaptureRecord>>;
}
