//! Core data types flowing through the pipeline: [`RawCapture`] emitted by emulators,
//! [`CanonicalEvent`] produced by the enricher, and the [`Session`] bookkeeping struct that
//! accumulates per-connection state until it is finalized.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A service an emulator impersonates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Ssh,
    Http,
    Telnet,
    Mqtt,
    Camera,
}

impl Service {
    pub fn as_str(self) -> &'static str {
        match self {
            Service::Ssh => "ssh",
            Service::Http => "http",
            Service::Telnet => "telnet",
            Service::Mqtt => "mqtt",
            Service::Camera => "camera",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of attacker-observable action a [`RawCapture`] records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ConnectionOpened,
    AuthAttempt,
    Command,
    HttpRequest,
    FileUpload,
    Disconnect,
    Probe,
    VideoAccess,
    SessionClosed,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ConnectionOpened => "connection_opened",
            EventType::AuthAttempt => "auth_attempt",
            EventType::Command => "command",
            EventType::HttpRequest => "http_request",
            EventType::FileUpload => "file_upload",
            EventType::Disconnect => "disconnect",
            EventType::Probe => "probe",
            EventType::VideoAccess => "video_access",
            EventType::SessionClosed => "session_closed",
            EventType::Error => "error",
        }
    }
}

/// Service-specific payload of a [`RawCapture`] / [`CanonicalEvent`].
///
/// One variant per shape described by the RawCapture → CanonicalEvent mapping. Kept as an
/// open-ended JSON value for fields that vary per emulator (headers, transcripts) while still
/// giving the common fields (`username`, `command`, …) a typed home the enricher can pattern
/// match on without re-parsing JSON.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Payload {
    pub username: Option<String>,
    pub password: Option<String>,
    pub command: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub query: Option<String>,
    pub headers: Option<Vec<(String, String)>>,
    pub user_agent: Option<String>,
    pub body_preview: Option<String>,
    pub body_size: Option<usize>,
    pub files: Option<Vec<FileUploadInfo>>,
    pub duration_ms: Option<u64>,
    pub authenticated: Option<bool>,
    pub cause: Option<String>,
    pub transcript: Option<Vec<TranscriptEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUploadInfo {
    pub sha256: String,
    pub original_filename: String,
    pub size: u64,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub event_type: String,
    pub data: serde_json::Value,
}

/// Produced by an emulator for every attacker-observable action. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCapture {
    pub capture_id: Uuid,
    pub service: Service,
    pub source_ip: IpAddr,
    pub source_port: u16,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub session_id: Option<Uuid>,
    pub event_type: EventType,
    pub payload: Payload,
}

/// Geolocation result attached by the enricher. Either a resolved location or an `error` reason
/// (private address, lookup miss, backend unavailable).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Geo {
    Resolved {
        country: String,
        country_code: String,
        city: Option<String>,
        latitude: f64,
        longitude: f64,
        accuracy_radius: Option<u16>,
    },
    Error {
        error: String,
    },
}

/// Deterministic risk bucket derived from `risk_score`. See [`crate::risk::risk_level`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Info,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Info => "info",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// The pipeline's central record after enrichment. `event_id` is assigned by the [`crate::bus::EventBus`]
/// at the point of entry and is globally unique and strictly increasing within the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    // NOTE: keep in sync with `capture_store::EventRecord` (see `capture_log.rs`'s mapping).
    pub event_id: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub service: Service,
    pub event_type: EventType,
    pub session_id: Option<Uuid>,
    pub source_ip: IpAddr,
    pub source_port: u16,
    pub geo: Geo,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub payload: Payload,
    pub raw: RawCapture,
}
