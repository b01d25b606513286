//! [`Session`]: a logical grouping of canonical events sharing a `session_id`.
//!
//! A plain struct owned directly by its connection handler task rather than a global actor
//! tracking every live session for cross-connection queries: mutation is scoped to the owning
//! connection handler only, and nothing in the Query API needs to see a session before it
//! closes, so a shared actor would be unneeded machinery here.

use std::net::IpAddr;
use std::time::Instant;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::event::{Service, TranscriptEntry};

/// Why a session ended, recorded on the terminal `session_closed` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    PeerClosed,
    IdleTimeout,
    MaxDuration,
    MaxBytes,
    MaxEvents,
    ProtocolViolation,
    Shutdown,
    InternalError,
}

impl CloseCause {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseCause::PeerClosed => "peer_closed",
            CloseCause::IdleTimeout => "idle_timeout",
            CloseCause::MaxDuration => "max_duration",
            CloseCause::MaxBytes => "max_bytes",
            CloseCause::MaxEvents => "max_events",
            CloseCause::ProtocolViolation => "protocol_violation",
            CloseCause::Shutdown => "shutdown",
            CloseCause::InternalError => "internal_error",
        }
    }
}

/// Per-connection state accumulated across a session's lifetime.
pub struct Session {
    pub session_id: Uuid,
    pub service: Service,
    pub source_ip: IpAddr,
    pub source_port: u16,
    pub started_at: OffsetDateTime,
    started_instant: Instant,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub event_count: u32,
    pub authenticated: bool,
    pub transcript: Vec<TranscriptEntry>,
}

impl Session {
    pub fn new(service: Service, source_ip: IpAddr, source_port: u16) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            service,
            source_ip,
            source_port,
            started_at: OffsetDateTime::now_utc(),
            started_instant: Instant::now(),
            bytes_in: 0,
            bytes_out: 0,
            event_count: 0,
            authenticated: false,
            transcript: Vec::new(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_instant.elapsed()
    }

    /// Elapsed time in milliseconds, saturating rather than wrapping for sessions implausibly
    /// longer than `u64::MAX` milliseconds (~584 million years).
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Records a transcript entry for the terminal `session_closed` payload and bumps the
    /// per-session event counter used to enforce the max-events-per-session budget.
    pub fn record(&mut self, event_type: &str, data: serde_json::Value) {
        self.event_count += 1;
        self.transcript.push(TranscriptEntry {
            timestamp: OffsetDateTime::now_utc(),
            event_type: event_type.to_owned(),
            data,
        });
    }

    pub fn add_bytes_in(&mut self, n: u64) {
        self.bytes_in += n;
    }

    pub fn add_bytes_out(&mut self, n: u64) {
        self.bytes_out += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_has_fresh_transcript() {
        let session = Session::new(Service::Ssh, "127.0.0.1".parse().unwrap(), 4242);
        assert!(session.transcript.is_empty());
        assert_eq!(session.event_count, 0);
        assert!(!session.authenticated);
    }

    #[test]
    fn record_appends_and_counts() {
        let mut session = Session::new(Service::Telnet, "127.0.0.1".parse().unwrap(), 4242);
        session.record("auth_attempt", serde_json::json!({"username": "admin"}));
        session.record("command", serde_json::json!({"command": "ls"}));
        assert_eq!(session.event_count, 2);
        assert_eq!(session.transcript.len(), 2);
    }
}
