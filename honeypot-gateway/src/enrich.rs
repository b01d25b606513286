//! The Geo/Risk Enricher (component C2): a pure function from [`RawCapture`] to [`CanonicalEvent`],
//! parameterized by a [`GeoLookup`] and the risk rule tables. Never blocks on network and never
//! fails — a missing backend degrades the `geo` field, it never aborts enrichment.

use crate::event::{CanonicalEvent, RawCapture};
use crate::geo::{self, GeoLookup};
use crate::risk;

pub struct Enricher {
    geo_lookup: Box<dyn GeoLookup>,
}

impl Enricher {
    pub fn new(geo_lookup: Box<dyn GeoLookup>) -> Self {
        Self { geo_lookup }
    }

    /// Enriches a raw capture into a canonical event. `event_id` and `timestamp` are assigned by
    /// the caller (the bus, at the point of entry) so global ordering stays centralized there.
    pub fn enrich(&self, raw: RawCapture, event_id: u64, timestamp: time::OffsetDateTime) -> CanonicalEvent {
        let geo = geo::resolve(raw.source_ip, self.geo_lookup.as_ref());
        let risk_score = risk::score(raw.service, &raw.event_type, &raw.payload);
        let risk_level = risk::risk_level(risk_score);

        CanonicalEvent {
            event_id,
            timestamp,
            service: raw.service,
            event_type: raw.event_type.clone(),
            session_id: raw.session_id,
            source_ip: raw.source_ip,
            source_port: raw.source_port,
            geo,
            risk_score,
            risk_level,
            payload: raw.payload.clone(),
            raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, Payload, Service};
    use crate::geo::NullGeoLookup;
    use uuid::Uuid;

    #[test]
    fn enrich_is_pure_and_deterministic() {
        let enricher = Enricher::new(Box::new(NullGeoLookup));

        let raw = RawCapture {
            capture_id: Uuid::new_v4(),
            service: Service::Ssh,
            source_ip: "198.51.100.7".parse().unwrap(),
            source_port: 51234,
            started_at: time::OffsetDateTime::now_utc(),
            ended_at: None,
            session_id: Some(Uuid::new_v4()),
            event_type: EventType::AuthAttempt,
            payload: Payload {
                username: Some("admin".to_owned()),
                password: Some("admin".to_owned()),
                ..Default::default()
            },
        };

        let now = time::OffsetDateTime::now_utc();
        let a = enricher.enrich(raw.clone(), 1, now);
        let b = enricher.enrich(raw, 1, now);

        assert_eq!(a.risk_score, b.risk_score);
        assert_eq!(a.risk_score, 60);
        assert_eq!(a.event_id, 1);
    }
}
