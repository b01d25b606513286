//! The Capture Log (component C1): the durable sink registered with the [`crate::bus::EventBus`].
//!
//! Combines two independent representations of the same stream: an indexed [`DynCaptureStore`]
//! (queryable, used by the Query API) and a flat append-only JSON-lines file (the audit-of-record,
//! immune to any bug in the indexed store's query logic). A failure writing one never blocks or
//! skips the other; both are logged and the event is still counted as received even if one
//! representation drops it.

use std::path::PathBuf;

use capture_store::{DynCaptureStore, EventRecord};
use honeypot_task::{ShutdownSignal, Task};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

use crate::event::CanonicalEvent;

/// fsync cadence for the JSON log: either this many events have been buffered, or the channel
/// has gone idle, whichever comes first.
const FSYNC_BATCH: usize = 64;

pub struct CaptureLogTask {
    rx: mpsc::Receiver<CanonicalEvent>,
    store: DynCaptureStore,
    json_log_path: PathBuf,
}

impl CaptureLogTask {
    pub fn new(rx: mpsc::Receiver<CanonicalEvent>, store: DynCaptureStore, json_log_path: PathBuf) -> Self {
        Self { rx, store, json_log_path }
    }

    async fn open_log(&self) -> anyhow::Result<BufWriter<File>> {
        let file = OpenOptions::new().create(true).append(true).open(&self.json_log_path).await?;
        Ok(BufWriter::new(file))
    }

    async fn write_json_line(writer: &mut BufWriter<File>, event: &CanonicalEvent) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        Ok(())
    }

    fn to_record(event: &CanonicalEvent) -> anyhow::Result<EventRecord> {
        let country = event_geo_country(event);

        Ok(EventRecord {
            id: i64::try_from(event.event_id)?,
            timestamp: event.timestamp,
            service: event.service.as_str().to_owned(),
            event_type: event.event_type.as_str().to_owned(),
            session_id: event.session_id,
            source_ip: event.source_ip.to_string(),
            source_port: event.source_port,
            country,
            risk_score: i32::from(event.risk_score),
            risk_level: event.risk_level.as_str().to_owned(),
            event_data_json: serde_json::to_string(event)?,
        })
    }
}

fn event_geo_country(event: &CanonicalEvent) -> Option<String> {
    match &event.geo {
        crate::event::Geo::Resolved { country_code, .. } => Some(country_code.clone()),
        crate::event::Geo::Error { .. } => None,
    }
}

#[async_trait::async_trait]
impl Task for CaptureLogTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "capture log";

    async fn run(mut self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let mut writer = match self.open_log().await {
            Ok(w) => w,
            Err(error) => {
                tracing::error!(%error, path = %self.json_log_path.display(), "failed to open capture log file");
                return Err(error);
            }
        };

        let mut unflushed = 0usize;

        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    let Some(event) = event else { break };
                    self.handle(&mut writer, &event).await;
                    unflushed += 1;
                    if unflushed >= FSYNC_BATCH {
                        if let Err(error) = writer.flush().await {
                            tracing::error!(%error, "failed to flush capture log");
                        }
                        unflushed = 0;
                    }
                }
                _ = shutdown_signal.wait() => {
                    self.rx.close();
                    while let Ok(event) = self.rx.try_recv() {
                        self.handle(&mut writer, &event).await;
                    }
                    break;
                }
                // Idle: flush whatever's buffered so a slow trickle of events doesn't sit
                // unflushed indefinitely between fsyncs.
                _ = tokio::time::sleep(std::time::Duration::from_secs(2)), if unflushed > 0 => {
                    if let Err(error) = writer.flush().await {
                        tracing::error!(%error, "failed to flush capture log on idle");
                    }
                    unflushed = 0;
                }
            }
        }

        if let Err(error) = writer.flush().await {
            tracing::error!(%error, "failed final flush of capture log");
        }

        Ok(())
    }
}

impl CaptureLogTask {
    async fn handle(&self, writer: &mut BufWriter<File>, event: &CanonicalEvent) {
        if let Err(error) = Self::write_json_line(writer, event).await {
            tracing::error!(event_id = event.event_id, %error, "failed to append capture log line");
        }

        match Self::to_record(event) {
            Ok(record) => {
                if let Err(error) = self.store.insert_event(record).await {
                    tracing::error!(event_id = event.event_id, %error, "failed to insert event into capture store");
                }
            }
            Err(error) => {
                tracing::error!(event_id = event.event_id, %error, "failed to convert event into a store record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, Geo, Payload, RawCapture, RiskLevel, Service};
    use std::sync::Arc;
    use uuid::Uuid;

    fn sample_event(id: u64) -> CanonicalEvent {
        CanonicalEvent {
            event_id: id,
            timestamp: time::OffsetDateTime::now_utc(),
            service: Service::Http,
            event_type: EventType::HttpRequest,
            session_id: None,
            source_ip: "203.0.113.5".parse().unwrap(),
            source_port: 443,
            geo: Geo::Error { error: "private".to_owned() },
            risk_score: 10,
            risk_level: RiskLevel::Low,
            payload: Payload::default(),
            raw: RawCapture {
                capture_id: Uuid::new_v4(),
                service: Service::Http,
                source_ip: "203.0.113.5".parse().unwrap(),
                source_port: 443,
                started_at: time::OffsetDateTime::now_utc(),
                ended_at: None,
                session_id: None,
                event_type: EventType::HttpRequest,
                payload: Payload::default(),
            },
        }
    }

    struct NullStore;

    #[async_trait::async_trait]
    impl capture_store::CaptureStore for NullStore {
        async fn setup(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn insert_event(&self, _record: EventRecord) -> anyhow::Result<()> {
            Ok(())
        }
        async fn list_events(&self, _filter: capture_store::EventFilter) -> anyhow::Result<(Vec<EventRecord>, u64)> {
            Ok((Vec::new(), 0))
        }
        async fn stats(&self, _now: time::OffsetDateTime) -> anyhow::Result<capture_store::Stats> {
            unimplemented!()
        }
        async fn insert_file_capture(&self, _record: capture_store::FileCaptureRecord) -> anyhow::Result<()> {
            Ok(())
        }
        async fn list_file_captures(&self) -> anyhow::Result<Vec<capture_store::FileCaptureRecord>> {
            Ok(Vec::new())
        }
        async fn get_file_capture(&self, _sha256: &str) -> anyhow::Result<Option<capture_store::FileCaptureRecord>> {
            Ok(None)
        }
    }

    #[test]
    fn record_conversion_preserves_indexed_fields() {
        let event = sample_event(42);
        let record = CaptureLogTask::to_record(&event).unwrap();
        assert_eq!(record.id, 42);
        assert_eq!(record.service, "http");
        assert_eq!(record.risk_score, 10);
    }

    #[tokio::test]
    async fn drains_queue_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("captures.jsonl");
        let (tx, rx) = mpsc::channel(8);
        let task = CaptureLogTask::new(rx, Arc::new(NullStore), log_path.clone());

        let (shutdown_handle, shutdown_signal) = honeypot_task::ShutdownHandle::new();
        let join = tokio::spawn(task.run(shutdown_signal));

        tx.send(sample_event(1)).await.unwrap();
        tx.send(sample_event(2)).await.unwrap();
        drop(tx);
        shutdown_handle.signal();

        join.await.unwrap().unwrap();

        let contents = tokio::fs::read_to_string(&log_path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
