//! The Event Bus (component C3).
//!
//! An actor task — a struct owning all mutable state plus an `mpsc::Receiver`, paired with a
//! cloneable handle wrapping the `mpsc::Sender` — that receives [`RawCapture`]s from every
//! emulator, assigns the single, globally-increasing `event_id`, enriches, and fans the
//! resulting [`CanonicalEvent`] out to every registered sink.
//!
//! Sinks never observe each other and never block each other: a saturated durable sink blocks its
//! producer up to a timeout before the event is dropped-with-warning; a saturated best-effort
//! sink is simply skipped for that publish. Neither policy ever blocks the bus's own input queue
//! beyond the per-sink timeout, and a slow sink can never stall a different sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use honeypot_task::{ShutdownSignal, Task};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::enrich::Enricher;
use crate::event::{CanonicalEvent, RawCapture};

/// How a sink's bounded queue behaves when full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// Block the publisher up to `timeout`, then drop the event and count it (Capture Log).
    Durable { timeout: Duration },
    /// Never block; drop immediately if the queue is full (Subscription Hub).
    BestEffort,
}

struct Sink {
    name: &'static str,
    tx: mpsc::Sender<CanonicalEvent>,
    policy: Backpressure,
}

/// Counters exposed for the health/diagnostics surface. Atomic so they can be read from any task
/// without contending with the bus's single-writer loop.
#[derive(Default)]
pub struct BusMetrics {
    pub published: AtomicU64,
    pub dropped: AtomicU64,
}

/// Send-only handle cloned into every emulator connection handler.
#[derive(Clone)]
pub struct BusHandle {
    tx: mpsc::Sender<RawCapture>,
    metrics: Arc<BusMetrics>,
}

impl BusHandle {
    /// Enqueues a raw capture onto the bus. This is the "enqueue onto the Bus (bounded wait)"
    /// suspension point from a connection handler's perspective; the bus's own input queue is
    /// sized generously (`BUS_QUEUE_SIZE`) so this normally returns immediately.
    pub async fn publish(&self, raw: RawCapture) {
        if self.tx.send(raw).await.is_err() {
            // The bus task has shut down; nothing left to do but drop.
            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn metrics(&self) -> &BusMetrics {
        &self.metrics
    }
}

/// Builder-ish registration handed to the Supervisor before the bus task is spawned.
pub struct EventBusBuilder {
    enricher: Enricher,
    queue_size: usize,
    sinks: Vec<Sink>,
}

impl EventBusBuilder {
    pub fn new(enricher: Enricher, queue_size: usize) -> Self {
        Self {
            enricher,
            queue_size,
            sinks: Vec::new(),
        }
    }

    /// Registers a durable sink (the Capture Log): full queue blocks the bus up to `timeout`
    /// before the event is dropped with a counted warning.
    pub fn register_durable(&mut self, name: &'static str, capacity: usize, timeout: Duration) -> mpsc::Receiver<CanonicalEvent> {
        let (tx, rx) = mpsc::channel(capacity);
        self.sinks.push(Sink {
            name,
            tx,
            policy: Backpressure::Durable { timeout },
        });
        rx
    }

    /// Registers a best-effort sink (the Subscription Hub): full queue drops for that sink only,
    /// never blocking the bus.
    pub fn register_best_effort(&mut self, name: &'static str, capacity: usize) -> mpsc::Receiver<CanonicalEvent> {
        let (tx, rx) = mpsc::channel(capacity);
        self.sinks.push(Sink {
            name,
            tx,
            policy: Backpressure::BestEffort,
        });
        rx
    }

    pub fn build(self) -> (BusHandle, EventBusTask) {
        let (tx, rx) = mpsc::channel(self.queue_size);
        let metrics = Arc::new(BusMetrics::default());

        let handle = BusHandle {
            tx,
            metrics: Arc::clone(&metrics),
        };

        let task = EventBusTask {
            rx,
            enricher: self.enricher,
            sinks: self.sinks,
            next_event_id: AtomicU64::new(1),
            metrics,
        };

        (handle, task)
    }
}

pub struct EventBusTask {
    rx: mpsc::Receiver<RawCapture>,
    enricher: Enricher,
    sinks: Vec<Sink>,
    next_event_id: AtomicU64,
    metrics: Arc<BusMetrics>,
}

impl EventBusTask {
    fn next_id(&self) -> u64 {
        self.next_event_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn dispatch(&self, event: CanonicalEvent) {
        self.metrics.published.fetch_add(1, Ordering::Relaxed);

        for sink in &self.sinks {
            match sink.policy {
                Backpressure::Durable { timeout } => {
                    match tokio::time::timeout(timeout, sink.tx.send(event.clone())).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) | Err(_) => {
                            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                            warn!(sink = sink.name, event_id = event.event_id, "dropped event: sink saturated");
                        }
                    }
                }
                Backpressure::BestEffort => {
                    if sink.tx.try_send(event.clone()).is_err() {
                        self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(sink = sink.name, event_id = event.event_id, "dropped event: sink saturated");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Task for EventBusTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "event bus";

    async fn run(mut self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        loop {
            tokio::select! {
                raw = self.rx.recv() => {
                    let Some(raw) = raw else {
                        break;
                    };
                    let event_id = self.next_id();
                    let timestamp = OffsetDateTime::now_utc();
                    let event = self.enricher.enrich(raw, event_id, timestamp);
                    self.dispatch(event).await;
                }
                _ = shutdown_signal.wait() => {
                    // Drain whatever producers already enqueued before stopping.
                    self.rx.close();
                    while let Some(raw) = self.rx.recv().await {
                        let event_id = self.next_id();
                        let timestamp = OffsetDateTime::now_utc();
                        let event = self.enricher.enrich(raw, event_id, timestamp);
                        self.dispatch(event).await;
                    }
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, Payload, Service};
    use crate::geo::NullGeoLookup;
    use uuid::Uuid;

    fn sample_raw() -> RawCapture {
        RawCapture {
            capture_id: Uuid::new_v4(),
            service: Service::Mqtt,
            source_ip: "203.0.113.9".parse().unwrap(),
            source_port: 1883,
            started_at: OffsetDateTime::now_utc(),
            ended_at: None,
            session_id: None,
            event_type: EventType::Probe,
            payload: Payload::default(),
        }
    }

    #[tokio::test]
    async fn event_ids_strictly_increase() {
        let enricher = Enricher::new(Box::new(NullGeoLookup));
        let mut builder = EventBusBuilder::new(enricher, 64);
        let mut rx = builder.register_durable("capture-log", 64, Duration::from_millis(500));
        let (handle, task) = builder.build();

        let (_shutdown_handle, shutdown_signal) = honeypot_task::ShutdownHandle::new();
        let join = tokio::spawn(task.run(shutdown_signal));

        for _ in 0..5 {
            handle.publish(sample_raw()).await;
        }
        drop(handle);

        let mut ids = Vec::new();
        while let Some(event) = rx.recv().await {
            ids.push(event.event_id);
        }

        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        join.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn best_effort_sink_never_blocks_bus() {
        let enricher = Enricher::new(Box::new(NullGeoLookup));
        let mut builder = EventBusBuilder::new(enricher, 64);
        // Subscriber sink with capacity 1 and nobody reading: it will saturate immediately.
        let _unread_rx = builder.register_best_effort("hub", 1);
        let mut capture_rx = builder.register_durable("capture-log", 64, Duration::from_millis(500));
        let (handle, task) = builder.build();

        let (_shutdown_handle, shutdown_signal) = honeypot_task::ShutdownHandle::new();
        let join = tokio::spawn(task.run(shutdown_signal));

        for _ in 0..10 {
            handle.publish(sample_raw()).await;
        }
        drop(handle);

        let mut count = 0;
        while capture_rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 10, "durable sink must still see every event");

        join.await.unwrap().unwrap();
    }
}
