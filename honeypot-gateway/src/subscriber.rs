//! The Subscription Hub (component C4): the best-effort sink registered with the
//! [`crate::bus::EventBus`], fanning events out to every live dashboard WebSocket connection.
//!
//! Each subscriber owns a bounded outbound queue; a full queue drops that one event for that one
//! subscriber and bumps its drop counter, never blocking the hub's dispatch loop or the bus
//! upstream of it. Consecutive drops or repeated send failures past a threshold evict the
//! subscriber and close its transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use capture_store::DynCaptureStore;
use honeypot_task::{ShutdownSignal, Task};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::event::CanonicalEvent;

/// Eviction threshold: this many consecutive dropped-for-backpressure events closes the
/// subscriber's connection.
const MAX_CONSECUTIVE_DROPS: u32 = 32;

/// How often [`StatsPushTask`] recomputes and broadcasts a `stats_update` message.
const STATS_PUSH_INTERVAL: Duration = Duration::from_secs(5);

/// A message pushed down a subscriber's outbound queue. Kept as an enum (rather than always
/// serializing to a single `HubMessage` type upfront) so the WebSocket layer can serialize lazily
/// and so `CanonicalEvent`s are never cloned into a wrapper just to be unwrapped again.
#[derive(Debug, Clone)]
pub enum HubMessage {
    Event(Arc<CanonicalEvent>),
    Welcome(WelcomeMessage),
    StatsUpdate(StatsSnapshot),
    Pong,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage<'a> {
    Welcome(&'a WelcomeMessage),
    Event(&'a CanonicalEvent),
    StatsUpdate(&'a StatsSnapshot),
    Pong,
}

impl HubMessage {
    pub fn to_outbound(&self) -> OutboundMessage<'_> {
        match self {
            HubMessage::Event(event) => OutboundMessage::Event(event),
            HubMessage::Welcome(welcome) => OutboundMessage::Welcome(welcome),
            HubMessage::StatsUpdate(stats) => OutboundMessage::StatsUpdate(stats),
            HubMessage::Pong => OutboundMessage::Pong,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WelcomeMessage {
    pub subscriber_id: u64,
    pub server_time: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub total_events: u64,
    pub events_per_service: HashMap<String, u64>,
}

struct Subscriber {
    tx: mpsc::Sender<HubMessage>,
    consecutive_drops: u32,
    dropped_total: Arc<AtomicU64>,
}

/// Registry of live subscribers plus the totals the dispatch loop updates as events flow through.
/// Guarded by a plain mutex: registration/eviction are infrequent compared to dispatch, and the
/// critical section never awaits (sends are `try_send`).
struct Registry {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
    /// Most recent snapshot pushed by [`StatsPushTask`], resent to every new subscriber right
    /// after its welcome so a freshly connected dashboard doesn't wait out a full
    /// [`STATS_PUSH_INTERVAL`] for its first numbers.
    last_stats: StatsSnapshot,
}

/// Handle cloned into every `/ws/events` connection handler and into the Supervisor for wiring.
#[derive(Clone)]
pub struct HubHandle {
    registry: Arc<Mutex<Registry>>,
}

/// Per-subscriber handle returned by [`HubHandle::register`], owned by the WebSocket connection
/// task for its lifetime.
pub struct SubscriberGuard {
    id: u64,
    registry: Arc<Mutex<Registry>>,
    pub rx: mpsc::Receiver<HubMessage>,
    pub dropped: Arc<AtomicU64>,
}

impl SubscriberGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.registry.lock().subscribers.remove(&self.id);
    }
}

impl HubHandle {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 1,
                subscribers: HashMap::new(),
                last_stats: StatsSnapshot::default(),
            })),
        }
    }

    /// Registers a new subscriber with the given outbound queue capacity (default 256 per the
    /// contract) and sends its `welcome` message immediately, followed by the most recently
    /// computed stats snapshot so the connect handshake always ends with current numbers rather
    /// than silence until the next periodic push.
    pub fn register(&self, queue_size: usize) -> SubscriberGuard {
        let (tx, rx) = mpsc::channel(queue_size);
        let dropped = Arc::new(AtomicU64::new(0));

        let (id, stats) = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.subscribers.insert(
                id,
                Subscriber {
                    tx: tx.clone(),
                    consecutive_drops: 0,
                    dropped_total: Arc::clone(&dropped),
                },
            );
            (id, registry.last_stats.clone())
        };

        let welcome = HubMessage::Welcome(WelcomeMessage {
            subscriber_id: id,
            server_time: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
        });
        let _ = tx.try_send(welcome);
        let _ = tx.try_send(HubMessage::StatsUpdate(stats));

        SubscriberGuard {
            id,
            registry: Arc::clone(&self.registry),
            rx,
            dropped,
        }
    }

    /// Answers a subscriber's `ping` with `pong` without going through the bus dispatch path.
    pub fn pong(&self, subscriber_id: u64) {
        if let Some(sub) = self.registry.lock().subscribers.get(&subscriber_id) {
            let _ = sub.tx.try_send(HubMessage::Pong);
        }
    }

    pub fn push_stats(&self, stats: StatsSnapshot) {
        let mut registry = self.registry.lock();
        for sub in registry.subscribers.values() {
            let _ = sub.tx.try_send(HubMessage::StatsUpdate(stats.clone()));
        }
        registry.last_stats = stats;
    }

    fn dispatch(&self, event: Arc<CanonicalEvent>) {
        let mut registry = self.registry.lock();
        let mut evicted = Vec::new();

        for (&id, sub) in registry.subscribers.iter_mut() {
            match sub.tx.try_send(HubMessage::Event(Arc::clone(&event))) {
                Ok(()) => sub.consecutive_drops = 0,
                Err(_) => {
                    sub.consecutive_drops += 1;
                    sub.dropped_total.fetch_add(1, Ordering::Relaxed);
                    if sub.consecutive_drops >= MAX_CONSECUTIVE_DROPS {
                        evicted.push(id);
                    }
                }
            }
        }

        for id in evicted {
            // Dropping the sender closes the subscriber's socket read loop on its next poll.
            registry.subscribers.remove(&id);
        }
    }
}

impl Default for HubHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// The dispatch task: drains the bus's best-effort sink channel and fans each event out to every
/// registered subscriber. Registration itself happens out-of-band via [`HubHandle::register`],
/// called directly from the `/ws/events` handler, not routed through this task.
pub struct SubscriptionHubTask {
    rx: mpsc::Receiver<CanonicalEvent>,
    hub: HubHandle,
}

impl SubscriptionHubTask {
    pub fn new(rx: mpsc::Receiver<CanonicalEvent>, hub: HubHandle) -> Self {
        Self { rx, hub }
    }
}

#[async_trait::async_trait]
impl Task for SubscriptionHubTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "subscription hub";

    async fn run(mut self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    let Some(event) = event else { break };
                    self.hub.dispatch(Arc::new(event));
                }
                _ = shutdown_signal.wait() => {
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Periodically recomputes aggregate stats from the capture store and broadcasts them to every
/// subscriber, independent of the bus's per-event dispatch path. A loop-with-sleep shape racing
/// a `shutdown_signal` branch so it cancels itself instead of depending on an outer supervising
/// future.
pub struct StatsPushTask {
    store: DynCaptureStore,
    hub: HubHandle,
}

impl StatsPushTask {
    pub fn new(store: DynCaptureStore, hub: HubHandle) -> Self {
        Self { store, hub }
    }
}

#[async_trait::async_trait]
impl Task for StatsPushTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "stats push";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(STATS_PUSH_INTERVAL) => {}
                _ = shutdown_signal.wait() => break,
            }

            match self.store.stats(time::OffsetDateTime::now_utc()).await {
                Ok(stats) => {
                    let snapshot = StatsSnapshot {
                        total_events: stats.total_events.max(0) as u64,
                        events_per_service: stats
                            .events_by_service
                            .into_iter()
                            .map(|(service, count)| (service, count.max(0) as u64))
                            .collect(),
                    };
                    self.hub.push_stats(snapshot);
                }
                Err(error) => {
                    tracing::warn!(%error, "failed to compute stats for periodic push");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, Geo, Payload, RawCapture, RiskLevel, Service};
    use uuid::Uuid;

    fn sample_event() -> CanonicalEvent {
        CanonicalEvent {
            event_id: 1,
            timestamp: time::OffsetDateTime::now_utc(),
            service: Service::Telnet,
            event_type: EventType::Probe,
            session_id: None,
            source_ip: "203.0.113.1".parse().unwrap(),
            source_port: 23,
            geo: Geo::Error { error: "private".to_owned() },
            risk_score: 0,
            risk_level: RiskLevel::Info,
            payload: Payload::default(),
            raw: RawCapture {
                capture_id: Uuid::new_v4(),
                service: Service::Telnet,
                source_ip: "203.0.113.1".parse().unwrap(),
                source_port: 23,
                started_at: time::OffsetDateTime::now_utc(),
                ended_at: None,
                session_id: None,
                event_type: EventType::Probe,
                payload: Payload::default(),
            },
        }
    }

    #[tokio::test]
    async fn new_subscriber_gets_welcome_first() {
        let hub = HubHandle::new();
        let mut guard = hub.register(8);
        let msg = guard.rx.recv().await.unwrap();
        assert!(matches!(msg, HubMessage::Welcome(_)));
    }

    #[tokio::test]
    async fn welcome_is_followed_by_a_stats_snapshot() {
        let hub = HubHandle::new();
        hub.push_stats(StatsSnapshot {
            total_events: 42,
            events_per_service: HashMap::new(),
        });

        let mut guard = hub.register(8);
        assert!(matches!(guard.rx.recv().await.unwrap(), HubMessage::Welcome(_)));
        match guard.rx.recv().await.unwrap() {
            HubMessage::StatsUpdate(snapshot) => assert_eq!(snapshot.total_events, 42),
            other => panic!("expected a stats snapshot right after welcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_after_consecutive_drops() {
        let hub = HubHandle::new();
        let mut guard = hub.register(1);
        // Drain the welcome message but never read again, simulating an unresponsive client.
        let _ = guard.rx.recv().await;

        for _ in 0..(MAX_CONSECUTIVE_DROPS + 5) {
            hub.dispatch(Arc::new(sample_event()));
        }

        assert!(guard.dropped.load(Ordering::Relaxed) >= MAX_CONSECUTIVE_DROPS as u64);
        assert!(hub.registry.lock().subscribers.is_empty());
    }

    #[tokio::test]
    async fn responsive_subscriber_receives_every_event() {
        let hub = HubHandle::new();
        let mut guard = hub.register(64);
        let _ = guard.rx.recv().await; // welcome

        for _ in 0..10 {
            hub.dispatch(Arc::new(sample_event()));
        }

        let mut count = 0;
        while let Ok(msg) = guard.rx.try_recv() {
            if matches!(msg, HubMessage::Event(_)) {
                count += 1;
            }
        }
        assert_eq!(count, 10);
    }
}
