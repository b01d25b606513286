//! The Supervisor (component C6): binds every configured listener, wires the Event Bus and its
//! sinks, spawns every background task, and owns graceful shutdown.
//!
//! Each listener task races its accept loop against the shutdown signal, so `Supervisor::start`
//! is a flat bind-every-listener-then-register sequence with no plugin/token-cache/service
//! surface — a honeypot process has nothing of that kind to manage.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::Router;
use capture_store::DynCaptureStore;
use honeypot_task::{spawn_task, ChildTask, ShutdownHandle, ShutdownSignal};
use tokio::net::TcpListener;
use tracing::warn;

use crate::bus::EventBusBuilder;
use crate::capture_log::CaptureLogTask;
use crate::config::Config;
use crate::emulators::ssh::SshConfig;
use crate::emulators::{camera, http, mqtt, ssh, telnet};
use crate::enrich::Enricher;
use crate::geo::{GeoLookup, MaxMindGeoLookup, NullGeoLookup};
use crate::quarantine::Quarantine;
use crate::subscriber::{HubHandle, StatsPushTask, SubscriptionHubTask};
use crate::{http_api, AppState};

/// How long graceful shutdown waits for in-flight sessions to finalize (every listener stops
/// accepting immediately; this only bounds how long already-open sessions get to emit their
/// `session_closed`/shutdown event) before the process tears down the rest by force.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Why [`Supervisor::start`] failed. Kept distinct from a single `anyhow::Error` because `main`
/// maps each variant to a different process exit code.
pub enum StartError {
    /// The indexed store or quarantine directory could not be initialized.
    Storage(anyhow::Error),
    /// A configured listener address could not be bound.
    Bind(anyhow::Error),
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartError::Storage(error) => write!(f, "storage initialization failed: {error:#}"),
            StartError::Bind(error) => write!(f, "failed to bind a listener: {error:#}"),
        }
    }
}

/// Owns every background task and the one [`ShutdownHandle`] that cancels all of them.
pub struct Supervisor {
    tasks: Vec<ChildTask<anyhow::Result<()>>>,
    shutdown_handle: ShutdownHandle,
}

impl Supervisor {
    /// Initializes storage, wires the enrichment pipeline and its sinks, binds every listener
    /// `config` enables, and spawns all of it. Returns once everything is accepting connections.
    pub async fn start(config: Config) -> Result<(Self, AppState), StartError> {
        let config = Arc::new(config);

        let store: DynCaptureStore = Arc::new(
            capture_store_libsql::LibSqlCaptureStore::open(config.store_path.as_str())
                .await
                .map_err(StartError::Storage)?,
        );
        store.setup().await.map_err(StartError::Storage)?;

        let quarantine = Arc::new(
            Quarantine::open(config.quarantine_dir.as_std_path().to_owned())
                .await
                .map_err(StartError::Storage)?,
        );

        let geo_lookup = load_geo_lookup(config.geoip_db_path.as_deref());
        let enricher = Enricher::new(geo_lookup);

        let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();
        let mut tasks: Vec<ChildTask<anyhow::Result<()>>> = Vec::new();

        let mut bus_builder = EventBusBuilder::new(enricher, config.bus_queue_size);
        let capture_log_rx = bus_builder.register_durable("capture-log", config.bus_queue_size, Duration::from_millis(500));
        let hub_rx = bus_builder.register_best_effort("subscription-hub", config.subscriber_queue_size);
        let (bus, bus_task) = bus_builder.build();
        tasks.push(spawn_task(bus_task, shutdown_signal.clone()));

        let json_log_path = config.log_path.as_std_path().join("captures.jsonl");
        tasks.push(spawn_task(
            CaptureLogTask::new(capture_log_rx, Arc::clone(&store), json_log_path),
            shutdown_signal.clone(),
        ));

        let hub = HubHandle::new();
        tasks.push(spawn_task(SubscriptionHubTask::new(hub_rx, hub.clone()), shutdown_signal.clone()));
        tasks.push(spawn_task(StatsPushTask::new(Arc::clone(&store), hub.clone()), shutdown_signal.clone()));

        let state = AppState {
            config: Arc::clone(&config),
            bus: bus.clone(),
            store: Arc::clone(&store),
            hub,
            quarantine,
            shutdown_signal: shutdown_signal.clone(),
        };

        if let Some(port) = config.ssh_port {
            let listener = bind(config.bind_addr, port).await.map_err(StartError::Bind)?;
            let host_key = russh::keys::PrivateKey::random(&mut rand::thread_rng(), russh::keys::Algorithm::Ed25519)
                .map_err(|error| StartError::Bind(error.into()))?;
            let ssh_config = SshConfig {
                host_key,
                enable_shell: false,
            };
            let bus = bus.clone();
            let handler_shutdown = shutdown_signal.clone();
            let mut listener_shutdown = shutdown_signal.clone();
            tasks.push(ChildTask::spawn(async move {
                tokio::select! {
                    result = ssh::serve(listener, ssh_config, bus, handler_shutdown) => result,
                    _ = listener_shutdown.wait() => Ok(()),
                }
            }));
        }

        if let Some(port) = config.telnet_port {
            let listener = bind(config.bind_addr, port).await.map_err(StartError::Bind)?;
            let bus = bus.clone();
            let session_shutdown = shutdown_signal.clone();
            let mut listener_shutdown = shutdown_signal.clone();
            tasks.push(ChildTask::spawn(async move {
                tokio::select! {
                    result = telnet::serve(listener, bus, session_shutdown) => result,
                    _ = listener_shutdown.wait() => Ok(()),
                }
            }));
        }

        if let Some(port) = config.mqtt_port {
            let listener = bind(config.bind_addr, port).await.map_err(StartError::Bind)?;
            let bus = bus.clone();
            let mut listener_shutdown = shutdown_signal.clone();
            tasks.push(ChildTask::spawn(async move {
                tokio::select! {
                    result = mqtt::serve(listener, bus) => result,
                    _ = listener_shutdown.wait() => Ok(()),
                }
            }));
        }

        if let Some(port) = config.http_port {
            let listener = bind(config.bind_addr, port).await.map_err(StartError::Bind)?;
            let router = with_request_timeout(http::router(state.clone()), config.session_max_duration);
            let shutdown = shutdown_signal.clone();
            tasks.push(ChildTask::spawn(serve_with_connect_info(listener, router, shutdown)));
        }

        if let Some(port) = config.camera_port {
            let listener = bind(config.bind_addr, port).await.map_err(StartError::Bind)?;
            let router = with_request_timeout(camera::router(state.clone()), config.session_max_duration);
            let shutdown = shutdown_signal.clone();
            tasks.push(ChildTask::spawn(serve_with_connect_info(listener, router, shutdown)));
        }

        {
            let listener = bind(config.bind_addr, config.api_port).await.map_err(StartError::Bind)?;
            let router = http_api::make_router(state.clone());
            let shutdown = shutdown_signal.clone();
            tasks.push(ChildTask::spawn(serve_plain(listener, router, shutdown)));
        }

        Ok((Self { tasks, shutdown_handle }, state))
    }

    /// Signals every task to stop, waits up to [`SHUTDOWN_GRACE_PERIOD`] for them to finish
    /// finalizing in-flight sessions, then aborts whatever is still running.
    pub async fn shutdown(self) {
        let Supervisor { tasks, shutdown_handle } = self;

        shutdown_handle.signal();

        tokio::select! {
            _ = shutdown_handle.all_closed() => {}
            _ = tokio::time::sleep(SHUTDOWN_GRACE_PERIOD) => {
                warn!("shutdown grace period elapsed with tasks still running, forcing exit");
            }
        }

        drop(tasks);
    }
}

fn load_geo_lookup(path: Option<&camino::Utf8Path>) -> Box<dyn GeoLookup> {
    match path {
        Some(path) => match MaxMindGeoLookup::open(path) {
            Ok(lookup) => Box::new(lookup),
            Err(error) => {
                warn!(%error, path = %path, "failed to load GeoIP database, geolocation disabled for this run");
                Box::new(NullGeoLookup)
            }
        },
        None => Box::new(NullGeoLookup),
    }
}

async fn bind(addr: IpAddr, port: u16) -> anyhow::Result<TcpListener> {
    let socket_addr = SocketAddr::new(addr, port);
    TcpListener::bind(socket_addr).await.with_context(|| format!("failed to bind {socket_addr}"))
}

/// Wraps an emulator router with a ceiling on how long any single request may run, matching the
/// session-level `max_duration` budget the raw-socket emulators enforce themselves via
/// `BudgetTracker`. HTTP/camera have no persistent session to track, so a per-request timeout is
/// the closest equivalent.
fn with_request_timeout(router: Router<()>, timeout: Duration) -> Router<()> {
    router.layer(
        tower::ServiceBuilder::new()
            .layer(axum::error_handling::HandleErrorLayer::new(|_: tower::BoxError| async {
                axum::http::StatusCode::REQUEST_TIMEOUT
            }))
            .layer(tower::timeout::TimeoutLayer::new(timeout)),
    )
}

/// Serves a router that uses `ConnectInfo<SocketAddr>` extractors (the emulator routers, which
/// need the real peer address rather than a `State`-threaded one).
async fn serve_with_connect_info(listener: TcpListener, router: Router<()>, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .map_err(Into::into)
}

/// Serves a router with no connect-info extractors (the Query API).
async fn serve_plain(listener: TcpListener, router: Router<()>, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .map_err(Into::into)
}
