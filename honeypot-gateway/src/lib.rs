//! Multi-protocol honeypot platform: protocol emulators feed a shared enrichment pipeline whose
//! output is both durably logged and pushed live to dashboard subscribers, with a read-only HTTP
//! API over the durable log.

#[macro_use]
extern crate tracing;

pub mod bus;
pub mod capture_log;
pub mod config;
pub mod emulators;
pub mod enrich;
pub mod error;
pub mod event;
pub mod geo;
pub mod http_api;
pub mod log;
pub mod quarantine;
pub mod risk;
pub mod session;
pub mod subscriber;
pub mod supervisor;

use std::sync::Arc;

use capture_store::DynCaptureStore;
use honeypot_task::ShutdownSignal;

use crate::bus::BusHandle;
use crate::config::Config;
use crate::quarantine::Quarantine;
use crate::subscriber::HubHandle;

/// Cloneable handle bundling everything a connection handler or HTTP route needs. Cheap to
/// clone: every field is either an `Arc`, a channel handle, or `Copy` data.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub bus: BusHandle,
    pub store: DynCaptureStore,
    pub hub: HubHandle,
    pub quarantine: Arc<Quarantine>,
    pub shutdown_signal: ShutdownSignal,
}

pub const EXIT_OK: i32 = 0;
pub const EXIT_BIND_FAILURE: i32 = 1;
pub const EXIT_CONFIG_ERROR: i32 = 2;
pub const EXIT_STORAGE_INIT_FAILURE: i32 = 3;
