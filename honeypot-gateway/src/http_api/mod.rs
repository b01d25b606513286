//! The read-only Query API (component C7): JSON over HTTP, reading exclusively from the
//! Capture Log's indexed store and the Subscription Hub, never from a live emulator.

pub mod captures;
pub mod events;
pub mod stats;
pub mod ws;

use axum::Router;

use crate::AppState;

pub fn make_router(state: AppState) -> Router<()> {
    Router::new()
        .route("/events", axum::routing::get(events::list_events))
        .route("/captures", axum::routing::get(captures::list_captures))
        .route("/captures/{sha256}/download", axum::routing::get(captures::download_capture))
        .route("/stats", axum::routing::get(stats::get_stats))
        .route("/ws/events", axum::routing::get(ws::handler))
        .with_state(state)
}
