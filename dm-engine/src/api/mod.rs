//! Control server
//!
//! Request/response API over HTTP. Handlers hold nothing but a reference to
//! the shared [`BeatScheduler`]; every write is delegated to it, so
//! concurrent requests are serialized by the scheduler's own lock.
//!
//! | Method | Path      | Body            | Response        |
//! |--------|-----------|-----------------|-----------------|
//! | GET    | `/status` |                 | status document |
//! | POST   | `/start`  |                 | status document |
//! | POST   | `/stop`   |                 | status document |
//! | POST   | `/tempo`  | `{"bpm": <int>}`| status document |
//! | GET    | `/events` |                 | SSE stream      |
//! | GET    | `/health` |                 | health document |

pub mod error;
pub mod handlers;
pub mod server;
pub mod sse;

use crate::scheduler::BeatScheduler;
use crate::status::InstanceInfo;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use server::serve;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub scheduler: Arc<BeatScheduler>,
    pub info: Arc<InstanceInfo>,
    /// Ends open event streams so graceful shutdown can complete
    pub shutdown: CancellationToken,
}

impl AppContext {
    pub fn new(
        scheduler: Arc<BeatScheduler>,
        info: Arc<InstanceInfo>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            scheduler,
            info,
            shutdown,
        }
    }
}

/// Build the control API router
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::get_status))
        .route("/start", post(handlers::start))
        .route("/stop", post(handlers::stop))
        .route("/tempo", post(handlers::set_tempo))
        .route("/events", get(sse::event_stream))
        .fallback(handlers::not_found)
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        // Remote panels may be served from other origins on the LAN
        .layer(CorsLayer::permissive())
}
