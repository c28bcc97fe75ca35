//! HTTP request handlers
//!
//! Write endpoints answer with the status document read after the write, so
//! the caller sees the authoritative result of its own command.

use super::error::{ApiError, ApiResult};
use super::AppContext;
use crate::events::TempoSource;
use axum::{body::Bytes, extract::State, Json};
use dm_common::protocol::coerce_bpm;
use dm_common::StatusPayload;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "dm-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /status
pub async fn get_status(State(ctx): State<AppContext>) -> Json<StatusPayload> {
    Json(ctx.info.status(&ctx.scheduler).await)
}

/// POST /start
///
/// Starting an already running metronome leaves its position alone.
pub async fn start(State(ctx): State<AppContext>) -> Json<StatusPayload> {
    if ctx.scheduler.start().await {
        info!("Started by remote request");
    }
    Json(ctx.info.status(&ctx.scheduler).await)
}

/// POST /stop
pub async fn stop(State(ctx): State<AppContext>) -> Json<StatusPayload> {
    if ctx.scheduler.stop().await {
        info!("Stopped by remote request");
    }
    Json(ctx.info.status(&ctx.scheduler).await)
}

/// POST /tempo with `{"bpm": <integer>}`
///
/// Out-of-range values are clamped rather than rejected. An empty body is
/// treated as an empty object.
pub async fn set_tempo(
    State(ctx): State<AppContext>,
    body: Bytes,
) -> ApiResult<Json<StatusPayload>> {
    let request: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&body)
            .map_err(|_| ApiError::BadRequest("Invalid JSON".to_string()))?
    };

    let raw = match request.get("bpm") {
        Some(raw) if !raw.is_null() => raw,
        _ => return Err(ApiError::BadRequest("Missing bpm".to_string())),
    };
    let bpm = coerce_bpm(raw).ok_or_else(|| ApiError::BadRequest("Invalid bpm".to_string()))?;

    let stored = ctx.scheduler.set_tempo(bpm as i64, TempoSource::Remote).await;
    debug!("Remote tempo request {} -> {} bpm", raw, stored);
    Ok(Json(ctx.info.status(&ctx.scheduler).await))
}

/// Fallback for unknown routes
pub async fn not_found() -> ApiError {
    ApiError::NotFound("Not found".to_string())
}
