//! Defines routes for the upload API.
//!
//! ## Structure
//! - `POST /uploads/sessions` - open an upload session
//! - `GET  /uploads/sessions/{session_id}` - session progress / outcome
//! - `PUT  /uploads/sessions/{session_id}/chunks/{chunk_index}` - upload one chunk
//! - `GET  /healthz`, `GET /readyz` - liveness and readiness

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{create_session, get_session, upload_chunk},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Build the router. Chunk bodies larger than `max_chunk_bytes` are rejected with 413.
pub fn routes(max_chunk_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/uploads/sessions", post(create_session))
        .route("/uploads/sessions/{session_id}", get(get_session))
        .route(
            "/uploads/sessions/{session_id}/chunks/{chunk_index}",
            put(upload_chunk).layer(DefaultBodyLimit::max(max_chunk_bytes)),
        )
}
