//! HTTP handlers for upload sessions.
//! Thin translation between requests and `UploadService`; the owner identity
//! comes from the `x-owner-id` header set by the authenticating proxy.

use crate::{
    errors::AppError,
    models::upload_session::SessionView,
    services::upload_service::{ChunkOutcome, CreateSessionRequest},
    state::AppState,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

pub const OWNER_HEADER: &str = "x-owner-id";

fn owner_id(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::unauthorized(format!("missing `{}` header", OWNER_HEADER)))
}

/// POST `/uploads/sessions` - open an upload session.
pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let owner = owner_id(&headers)?;
    let session = state.uploads.create_session(&owner, request).await?;
    Ok((StatusCode::CREATED, Json(SessionView::from(&session))))
}

/// PUT `/uploads/sessions/{session_id}/chunks/{chunk_index}` - raw chunk body.
///
/// 202 while chunks are missing, 200 with the media file once assembled.
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path((session_id, chunk_index)): Path<(Uuid, u32)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let owner = owner_id(&headers)?;
    let outcome = state
        .uploads
        .upload_chunk(session_id, &owner, chunk_index, body)
        .await?;

    let status = match outcome {
        ChunkOutcome::Incomplete { .. } => StatusCode::ACCEPTED,
        ChunkOutcome::Completed { .. } => StatusCode::OK,
    };
    Ok((status, Json(outcome)).into_response())
}

/// GET `/uploads/sessions/{session_id}` - inspect progress or outcome.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<SessionView>, AppError> {
    let owner = owner_id(&headers)?;
    let view = state.uploads.get_session(session_id, &owner).await?;
    Ok(Json(view))
}
