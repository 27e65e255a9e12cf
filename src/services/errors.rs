//! Error taxonomy for the upload pipeline.

use crate::models::upload_session::UploadSessionStatus;
use chrono::{DateTime, Utc};
use std::io;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("chunk index {index} is out of range (session has {total} chunks)")]
    ChunkIndexOutOfRange { index: u32, total: u32 },
    #[error("upload session `{0}` not found")]
    NotFound(Uuid),
    #[error("upload session `{id}` is {status}{}", reason_suffix(.reason))]
    InvalidState {
        id: Uuid,
        status: UploadSessionStatus,
        reason: Option<String>,
    },
    #[error("upload session `{id}` expired at {expires_at}")]
    Expired { id: Uuid, expires_at: DateTime<Utc> },
    #[error("plan limit exceeded: {0}")]
    QuotaExceeded(String),
    #[error("assembled size {actual} bytes differs too much from declared size {declared} bytes")]
    SizeMismatch { declared: i64, actual: i64 },
    #[error("unreadable media: {0}")]
    UnreadableMedia(String),
    #[error("storage error: {0}")]
    Storage(#[from] io::Error),
    #[error("concurrent update conflict on upload session `{0}`")]
    ConcurrencyConflict(Uuid),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(": {}", r))
        .unwrap_or_default()
}
