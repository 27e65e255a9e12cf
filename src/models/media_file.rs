//! Represents a finalized, assembled media artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MediaFileType {
    Audio,
    Video,
}

impl MediaFileType {
    /// Classify by declared MIME type. Anything that is not `video/*` is audio.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.trim().to_ascii_lowercase().starts_with("video/") => Self::Video,
            _ => Self::Audio,
        }
    }
}

/// A durable media file produced by assembling an upload session.
///
/// Created exactly once, together with the session's transition to
/// `Completed`, and never modified afterwards.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MediaFile {
    pub id: Uuid,

    pub owner_id: String,

    pub original_file_name: String,

    /// MIME type (falls back to `application/octet-stream`).
    pub content_type: String,

    /// Path of the assembled object in chunk storage.
    pub storage_path: String,

    pub size_bytes: i64,

    pub file_type: MediaFileType,

    /// Duration reported by the media probe.
    pub duration_seconds: f64,

    /// MD5 of the assembled bytes, hex encoded.
    pub etag: String,

    pub created_at: DateTime<Utc>,

    /// Upload session this file was assembled from (unique).
    pub created_from_upload_session_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_content_type() {
        assert_eq!(
            MediaFileType::from_content_type(Some("video/mp4")),
            MediaFileType::Video
        );
        assert_eq!(
            MediaFileType::from_content_type(Some("Video/WebM")),
            MediaFileType::Video
        );
        assert_eq!(
            MediaFileType::from_content_type(Some("audio/mpeg")),
            MediaFileType::Audio
        );
        assert_eq!(MediaFileType::from_content_type(None), MediaFileType::Audio);
    }
}
