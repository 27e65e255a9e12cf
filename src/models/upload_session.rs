//! Represents a resumable upload session and the chunks it has received.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use std::{collections::BTreeSet, fmt};
use uuid::Uuid;

/// Lifecycle state of an upload session.
///
/// Only `Active` sessions accept chunks. The other three are terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UploadSessionStatus {
    Active,
    Completed,
    Failed,
    Expired,
}

impl UploadSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for UploadSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical upload attempt.
///
/// The `version` column is the optimistic concurrency token: every write
/// goes through `SessionStore::save` with the version that was last read,
/// and the store rejects it if another writer got there first.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct UploadSession {
    /// Session identifier returned to the client.
    pub id: Uuid,

    /// Identity of the uploading user; every lookup is scoped to it.
    pub owner_id: String,

    /// Client-declared file name (untrusted).
    pub original_file_name: String,

    /// Client-declared MIME type (untrusted).
    pub content_type: Option<String>,

    /// Client-declared total size, if any.
    pub total_size_bytes: Option<i64>,

    /// Chunk size the client promised to use.
    pub chunk_size_bytes: i64,

    /// Number of chunks that complete the upload. Fixed at creation.
    pub total_chunks: u32,

    /// Indices received so far. Grows monotonically.
    pub received_chunk_indices: Json<BTreeSet<u32>>,

    /// Denormalized `received_chunk_indices.len()`.
    pub received_chunks_count: u32,

    /// Unique namespace for this session's chunk and final objects.
    pub storage_key_prefix: String,

    pub status: UploadSessionStatus,

    /// Human-readable reason, set when the session fails.
    pub failure_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Set only once the session is `Completed`.
    pub media_file_id: Option<Uuid>,

    /// Optimistic concurrency token.
    pub version: i64,
}

impl UploadSession {
    /// Number of chunks needed for `total_size` bytes split into `chunk_size` pieces.
    pub fn chunk_count(total_size: i64, chunk_size: i64) -> u64 {
        debug_assert!(chunk_size > 0);
        (total_size.max(0) as u64).div_ceil(chunk_size as u64)
    }

    /// Storage path of the chunk with the given index.
    pub fn chunk_path(&self, index: u32) -> String {
        format!("{}/chunk_{}", self.storage_key_prefix, index)
    }

    pub fn has_chunk(&self, index: u32) -> bool {
        self.received_chunk_indices.contains(&index)
    }

    /// Record a chunk index. Returns `false` if it was already present.
    pub fn record_chunk(&mut self, index: u32) -> bool {
        let inserted = self.received_chunk_indices.insert(index);
        self.received_chunks_count = self.received_chunk_indices.len() as u32;
        inserted
    }

    pub fn is_complete(&self) -> bool {
        self.received_chunks_count == self.total_chunks
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Indices that have not arrived yet, as ascending inclusive ranges.
    ///
    /// Only the recorded indices are walked, so the result stays small for
    /// sessions with many chunks.
    pub fn missing_chunk_ranges(&self) -> Vec<ChunkRange> {
        let mut ranges = Vec::new();
        let mut next = 0u32;
        for &index in self.received_chunk_indices.iter() {
            if index >= self.total_chunks {
                break;
            }
            if index > next {
                ranges.push(ChunkRange {
                    start: next,
                    end: index - 1,
                });
            }
            next = index + 1;
        }
        if next < self.total_chunks {
            ranges.push(ChunkRange {
                start: next,
                end: self.total_chunks - 1,
            });
        }
        ranges
    }
}

/// Inclusive run of chunk indices.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: u32,
    pub end: u32,
}

/// Client-facing snapshot of an upload session.
#[derive(Serialize, Debug, Clone)]
pub struct SessionView {
    pub id: Uuid,
    pub status: UploadSessionStatus,
    pub original_file_name: String,
    pub total_size_bytes: Option<i64>,
    pub chunk_size_bytes: i64,
    pub total_chunks: u32,
    pub received_chunks_count: u32,
    pub received_chunk_indices: Vec<u32>,
    pub missing_chunk_ranges: Vec<ChunkRange>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub media_file_id: Option<Uuid>,
    pub failure_reason: Option<String>,
}

impl From<&UploadSession> for SessionView {
    fn from(session: &UploadSession) -> Self {
        Self {
            id: session.id,
            status: session.status,
            original_file_name: session.original_file_name.clone(),
            total_size_bytes: session.total_size_bytes,
            chunk_size_bytes: session.chunk_size_bytes,
            total_chunks: session.total_chunks,
            received_chunks_count: session.received_chunks_count,
            received_chunk_indices: session.received_chunk_indices.iter().copied().collect(),
            missing_chunk_ranges: session.missing_chunk_ranges(),
            created_at: session.created_at,
            expires_at: session.expires_at,
            completed_at: session.completed_at,
            media_file_id: session.media_file_id,
            failure_reason: session.failure_reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(total_chunks: u32) -> UploadSession {
        let now = Utc::now();
        UploadSession {
            id: Uuid::new_v4(),
            owner_id: "owner".into(),
            original_file_name: "talk.mp3".into(),
            content_type: Some("audio/mpeg".into()),
            total_size_bytes: Some(250),
            chunk_size_bytes: 100,
            total_chunks,
            received_chunk_indices: Json(BTreeSet::new()),
            received_chunks_count: 0,
            storage_key_prefix: "uploads/a/b".into(),
            status: UploadSessionStatus::Active,
            failure_reason: None,
            created_at: now,
            expires_at: now + Duration::hours(24),
            completed_at: None,
            media_file_id: None,
            version: 0,
        }
    }

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(UploadSession::chunk_count(250, 100), 3);
        assert_eq!(UploadSession::chunk_count(300, 100), 3);
        assert_eq!(UploadSession::chunk_count(1, 100), 1);
        assert_eq!(UploadSession::chunk_count(0, 100), 0);
    }

    #[test]
    fn record_chunk_is_idempotent() {
        let mut s = session(3);
        assert!(s.record_chunk(2));
        assert!(!s.record_chunk(2));
        assert_eq!(s.received_chunks_count, 1);
        assert_eq!(s.missing_chunk_ranges(), vec![ChunkRange { start: 0, end: 1 }]);
        assert!(s.record_chunk(0));
        assert!(s.record_chunk(1));
        assert!(s.is_complete());
    }

    #[test]
    fn missing_ranges_cover_the_gaps() {
        let mut s = session(10);
        assert_eq!(s.missing_chunk_ranges(), vec![ChunkRange { start: 0, end: 9 }]);
        for index in [0, 3, 4, 9] {
            s.record_chunk(index);
        }
        assert_eq!(
            s.missing_chunk_ranges(),
            vec![
                ChunkRange { start: 1, end: 2 },
                ChunkRange { start: 5, end: 8 },
            ]
        );
        for index in 0..10 {
            s.record_chunk(index);
        }
        assert!(s.missing_chunk_ranges().is_empty());
    }

    #[test]
    fn missing_ranges_do_not_scale_with_total() {
        let mut s = session(u32::MAX);
        s.record_chunk(5);
        assert_eq!(
            s.missing_chunk_ranges(),
            vec![
                ChunkRange { start: 0, end: 4 },
                ChunkRange {
                    start: 6,
                    end: u32::MAX - 1
                },
            ]
        );
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let s = session(1);
        assert!(!s.is_expired_at(s.expires_at - Duration::seconds(1)));
        assert!(s.is_expired_at(s.expires_at));
    }

    #[test]
    fn chunk_path_is_under_prefix() {
        assert_eq!(session(3).chunk_path(1), "uploads/a/b/chunk_1");
    }
}
