//! src/services/session_store.rs
//!
//! Versioned persistence for upload sessions.
//!
//! Every mutation is a read-modify-write guarded by the session's `version`
//! column: `save` only succeeds if the stored version still matches the one
//! the caller read, and bumps it by one. A stale write comes back as
//! `UploadError::ConcurrencyConflict`, which callers retry after reloading.
//! No in-process lock is involved, so the guarantee holds across processes.

use crate::{
    models::{
        media_file::MediaFile,
        upload_session::{UploadSession, UploadSessionStatus},
    },
    services::errors::{UploadError, UploadResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Store for `UploadSession` and `MediaFile` records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a freshly created session.
    async fn insert(&self, session: &UploadSession) -> UploadResult<()>;

    /// Load a session owned by `owner_id`. Sessions of other owners are invisible.
    async fn load(&self, id: Uuid, owner_id: &str) -> UploadResult<Option<UploadSession>>;

    /// Compare-and-swap write of an active session's mutable fields.
    ///
    /// Succeeds only if the stored row is still `active` at `session.version`;
    /// returns the saved session carrying the new version.
    async fn save(&self, session: &UploadSession) -> UploadResult<UploadSession>;

    /// Insert `media` and save `session` (now `completed`) in one transaction,
    /// under the same compare-and-swap rule as `save`.
    async fn complete(
        &self,
        session: &UploadSession,
        media: &MediaFile,
    ) -> UploadResult<UploadSession>;

    async fn load_media_file(&self, id: Uuid, owner_id: &str) -> UploadResult<Option<MediaFile>>;

    /// Active sessions whose TTL elapsed at `now`, oldest first.
    async fn list_expired_active(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> UploadResult<Vec<UploadSession>>;
}

const SESSION_COLUMNS: &str = "id, owner_id, original_file_name, content_type, total_size_bytes, \
     chunk_size_bytes, total_chunks, received_chunk_indices, received_chunks_count, \
     storage_key_prefix, status, failure_reason, created_at, expires_at, completed_at, \
     media_file_id, version";

const UPDATE_SESSION_SQL: &str = "UPDATE upload_sessions SET
        received_chunk_indices = ?,
        received_chunks_count = ?,
        status = ?,
        failure_reason = ?,
        completed_at = ?,
        media_file_id = ?,
        version = version + 1
     WHERE id = ? AND owner_id = ? AND version = ? AND status = 'active'";

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

/// Apply the embedded schema. Statements are idempotent.
pub async fn run_migrations(db: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

/// SQLite-backed `SessionStore`.
#[derive(Clone)]
pub struct SqliteSessionStore {
    db: Arc<SqlitePool>,
}

impl SqliteSessionStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    fn bumped(session: &UploadSession) -> UploadSession {
        let mut saved = session.clone();
        saved.version += 1;
        saved
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn insert(&self, session: &UploadSession) -> UploadResult<()> {
        sqlx::query(&format!(
            "INSERT INTO upload_sessions ({SESSION_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(session.id)
        .bind(&session.owner_id)
        .bind(&session.original_file_name)
        .bind(&session.content_type)
        .bind(session.total_size_bytes)
        .bind(session.chunk_size_bytes)
        .bind(session.total_chunks)
        .bind(&session.received_chunk_indices)
        .bind(session.received_chunks_count)
        .bind(&session.storage_key_prefix)
        .bind(session.status)
        .bind(&session.failure_reason)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.completed_at)
        .bind(session.media_file_id)
        .bind(session.version)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn load(&self, id: Uuid, owner_id: &str) -> UploadResult<Option<UploadSession>> {
        let session = sqlx::query_as::<_, UploadSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM upload_sessions WHERE id = ? AND owner_id = ?"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(session)
    }

    async fn save(&self, session: &UploadSession) -> UploadResult<UploadSession> {
        let result = sqlx::query(UPDATE_SESSION_SQL)
            .bind(&session.received_chunk_indices)
            .bind(session.received_chunks_count)
            .bind(session.status)
            .bind(&session.failure_reason)
            .bind(session.completed_at)
            .bind(session.media_file_id)
            .bind(session.id)
            .bind(&session.owner_id)
            .bind(session.version)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(UploadError::ConcurrencyConflict(session.id));
        }
        Ok(Self::bumped(session))
    }

    async fn complete(
        &self,
        session: &UploadSession,
        media: &MediaFile,
    ) -> UploadResult<UploadSession> {
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(UPDATE_SESSION_SQL)
            .bind(&session.received_chunk_indices)
            .bind(session.received_chunks_count)
            .bind(session.status)
            .bind(&session.failure_reason)
            .bind(session.completed_at)
            .bind(session.media_file_id)
            .bind(session.id)
            .bind(&session.owner_id)
            .bind(session.version)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(UploadError::ConcurrencyConflict(session.id));
        }

        sqlx::query(
            "INSERT INTO media_files (
                id, owner_id, original_file_name, content_type, storage_path, size_bytes,
                file_type, duration_seconds, etag, created_at, created_from_upload_session_id
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(media.id)
        .bind(&media.owner_id)
        .bind(&media.original_file_name)
        .bind(&media.content_type)
        .bind(&media.storage_path)
        .bind(media.size_bytes)
        .bind(media.file_type)
        .bind(media.duration_seconds)
        .bind(&media.etag)
        .bind(media.created_at)
        .bind(media.created_from_upload_session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Self::bumped(session))
    }

    async fn load_media_file(&self, id: Uuid, owner_id: &str) -> UploadResult<Option<MediaFile>> {
        let media = sqlx::query_as::<_, MediaFile>(
            "SELECT id, owner_id, original_file_name, content_type, storage_path, size_bytes,
                    file_type, duration_seconds, etag, created_at, created_from_upload_session_id
             FROM media_files WHERE id = ? AND owner_id = ?",
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(media)
    }

    async fn list_expired_active(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> UploadResult<Vec<UploadSession>> {
        let sessions = sqlx::query_as::<_, UploadSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM upload_sessions
             WHERE status = 'active' AND expires_at <= ?
             ORDER BY expires_at ASC LIMIT ?"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&*self.db)
        .await?;
        Ok(sessions)
    }
}

/// Terminal state a writer wants to move an active session into.
#[derive(Debug)]
pub enum Terminal<'a> {
    Completed(&'a MediaFile),
    Failed(String),
    Expired,
}

/// Outcome of racing for a terminal transition.
#[derive(Debug)]
pub enum Settled {
    /// This caller's write persisted; carries the saved session.
    Won(UploadSession),
    /// Another writer moved the session to a terminal state first.
    Lost(UploadSession),
}

/// Move `session` into `target`, retrying on conflicts while it is still active.
///
/// A conflicting write is resolved by reloading: if someone else already made
/// the session terminal, the caller gets `Settled::Lost` with that state and
/// must not overwrite it.
pub async fn settle(
    store: &dyn SessionStore,
    session: &UploadSession,
    target: Terminal<'_>,
    max_retries: u32,
) -> UploadResult<Settled> {
    let mut current = session.clone();
    for attempt in 0..=max_retries {
        if current.status.is_terminal() {
            return Ok(Settled::Lost(current));
        }

        let mut next = current.clone();
        let now = Utc::now();
        let result = match &target {
            Terminal::Completed(media) => {
                next.status = UploadSessionStatus::Completed;
                next.media_file_id = Some(media.id);
                next.completed_at = Some(now);
                store.complete(&next, media).await
            }
            Terminal::Failed(reason) => {
                next.status = UploadSessionStatus::Failed;
                next.failure_reason = Some(reason.clone());
                next.completed_at = Some(now);
                store.save(&next).await
            }
            Terminal::Expired => {
                next.status = UploadSessionStatus::Expired;
                store.save(&next).await
            }
        };

        match result {
            Ok(saved) => return Ok(Settled::Won(saved)),
            Err(UploadError::ConcurrencyConflict(_)) => {
                debug!(session_id = %session.id, attempt, "terminal write conflicted, reloading");
                current = store
                    .load(session.id, &session.owner_id)
                    .await?
                    .ok_or(UploadError::NotFound(session.id))?;
            }
            Err(err) => return Err(err),
        }
    }
    Err(UploadError::ConcurrencyConflict(session.id))
}
