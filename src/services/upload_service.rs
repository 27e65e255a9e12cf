//! src/services/upload_service.rs
//!
//! UploadService: the upload session state machine.
//!
//! Sessions are created against the owner's plan limits, receive chunks in
//! any order (possibly repeated, possibly in parallel), expire lazily on
//! access, and hand off to the `Assembler` once the persisted receipt count
//! reaches the expected total. Chunk bytes are always stored before the
//! session is updated to acknowledge them.

use crate::{
    config::UploadPolicy,
    models::{
        media_file::MediaFile,
        upload_session::{SessionView, UploadSession, UploadSessionStatus},
    },
    services::{
        assembler::{Assembler, DEFAULT_CONTENT_TYPE, delete_chunk_objects},
        chunk_store::{ChunkStore, bytes_stream},
        errors::{UploadError, UploadResult},
        media_probe::MediaProbe,
        plan_guard::{PlanGuard, PlanResolver},
        session_store::{SessionStore, Settled, Terminal, settle},
    },
};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Parameters for opening an upload session.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub file_name: String,
    pub content_type: Option<String>,
    /// Declared total size. Used to derive the chunk count and for quota checks.
    pub total_size_bytes: Option<i64>,
    pub chunk_size_bytes: i64,
    /// Required only when no total size is declared.
    pub total_chunks: Option<u32>,
    /// Client estimate, used only for early quota rejection.
    pub duration_minutes: Option<f64>,
}

/// Result of a chunk upload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ChunkOutcome {
    Incomplete {
        received_chunks_count: u32,
        total_chunks: u32,
    },
    Completed {
        media_file: MediaFile,
    },
}

#[derive(Clone)]
pub struct UploadService {
    sessions: Arc<dyn SessionStore>,
    chunks: Arc<dyn ChunkStore>,
    plans: Arc<dyn PlanResolver>,
    guard: PlanGuard,
    assembler: Assembler,
    policy: UploadPolicy,
}

impl UploadService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        chunks: Arc<dyn ChunkStore>,
        probe: Arc<dyn MediaProbe>,
        plans: Arc<dyn PlanResolver>,
        policy: UploadPolicy,
    ) -> Self {
        let assembler = Assembler::new(
            sessions.clone(),
            chunks.clone(),
            probe,
            plans.clone(),
            policy.clone(),
        );
        Self {
            sessions,
            chunks,
            plans,
            guard: PlanGuard,
            assembler,
            policy,
        }
    }

    /// Open a new session after checking the owner's plan limits.
    ///
    /// No chunk data is written here. Every session gets a fresh storage
    /// prefix built from random identifiers.
    pub async fn create_session(
        &self,
        owner_id: &str,
        request: CreateSessionRequest,
    ) -> UploadResult<UploadSession> {
        if owner_id.trim().is_empty() {
            return Err(UploadError::InvalidArgument("owner id is required".into()));
        }
        if request.file_name.trim().is_empty() {
            return Err(UploadError::InvalidArgument("file name is required".into()));
        }
        if request.chunk_size_bytes <= 0 {
            return Err(UploadError::InvalidArgument(
                "chunk_size_bytes must be greater than 0".into(),
            ));
        }
        if let Some(minutes) = request.duration_minutes {
            if !minutes.is_finite() || minutes < 0.0 {
                return Err(UploadError::InvalidArgument(
                    "duration_minutes must be a non-negative number".into(),
                ));
            }
        }
        let total_chunks = expected_chunks(&request, self.policy.max_chunks)?;

        let plan = self.plans.resolve(owner_id).await?;
        if let Some(size) = request.total_size_bytes {
            self.guard.check_size(&plan, size)?;
        }
        if let Some(minutes) = request.duration_minutes {
            self.guard.check_duration(&plan, minutes)?;
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let session = UploadSession {
            id,
            owner_id: owner_id.to_string(),
            original_file_name: request.file_name,
            content_type: request.content_type,
            total_size_bytes: request.total_size_bytes,
            chunk_size_bytes: request.chunk_size_bytes,
            total_chunks,
            received_chunk_indices: Json(BTreeSet::new()),
            received_chunks_count: 0,
            storage_key_prefix: format!("uploads/{}/{}", id.simple(), Uuid::new_v4().simple()),
            status: UploadSessionStatus::Active,
            failure_reason: None,
            created_at: now,
            expires_at: now + self.policy.session_ttl,
            completed_at: None,
            media_file_id: None,
            version: 0,
        };

        self.sessions.insert(&session).await?;
        info!(
            session_id = %session.id,
            owner_id,
            total_chunks,
            plan = ?plan.tier,
            "upload session created"
        );
        Ok(session)
    }

    /// Client view of a session.
    ///
    /// Completed and failed sessions stay inspectable. An active session past
    /// its TTL is expired on the spot.
    pub async fn get_session(&self, session_id: Uuid, owner_id: &str) -> UploadResult<SessionView> {
        let session = self.load_owned(session_id, owner_id).await?;
        match session.status {
            UploadSessionStatus::Active if session.is_expired_at(Utc::now()) => {
                Err(self.expire(session).await)
            }
            UploadSessionStatus::Expired => Err(UploadError::Expired {
                id: session.id,
                expires_at: session.expires_at,
            }),
            _ => Ok(SessionView::from(&session)),
        }
    }

    /// Load a session that may still accept chunks.
    pub async fn get_active_session(
        &self,
        session_id: Uuid,
        owner_id: &str,
    ) -> UploadResult<UploadSession> {
        let session = self.load_owned(session_id, owner_id).await?;
        self.ensure_active(session).await
    }

    /// Store one chunk and record it on the session.
    ///
    /// Re-sending a recorded chunk skips the storage write. When the upload
    /// becomes complete the session is assembled and the media file returned.
    pub async fn upload_chunk(
        &self,
        session_id: Uuid,
        owner_id: &str,
        chunk_index: u32,
        data: Bytes,
    ) -> UploadResult<ChunkOutcome> {
        let session = self.get_active_session(session_id, owner_id).await?;
        if chunk_index >= session.total_chunks {
            return Err(UploadError::ChunkIndexOutOfRange {
                index: chunk_index,
                total: session.total_chunks,
            });
        }

        let session = if session.has_chunk(chunk_index) {
            debug!(%session_id, chunk_index, "chunk already recorded, skipping write");
            session
        } else {
            if data.is_empty() {
                return Err(UploadError::InvalidArgument("chunk body is empty".into()));
            }
            let path = session.chunk_path(chunk_index);
            let content_type = session
                .content_type
                .as_deref()
                .unwrap_or(DEFAULT_CONTENT_TYPE);
            if let Err(err) = self
                .chunks
                .write(&path, bytes_stream(data), content_type)
                .await
            {
                error!(%session_id, chunk_index, error = %err, "failed to store chunk");
                return Err(UploadError::Storage(err));
            }
            self.record_chunk(session, chunk_index).await?
        };

        if session.status == UploadSessionStatus::Completed || session.is_complete() {
            let media_file = self.assembler.assemble(session).await?;
            return Ok(ChunkOutcome::Completed { media_file });
        }

        Ok(ChunkOutcome::Incomplete {
            received_chunks_count: session.received_chunks_count,
            total_chunks: session.total_chunks,
        })
    }

    /// Add `index` to the session, retrying from a fresh read on conflicts.
    ///
    /// If a reload finds the session already completed with this index, that
    /// completed session is returned so the caller can report its outcome.
    async fn record_chunk(&self, mut session: UploadSession, index: u32) -> UploadResult<UploadSession> {
        for attempt in 0..=self.policy.conflict_retries {
            if !session.record_chunk(index) {
                return Ok(session);
            }
            match self.sessions.save(&session).await {
                Ok(saved) => {
                    debug!(
                        session_id = %saved.id,
                        chunk_index = index,
                        received = saved.received_chunks_count,
                        total = saved.total_chunks,
                        "chunk recorded"
                    );
                    return Ok(saved);
                }
                Err(UploadError::ConcurrencyConflict(_)) => {
                    debug!(session_id = %session.id, chunk_index = index, attempt, "chunk bookkeeping conflicted, retrying");
                    let fresh = self.load_owned(session.id, &session.owner_id).await?;
                    if fresh.status == UploadSessionStatus::Completed && fresh.has_chunk(index) {
                        return Ok(fresh);
                    }
                    session = self.ensure_active(fresh).await?;
                }
                Err(err) => return Err(err),
            }
        }
        warn!(session_id = %session.id, chunk_index = index, "gave up recording chunk after repeated conflicts");
        Err(UploadError::ConcurrencyConflict(session.id))
    }

    async fn load_owned(&self, session_id: Uuid, owner_id: &str) -> UploadResult<UploadSession> {
        self.sessions
            .load(session_id, owner_id)
            .await?
            .ok_or(UploadError::NotFound(session_id))
    }

    async fn ensure_active(&self, session: UploadSession) -> UploadResult<UploadSession> {
        if session.status != UploadSessionStatus::Active {
            return Err(UploadError::InvalidState {
                id: session.id,
                status: session.status,
                reason: session.failure_reason.clone(),
            });
        }
        if session.is_expired_at(Utc::now()) {
            return Err(self.expire(session).await);
        }
        Ok(session)
    }

    /// Persist the `expired` transition and return the error to report.
    ///
    /// The caller that wins the transition also deletes the chunk objects.
    async fn expire(&self, session: UploadSession) -> UploadError {
        warn!(session_id = %session.id, expires_at = %session.expires_at, "upload session expired");
        match settle(
            &*self.sessions,
            &session,
            Terminal::Expired,
            self.policy.conflict_retries,
        )
        .await
        {
            Ok(Settled::Won(_)) => {
                delete_chunk_objects(&*self.chunks, &session).await;
                UploadError::Expired {
                    id: session.id,
                    expires_at: session.expires_at,
                }
            }
            Ok(Settled::Lost(current)) if current.status == UploadSessionStatus::Expired => {
                UploadError::Expired {
                    id: current.id,
                    expires_at: current.expires_at,
                }
            }
            Ok(Settled::Lost(current)) => UploadError::InvalidState {
                id: current.id,
                status: current.status,
                reason: current.failure_reason,
            },
            Err(err) => err,
        }
    }
}

/// Chunk count for a creation request, capped at `max_chunks`.
fn expected_chunks(request: &CreateSessionRequest, max_chunks: u32) -> UploadResult<u32> {
    let chunks = match (request.total_size_bytes, request.total_chunks) {
        (Some(size), _) if size <= 0 => {
            return Err(UploadError::InvalidArgument(
                "total_size_bytes must be greater than 0".into(),
            ));
        }
        (Some(size), _) => UploadSession::chunk_count(size, request.chunk_size_bytes),
        (None, Some(chunks)) if chunks > 0 => u64::from(chunks),
        _ => {
            return Err(UploadError::InvalidArgument(
                "either total_size_bytes or a positive total_chunks is required".into(),
            ));
        }
    };
    if chunks > u64::from(max_chunks) {
        return Err(UploadError::InvalidArgument(format!(
            "upload needs {} chunks, at most {} are allowed; use a larger chunk size",
            chunks, max_chunks
        )));
    }
    Ok(chunks as u32)
}
