//! src/services/assembler.rs
//!
//! Assembler: turns a fully received upload session into a `MediaFile`.
//!
//! Chunks are merged by ascending index into a local temp file, validated
//! (declared size tolerance, then actual size and probed duration against
//! the owner's plan), uploaded to a session-scoped final path and recorded.
//! The terminal `active -> completed` write is the last step and goes
//! through the session's compare-and-swap, so when two callers race to
//! assemble the same session only one record is ever created and the loser
//! returns the winner's result.

use crate::{
    config::UploadPolicy,
    models::{
        media_file::{MediaFile, MediaFileType},
        upload_session::{UploadSession, UploadSessionStatus},
    },
    services::{
        chunk_store::ChunkStore,
        errors::{UploadError, UploadResult},
        media_probe::MediaProbe,
        plan_guard::{PlanGuard, PlanResolver},
        session_store::{SessionStore, Settled, Terminal, settle},
    },
};
use chrono::Utc;
use futures::StreamExt;
use md5::Context;
use std::{
    io::ErrorKind,
    path::Path,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const MAX_FILE_NAME_LEN: usize = 200;

#[derive(Clone)]
pub struct Assembler {
    sessions: Arc<dyn SessionStore>,
    chunks: Arc<dyn ChunkStore>,
    probe: Arc<dyn MediaProbe>,
    plans: Arc<dyn PlanResolver>,
    guard: PlanGuard,
    policy: UploadPolicy,
}

impl Assembler {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        chunks: Arc<dyn ChunkStore>,
        probe: Arc<dyn MediaProbe>,
        plans: Arc<dyn PlanResolver>,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            sessions,
            chunks,
            probe,
            plans,
            guard: PlanGuard,
            policy,
        }
    }

    /// Assemble a session whose chunks have all been recorded.
    ///
    /// A session that is already terminal is not assembled again: a
    /// `completed` one yields its existing media file, anything else an error.
    pub async fn assemble(&self, session: UploadSession) -> UploadResult<MediaFile> {
        if session.status.is_terminal() {
            return self.outcome_of(&session).await;
        }
        if !session.is_complete() {
            return Err(UploadError::InvalidArgument(format!(
                "session {} has {} of {} chunks",
                session.id, session.received_chunks_count, session.total_chunks
            )));
        }

        if session.is_expired_at(Utc::now()) {
            warn!(session_id = %session.id, "session expired before assembly");
            return match settle(
                &*self.sessions,
                &session,
                Terminal::Expired,
                self.policy.conflict_retries,
            )
            .await?
            {
                Settled::Won(_) => {
                    delete_chunk_objects(&*self.chunks, &session).await;
                    Err(UploadError::Expired {
                        id: session.id,
                        expires_at: session.expires_at,
                    })
                }
                Settled::Lost(current) => self.outcome_of(&current).await,
            };
        }

        info!(
            session_id = %session.id,
            total_chunks = session.total_chunks,
            "assembling upload"
        );

        let temp_path = self
            .policy
            .temp_dir
            .join(format!("merge-{}-{}", session.id, Uuid::new_v4()));
        let built = self.build_media_file(&session, &temp_path).await;
        remove_temp_file(&temp_path).await;

        let media = match built {
            Ok(media) => media,
            Err(err) => return self.fail(&session, err).await,
        };

        match settle(
            &*self.sessions,
            &session,
            Terminal::Completed(&media),
            self.policy.conflict_retries,
        )
        .await
        {
            Ok(Settled::Won(_)) => {
                info!(
                    session_id = %session.id,
                    media_file_id = %media.id,
                    size_bytes = media.size_bytes,
                    "upload assembled"
                );
                delete_chunk_objects(&*self.chunks, &session).await;
                Ok(media)
            }
            Ok(Settled::Lost(current)) => {
                debug!(
                    session_id = %session.id,
                    status = %current.status,
                    "another assembler settled the session first"
                );
                self.outcome_of(&current).await
            }
            Err(err) => self.fail(&session, err).await,
        }
    }

    /// Steps between merging and the terminal write: merge, validate, upload.
    async fn build_media_file(
        &self,
        session: &UploadSession,
        temp_path: &Path,
    ) -> UploadResult<MediaFile> {
        let (size_bytes, etag) = self.merge_chunks(session, temp_path).await?;

        if let Some(declared) = session.total_size_bytes {
            if !within_tolerance(declared, size_bytes, self.policy.size_tolerance) {
                return Err(UploadError::SizeMismatch {
                    declared,
                    actual: size_bytes,
                });
            }
        }

        let plan = self.plans.resolve(&session.owner_id).await?;
        self.guard.check_size(&plan, size_bytes)?;

        let duration = self.probe.duration(temp_path).await?;
        self.guard
            .check_duration(&plan, duration.as_secs_f64() / 60.0)?;

        let content_type = session
            .content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let storage_path = final_object_path(session);
        let merged = File::open(temp_path).await?;
        self.chunks
            .write(&storage_path, Box::pin(ReaderStream::new(merged)), &content_type)
            .await?;

        Ok(MediaFile {
            id: Uuid::new_v4(),
            owner_id: session.owner_id.clone(),
            original_file_name: session.original_file_name.clone(),
            file_type: MediaFileType::from_content_type(session.content_type.as_deref()),
            content_type,
            storage_path,
            size_bytes,
            duration_seconds: duration.as_secs_f64(),
            etag,
            created_at: Utc::now(),
            created_from_upload_session_id: session.id,
        })
    }

    /// Concatenate chunks `0..total_chunks` into `temp_path`; returns size and MD5.
    async fn merge_chunks(
        &self,
        session: &UploadSession,
        temp_path: &Path,
    ) -> UploadResult<(i64, String)> {
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut out = File::create(temp_path).await?;
        let mut digest = Context::new();
        let mut size_bytes: i64 = 0;

        for index in 0..session.total_chunks {
            let mut chunk = self.chunks.open_read(&session.chunk_path(index)).await?;
            while let Some(bytes) = chunk.next().await {
                let bytes = bytes?;
                size_bytes += bytes.len() as i64;
                digest.consume(&bytes);
                out.write_all(&bytes).await?;
            }
        }
        out.flush().await?;
        out.sync_all().await?;

        Ok((size_bytes, format!("{:x}", digest.compute())))
    }

    /// Record `err` on the session and hand it back to the caller.
    async fn fail(&self, session: &UploadSession, err: UploadError) -> UploadResult<MediaFile> {
        error!(session_id = %session.id, error = %err, "assembly failed");
        match settle(
            &*self.sessions,
            session,
            Terminal::Failed(err.to_string()),
            self.policy.conflict_retries,
        )
        .await
        {
            Ok(Settled::Won(_)) => {
                delete_chunk_objects(&*self.chunks, session).await;
                Err(err)
            }
            Ok(Settled::Lost(current)) if current.status == UploadSessionStatus::Failed => {
                Err(err)
            }
            Ok(Settled::Lost(current)) => self.outcome_of(&current).await,
            Err(settle_err) => {
                error!(
                    session_id = %session.id,
                    error = %settle_err,
                    "could not record assembly failure"
                );
                Err(err)
            }
        }
    }

    /// Read-only view of what a terminal session produced.
    async fn outcome_of(&self, session: &UploadSession) -> UploadResult<MediaFile> {
        match (session.status, session.media_file_id) {
            (UploadSessionStatus::Completed, Some(media_file_id)) => self
                .sessions
                .load_media_file(media_file_id, &session.owner_id)
                .await?
                .ok_or_else(|| UploadError::InvalidState {
                    id: session.id,
                    status: session.status,
                    reason: Some(format!("media file {} is missing", media_file_id)),
                }),
            (UploadSessionStatus::Expired, _) => Err(UploadError::Expired {
                id: session.id,
                expires_at: session.expires_at,
            }),
            (status, _) => Err(UploadError::InvalidState {
                id: session.id,
                status,
                reason: session.failure_reason.clone(),
            }),
        }
    }
}

/// Best-effort removal of every chunk object a session may have written.
///
/// Errors are logged and swallowed.
pub async fn delete_chunk_objects(chunks: &dyn ChunkStore, session: &UploadSession) {
    for index in 0..session.total_chunks {
        let path = session.chunk_path(index);
        if let Err(err) = chunks.delete(&path).await {
            warn!(session_id = %session.id, path = %path, error = %err, "failed to delete chunk");
        }
    }
}

async fn remove_temp_file(path: &Path) {
    match fs::remove_file(path).await {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!("failed to remove merge file {}: {}", path.display(), err),
    }
}

/// True if `actual` is within `tolerance` (fraction) of `declared`, inclusive.
fn within_tolerance(declared: i64, actual: i64, tolerance: f64) -> bool {
    let diff = (actual - declared).unsigned_abs() as f64;
    diff <= declared as f64 * tolerance
}

/// Session-scoped path of the assembled object.
fn final_object_path(session: &UploadSession) -> String {
    format!(
        "{}/{}",
        session.storage_key_prefix,
        sanitize_file_name(&session.original_file_name)
    )
}

/// Reduce an untrusted file name to a single safe path segment.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "media".to_string()
    } else if cleaned.starts_with("chunk_") {
        // chunk objects share the prefix
        format!("media_{}", cleaned)
    } else {
        cleaned.to_string()
    }
}
