//! Periodic reclamation of abandoned upload sessions.
//!
//! Expiry is normally enforced lazily on access; sessions nobody touches
//! again are picked up here. The sweeper does not schedule itself: it is run
//! by an external scheduler (or `--sweep-expired`).

use crate::{
    config::UploadPolicy,
    services::{
        assembler::delete_chunk_objects,
        chunk_store::ChunkStore,
        errors::UploadResult,
        session_store::{SessionStore, Settled, Terminal, settle},
    },
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Sessions this run moved to `expired`.
    pub expired: usize,
    /// Sessions another writer settled first.
    pub skipped: usize,
    /// Sessions whose transition failed with an error.
    pub failed: usize,
}

#[derive(Clone)]
pub struct StaleSessionSweeper {
    sessions: Arc<dyn SessionStore>,
    chunks: Arc<dyn ChunkStore>,
    policy: UploadPolicy,
}

impl StaleSessionSweeper {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        chunks: Arc<dyn ChunkStore>,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            sessions,
            chunks,
            policy,
        }
    }

    /// Expire up to `limit` active sessions past their TTL and delete their chunks.
    pub async fn sweep(&self, limit: i64) -> UploadResult<SweepReport> {
        let now = Utc::now();
        let stale = self.sessions.list_expired_active(now, limit).await?;
        let mut report = SweepReport::default();

        if stale.is_empty() {
            return Ok(report);
        }
        info!("Found {} stale upload sessions to expire", stale.len());

        for session in stale.into_iter().filter(|s| s.is_expired_at(now)) {
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
                    report.expired += 1;
                }
                Ok(Settled::Lost(_)) => report.skipped += 1,
                Err(err) => {
                    error!(session_id = %session.id, error = %err, "failed to expire stale session");
                    report.failed += 1;
                }
            }
        }

        info!(
            expired = report.expired,
            skipped = report.skipped,
            failed = report.failed,
            "stale session sweep finished"
        );
        Ok(report)
    }
}
