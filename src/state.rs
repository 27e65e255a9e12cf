//! Shared router state.

use crate::services::upload_service::UploadService;
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadService,
    /// Used by the readiness probe.
    pub db: Arc<SqlitePool>,
    /// Root of chunk storage, checked by the readiness probe.
    pub storage_dir: PathBuf,
}
