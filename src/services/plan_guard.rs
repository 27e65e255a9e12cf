//! Plan resolution and per-file quota checks.

use crate::{
    models::plan::{PlanDefinition, PlanTier},
    services::errors::{UploadError, UploadResult},
};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Looks up which plan an owner is on.
#[async_trait]
pub trait PlanResolver: Send + Sync {
    async fn resolve(&self, owner_id: &str) -> UploadResult<PlanDefinition>;
}

/// Reads the `owner_plans` table; owners without a row are on the free tier.
#[derive(Clone)]
pub struct SqlitePlanResolver {
    db: Arc<SqlitePool>,
}

impl SqlitePlanResolver {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PlanResolver for SqlitePlanResolver {
    async fn resolve(&self, owner_id: &str) -> UploadResult<PlanDefinition> {
        let tier = sqlx::query_scalar::<_, PlanTier>("SELECT plan FROM owner_plans WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_optional(&*self.db)
            .await?
            .unwrap_or(PlanTier::Free);
        Ok(PlanDefinition::for_tier(tier))
    }
}

/// Pure validation of sizes and durations against a plan.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlanGuard;

impl PlanGuard {
    pub fn check_size(&self, plan: &PlanDefinition, size_bytes: i64) -> UploadResult<()> {
        if size_bytes > plan.max_file_size_bytes {
            return Err(UploadError::QuotaExceeded(format!(
                "file size ({} bytes) exceeds the {} bytes allowed per file",
                size_bytes, plan.max_file_size_bytes
            )));
        }
        Ok(())
    }

    pub fn check_duration(&self, plan: &PlanDefinition, minutes: f64) -> UploadResult<()> {
        if minutes > plan.max_minutes_per_file {
            return Err(UploadError::QuotaExceeded(format!(
                "duration ({:.1} min) exceeds the {} min allowed per file",
                minutes, plan.max_minutes_per_file
            )));
        }
        Ok(())
    }
}
