//! Subscription plan tiers and the per-file limits they grant.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Pro,
}

/// Limits applied to a single uploaded file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PlanDefinition {
    pub tier: PlanTier,
    pub max_file_size_bytes: i64,
    pub max_minutes_per_file: f64,
}

const MIB: i64 = 1024 * 1024;

impl PlanDefinition {
    pub fn for_tier(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Free => Self {
                tier,
                max_file_size_bytes: 200 * MIB,
                max_minutes_per_file: 30.0,
            },
            PlanTier::Pro => Self {
                tier,
                max_file_size_bytes: 5 * 1024 * MIB,
                max_minutes_per_file: 300.0,
            },
        }
    }
}
