//! Core data models for the upload pipeline.
//!
//! These entities map to database tables via `sqlx::FromRow` and serialize
//! as JSON via `serde`.

pub mod media_file;
pub mod plan;
pub mod upload_session;
