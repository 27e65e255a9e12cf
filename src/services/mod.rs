//! Upload pipeline services and the collaborator seams they depend on.

pub mod assembler;
pub mod chunk_store;
pub mod errors;
pub mod media_probe;
pub mod plan_guard;
pub mod session_store;
pub mod sweeper;
pub mod upload_service;
