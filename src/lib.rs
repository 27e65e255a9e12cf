//! Resumable chunked uploads for media files.
//!
//! Clients open an upload session, send chunks in any order (retries and
//! parallel senders included) and the service assembles, validates and
//! records the finished media file exactly once.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
