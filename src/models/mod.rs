//! Core data models for the album pipeline.
//!
//! These entities map to SQLite tables via `sqlx::FromRow` and serialize
//! as JSON via `serde`.

pub mod album;
pub mod profile;
pub mod task;
