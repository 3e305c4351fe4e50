//! # BugSeek Core
//!
//! Pure logic for BugSeek's analysis pipeline: incident and analysis models,
//! the error pattern rule table, heuristic similarity scoring, and the store
//! traits the pipeline persists through.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem I/O. The `bugseek`
//! crate supplies the SQLite store, the AI client and the orchestration.

pub mod models;
pub mod patterns;
pub mod similarity;
pub mod store;
