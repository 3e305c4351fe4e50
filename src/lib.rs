//! # BugSeek
//!
//! Error log triage: deterministic pattern recognition, AI summaries and
//! remediation suggestions with retry and usage accounting, and heuristic
//! similar-incident lookup.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │  import    │──▶│        Analyzer          │──▶│  SQLite  │
//! │ (JSON)     │   │ patterns → AI → fallback │   │          │
//! └────────────┘   └────────────┬─────────────┘   └────┬─────┘
//!                               │ AiClient             │
//!                               ▼                      │
//!                        chat-completion API           │
//!                                                      │
//!                      ┌───────────────────────────────┤
//!                      ▼                               ▼
//!                 ┌──────────┐                   ┌──────────┐
//!                 │   CLI    │                   │   HTTP   │
//!                 │(bugseek) │                   │  (axum)  │
//!                 └──────────┘                   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! bugseek init                     # create database
//! bugseek import incidents.json    # load incidents
//! bugseek analyze CR-1042          # pattern + AI analysis
//! bugseek similar CR-1042          # related incidents
//! bugseek serve                    # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the store traits |
//! | [`incidents`] | Incident import |
//! | [`ai_client`] | Chat-completion client, prompts, reply parsing |
//! | [`analysis`] | Analysis orchestration |
//! | [`similar`] | Similar-incident lookup |
//! | [`app`] | Component wiring |
//! | [`commands`] | CLI command implementations |
//! | [`server`] | HTTP server |
//!
//! Pure logic (models, pattern rules, similarity scoring, store traits)
//! lives in the `bugseek-core` crate and is re-exported as [`core`].

pub use bugseek_core as core;

pub mod ai_client;
pub mod analysis;
pub mod app;
pub mod commands;
pub mod config;
pub mod db;
pub mod incidents;
pub mod migrate;
pub mod server;
pub mod similar;
pub mod sqlite_store;
