//! Schema migrations for the analysis tables.
//!
//! All statements are idempotent; `bugseek init` may run any number of times.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Incidents are written by the ingestion side; the core only reads them.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS incidents (
            id TEXT PRIMARY KEY,
            team_name TEXT NOT NULL DEFAULT '',
            module TEXT NOT NULL DEFAULT '',
            error_name TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            owner TEXT NOT NULL DEFAULT '',
            log_file_name TEXT NOT NULL DEFAULT '',
            declared_severity TEXT,
            environment TEXT,
            content TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_results (
            id TEXT PRIMARY KEY,
            incident_id TEXT NOT NULL,
            analysis_type TEXT NOT NULL,
            status TEXT NOT NULL,
            summary TEXT,
            confidence REAL NOT NULL DEFAULT 0,
            keywords_json TEXT NOT NULL DEFAULT '[]',
            solutions_json TEXT NOT NULL DEFAULT '[]',
            root_cause TEXT,
            investigation_areas_json TEXT NOT NULL DEFAULT '[]',
            error_pattern TEXT,
            error_category TEXT,
            estimated_severity TEXT,
            ai_severity TEXT,
            model_used TEXT,
            tokens_used INTEGER NOT NULL DEFAULT 0,
            estimated_cost REAL NOT NULL DEFAULT 0,
            attempt INTEGER NOT NULL DEFAULT 1,
            started_at INTEGER,
            finished_at INTEGER,
            error_message TEXT,
            UNIQUE(incident_id, analysis_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only: re-scoring a pair adds a row.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS similarity_matches (
            id TEXT PRIMARY KEY,
            source_incident_id TEXT NOT NULL,
            target_incident_id TEXT NOT NULL,
            score REAL NOT NULL,
            method TEXT NOT NULL,
            confidence TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS service_status (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            endpoint TEXT NOT NULL DEFAULT '',
            model TEXT NOT NULL DEFAULT '',
            api_key_hash TEXT,
            is_connected INTEGER NOT NULL DEFAULT 0,
            last_check_at INTEGER,
            last_success_at INTEGER,
            last_error TEXT,
            total_calls INTEGER NOT NULL DEFAULT 0,
            total_tokens INTEGER NOT NULL DEFAULT 0,
            estimated_cost REAL NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_incidents_created_at ON incidents(created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_similarity_source ON similarity_matches(source_incident_id, created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_analysis_status ON analysis_results(status)")
        .execute(pool)
        .await?;

    Ok(())
}
