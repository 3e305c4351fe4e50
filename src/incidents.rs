//! Incident import.
//!
//! `bugseek import <file.json>` reads a JSON array of incident records and
//! upserts them into the `incidents` table. A record carries its log text
//! inline (`content`) or points at a file (`log_file`, resolved relative to
//! the JSON file). Content longer than `[ingest] preview_bytes` is cut at a
//! character boundary.
//!
//! ```json
//! [
//!   {
//!     "id": "CR-1042",
//!     "team_name": "Camera",
//!     "module": "HAL",
//!     "error_name": "HAL_CRASH",
//!     "description": "camera hal crashed on boot",
//!     "log_file": "logs/cr-1042.txt"
//!   }
//! ]
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use bugseek_core::models::{Incident, IncidentMetadata};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// One entry of an import file.
#[derive(Debug, Deserialize)]
pub struct IncidentRecord {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(flatten)]
    pub metadata: IncidentMetadata,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Counts reported by [`run_import`].
#[derive(Debug, Default, PartialEq)]
pub struct ImportStats {
    pub imported: usize,
    pub truncated: usize,
}

/// Cut `text` to at most `max_bytes` without splitting a character.
pub fn truncate_to_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Turn parsed records into incidents. Returns the incidents and how many were truncated.
pub fn build_incidents(
    records: Vec<IncidentRecord>,
    base_dir: &Path,
    preview_bytes: usize,
) -> Result<(Vec<Incident>, usize)> {
    let mut incidents = Vec::with_capacity(records.len());
    let mut truncated = 0;

    for (index, record) in records.into_iter().enumerate() {
        let content = match (record.content, &record.log_file) {
            (Some(content), _) => content,
            (None, Some(file)) => {
                let path = base_dir.join(file);
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("Failed to read log file: {}", path.display()))?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
            (None, None) => String::new(),
        };

        let cut = truncate_to_bytes(&content, preview_bytes);
        if cut.len() < content.len() {
            truncated += 1;
        }

        let id = record
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        debug!(index, id = %id, bytes = cut.len(), "prepared incident");

        let mut metadata = record.metadata;
        if metadata.log_file_name.is_empty() {
            if let Some(name) = record.log_file.as_ref().and_then(|p| p.file_name()) {
                metadata.log_file_name = name.to_string_lossy().into_owned();
            }
        }

        incidents.push(Incident {
            id,
            content: cut.to_string(),
            metadata,
            created_at: record.created_at.unwrap_or_else(Utc::now),
        });
    }

    Ok((incidents, truncated))
}

/// Load incidents from a JSON file into the database.
pub async fn import_file(config: &Config, path: &Path) -> Result<ImportStats> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let records: Vec<IncidentRecord> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of incidents", path.display()))?;
    if records.is_empty() {
        bail!("{} contains no incidents", path.display());
    }

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let (incidents, truncated) =
        build_incidents(records, base_dir, config.ingest.preview_bytes)?;

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    for incident in &incidents {
        store
            .insert_incident(incident)
            .await
            .with_context(|| format!("Failed to store incident {}", incident.id))?;
    }
    pool.close().await;

    Ok(ImportStats {
        imported: incidents.len(),
        truncated,
    })
}

pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let stats = import_file(config, path).await?;
    println!("import {}", path.display());
    println!("  incidents: {}", stats.imported);
    println!("  truncated: {}", stats.truncated);
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate_to_bytes("abcdef", 4), "abcd");
        // 'é' is two bytes; cutting inside it backs off.
        assert_eq!(truncate_to_bytes("aé", 2), "a");
        assert_eq!(truncate_to_bytes("short", 100), "short");
    }

    #[test]
    fn test_build_from_inline_and_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("logs")).unwrap();
        std::fs::write(tmp.path().join("logs/one.txt"), "Kernel panic - not syncing").unwrap();

        let records: Vec<IncidentRecord> = serde_json::from_str(
            r#"[
                {"id": "A", "module": "Kernel", "log_file": "logs/one.txt"},
                {"team_name": "Camera", "content": "0123456789"},
                {"id": "C"}
            ]"#,
        )
        .unwrap();

        let (incidents, truncated) = build_incidents(records, tmp.path(), 8).unwrap();
        assert_eq!(incidents.len(), 3);
        assert_eq!(truncated, 2);
        assert_eq!(incidents[0].id, "A");
        assert_eq!(incidents[0].content, "Kernel p");
        assert_eq!(incidents[0].metadata.log_file_name, "one.txt");
        assert_eq!(incidents[1].metadata.team_name, "Camera");
        assert_eq!(incidents[1].id.len(), 36);
        assert_eq!(incidents[2].content, "");
    }

    #[test]
    fn test_missing_log_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let records: Vec<IncidentRecord> =
            serde_json::from_str(r#"[{"id": "A", "log_file": "nope.txt"}]"#).unwrap();
        let err = build_incidents(records, tmp.path(), 100).unwrap_err();
        assert!(err.to_string().contains("nope.txt"));
    }
}
