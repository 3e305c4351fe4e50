//! Storage abstraction for the analysis pipeline.
//!
//! The pipeline reads incidents through [`IncidentStore`] and writes its
//! output through [`AnalysisSink`]. Both are owned by collaborators: the
//! SQLite implementation lives in the `bugseek` crate, and [`memory`] provides
//! an in-process one for tests and embedding.
//!
//! Every operation returns `Result<_, PersistError>` so callers can decide per
//! step whether a failed write is fatal. The analysis orchestrator treats
//! them as non-fatal and reports them.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`get_incident`](IncidentStore::get_incident) | Load one incident |
//! | [`list_incidents`](IncidentStore::list_incidents) | Bounded candidate pool, newest first |
//! | [`upsert_analysis_result`](AnalysisSink::upsert_analysis_result) | Insert or replace the row for (incident, type) |
//! | [`get_analysis_result`](AnalysisSink::get_analysis_result) | Current row for (incident, type) |
//! | [`insert_similarity_match`](AnalysisSink::insert_similarity_match) | Append one edge |
//! | [`list_similarity_matches`](AnalysisSink::list_similarity_matches) | Latest edge per target |
//! | [`get_or_create_service_status`](AnalysisSink::get_or_create_service_status) | Singleton status row |
//! | [`update_service_status`](AnalysisSink::update_service_status) | Atomic increment of the status row |

pub mod memory;

use async_trait::async_trait;

use crate::models::{
    AnalysisResult, AnalysisType, Incident, ServiceIdentity, ServiceStatus, SimilarityMatch,
    StatusDelta,
};

/// Failure of a single store operation.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("store lock poisoned")]
    Poisoned,
}

impl PersistError {
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        PersistError::Backend(err.into())
    }
}

/// Read access to incidents owned by the ingestion side.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn get_incident(&self, id: &str) -> Result<Option<Incident>, PersistError>;

    /// Up to `limit` incidents other than `excluding`, newest first.
    async fn list_incidents(
        &self,
        excluding: &str,
        limit: usize,
    ) -> Result<Vec<Incident>, PersistError>;
}

/// Write side for everything the pipeline derives.
#[async_trait]
pub trait AnalysisSink: Send + Sync {
    /// Insert or replace the row keyed by `(incident_id, analysis_type)`.
    async fn upsert_analysis_result(&self, result: &AnalysisResult) -> Result<(), PersistError>;

    async fn get_analysis_result(
        &self,
        incident_id: &str,
        analysis_type: AnalysisType,
    ) -> Result<Option<AnalysisResult>, PersistError>;

    /// Append an edge. Existing edges are never touched.
    async fn insert_similarity_match(&self, edge: &SimilarityMatch) -> Result<(), PersistError>;

    /// The most recent edge per target for `source_id`, by descending score.
    async fn list_similarity_matches(
        &self,
        source_id: &str,
    ) -> Result<Vec<SimilarityMatch>, PersistError>;

    /// Return the singleton status, creating it with `identity` if absent.
    async fn get_or_create_service_status(
        &self,
        identity: &ServiceIdentity,
    ) -> Result<ServiceStatus, PersistError>;

    /// Apply `delta` to the singleton status as one atomic update.
    async fn update_service_status(&self, delta: &StatusDelta) -> Result<(), PersistError>;
}

/// Keep only the newest edge per target, then order by score.
pub fn latest_per_target(mut edges: Vec<SimilarityMatch>) -> Vec<SimilarityMatch> {
    edges.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let mut seen = std::collections::HashSet::new();
    edges.retain(|e| seen.insert(e.target_incident_id.clone()));
    edges.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.target_incident_id.cmp(&b.target_incident_id))
    });
    edges
}
