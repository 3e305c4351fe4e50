//! In-memory [`IncidentStore`] + [`AnalysisSink`] for tests and embedding.
//!
//! Uses `Vec`/`HashMap` behind `std::sync::RwLock`. The service status lives
//! behind a `Mutex` and deltas are applied in place while the lock is held,
//! so concurrent updates never lose increments.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;

use crate::models::{
    AnalysisResult, AnalysisType, Incident, ServiceIdentity, ServiceStatus, SimilarityMatch,
    StatusDelta,
};

use super::{latest_per_target, AnalysisSink, IncidentStore, PersistError};

/// In-memory store.
pub struct InMemoryStore {
    incidents: RwLock<Vec<Incident>>,
    analyses: RwLock<HashMap<(String, AnalysisType), AnalysisResult>>,
    edges: RwLock<Vec<SimilarityMatch>>,
    status: Mutex<Option<ServiceStatus>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            incidents: RwLock::new(Vec::new()),
            analyses: RwLock::new(HashMap::new()),
            edges: RwLock::new(Vec::new()),
            status: Mutex::new(None),
        }
    }

    /// Add or replace an incident. Stands in for the ingestion collaborator.
    pub fn insert_incident(&self, incident: Incident) -> Result<(), PersistError> {
        let mut incidents = self.incidents.write().map_err(|_| PersistError::Poisoned)?;
        incidents.retain(|i| i.id != incident.id);
        incidents.push(incident);
        Ok(())
    }

    /// Every edge ever written, in insertion order.
    pub fn all_similarity_matches(&self) -> Result<Vec<SimilarityMatch>, PersistError> {
        Ok(self
            .edges
            .read()
            .map_err(|_| PersistError::Poisoned)?
            .clone())
    }

    /// Current status without creating it.
    pub fn service_status(&self) -> Result<Option<ServiceStatus>, PersistError> {
        Ok(self
            .status
            .lock()
            .map_err(|_| PersistError::Poisoned)?
            .clone())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IncidentStore for InMemoryStore {
    async fn get_incident(&self, id: &str) -> Result<Option<Incident>, PersistError> {
        let incidents = self.incidents.read().map_err(|_| PersistError::Poisoned)?;
        Ok(incidents.iter().find(|i| i.id == id).cloned())
    }

    async fn list_incidents(
        &self,
        excluding: &str,
        limit: usize,
    ) -> Result<Vec<Incident>, PersistError> {
        let incidents = self.incidents.read().map_err(|_| PersistError::Poisoned)?;
        let mut pool: Vec<Incident> = incidents
            .iter()
            .filter(|i| i.id != excluding)
            .cloned()
            .collect();
        pool.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        pool.truncate(limit);
        Ok(pool)
    }
}

#[async_trait]
impl AnalysisSink for InMemoryStore {
    async fn upsert_analysis_result(&self, result: &AnalysisResult) -> Result<(), PersistError> {
        let mut analyses = self.analyses.write().map_err(|_| PersistError::Poisoned)?;
        analyses.insert(
            (result.incident_id.clone(), result.analysis_type),
            result.clone(),
        );
        Ok(())
    }

    async fn get_analysis_result(
        &self,
        incident_id: &str,
        analysis_type: AnalysisType,
    ) -> Result<Option<AnalysisResult>, PersistError> {
        let analyses = self.analyses.read().map_err(|_| PersistError::Poisoned)?;
        Ok(analyses
            .get(&(incident_id.to_string(), analysis_type))
            .cloned())
    }

    async fn insert_similarity_match(&self, edge: &SimilarityMatch) -> Result<(), PersistError> {
        let mut edges = self.edges.write().map_err(|_| PersistError::Poisoned)?;
        edges.push(edge.clone());
        Ok(())
    }

    async fn list_similarity_matches(
        &self,
        source_id: &str,
    ) -> Result<Vec<SimilarityMatch>, PersistError> {
        let edges = self.edges.read().map_err(|_| PersistError::Poisoned)?;
        let own: Vec<SimilarityMatch> = edges
            .iter()
            .filter(|e| e.source_incident_id == source_id)
            .cloned()
            .collect();
        Ok(latest_per_target(own))
    }

    async fn get_or_create_service_status(
        &self,
        identity: &ServiceIdentity,
    ) -> Result<ServiceStatus, PersistError> {
        let mut status = self.status.lock().map_err(|_| PersistError::Poisoned)?;
        Ok(status
            .get_or_insert_with(|| ServiceStatus::new(identity.clone()))
            .clone())
    }

    async fn update_service_status(&self, delta: &StatusDelta) -> Result<(), PersistError> {
        let mut status = self.status.lock().map_err(|_| PersistError::Poisoned)?;
        status
            .get_or_insert_with(|| ServiceStatus::new(ServiceIdentity::default()))
            .apply(delta);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IncidentMetadata;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn incident(id: &str, age_secs: i64) -> Incident {
        Incident {
            id: id.to_string(),
            content: format!("log for {}", id),
            metadata: IncidentMetadata::default(),
            created_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn test_list_incidents_excludes_and_limits() {
        let store = InMemoryStore::new();
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            store.insert_incident(incident(id, i as i64 * 10)).unwrap();
        }
        let pool = store.list_incidents("a", 2).await.unwrap();
        let ids: Vec<&str> = pool.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_per_incident_and_type() {
        let store = InMemoryStore::new();
        let mut r = AnalysisResult::new("inc", AnalysisType::Complete);
        store.upsert_analysis_result(&r).await.unwrap();
        r.summary = Some("second".to_string());
        store.upsert_analysis_result(&r).await.unwrap();

        let got = store
            .get_analysis_result("inc", AnalysisType::Complete)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.summary.as_deref(), Some("second"));
        assert_eq!(store.analyses.read().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_edges_append_but_list_latest() {
        let store = InMemoryStore::new();
        let mut old = SimilarityMatch::new("s", "t", 0.75, "heuristic");
        old.created_at = Utc::now() - Duration::seconds(60);
        store.insert_similarity_match(&old).await.unwrap();
        store
            .insert_similarity_match(&SimilarityMatch::new("s", "t", 0.9, "heuristic"))
            .await
            .unwrap();
        store
            .insert_similarity_match(&SimilarityMatch::new("s", "u", 0.7, "heuristic"))
            .await
            .unwrap();

        assert_eq!(store.all_similarity_matches().unwrap().len(), 3);
        let latest = store.list_similarity_matches("s").await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].target_incident_id, "t");
        assert_eq!(latest[0].score, 0.9);
    }

    #[tokio::test]
    async fn test_concurrent_status_updates_are_not_lost() {
        let store = Arc::new(InMemoryStore::new());
        store
            .get_or_create_service_status(&ServiceIdentity::default())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    store
                        .update_service_status(&StatusDelta::success(10, 0.001))
                        .await
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let status = store.service_status().unwrap().unwrap();
        assert_eq!(status.total_calls, 400);
        assert_eq!(status.total_tokens, 4000);
    }
}
