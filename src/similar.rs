//! Similar-incident lookup.
//!
//! Scores a bounded pool of recent incidents against the target with
//! [`bugseek_core::similarity`], records every match above the threshold as a
//! new edge, and returns the best few. Edge writes run concurrently; each is
//! retried once and a write that still fails is counted, not raised.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use bugseek_core::models::SimilarityMatch;
use bugseek_core::similarity::{rank_candidates, HEURISTIC_METHOD};
use bugseek_core::store::{AnalysisSink, IncidentStore, PersistError};

use crate::config::SimilarityConfig;

/// Attempts per edge write.
const WRITE_ATTEMPTS: usize = 2;

/// Outcome of [`SimilarityEngine::find_similar`].
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityReport {
    pub incident_id: String,
    pub threshold: f64,
    /// Best matches, highest score first, at most `result_limit`.
    pub matches: Vec<SimilarityMatch>,
    /// Number of candidates at or above the threshold before truncation.
    pub total_found: usize,
    /// Edges that could not be written after retrying.
    pub persist_failures: usize,
}

pub struct SimilarityEngine {
    incidents: Arc<dyn IncidentStore>,
    sink: Arc<dyn AnalysisSink>,
    config: SimilarityConfig,
}

impl SimilarityEngine {
    pub fn new(
        incidents: Arc<dyn IncidentStore>,
        sink: Arc<dyn AnalysisSink>,
        config: SimilarityConfig,
    ) -> Self {
        Self {
            incidents,
            sink,
            config,
        }
    }

    /// Find incidents similar to `incident_id`.
    ///
    /// `threshold` defaults to the configured value and is clamped to
    /// `[0.0, 1.0]`. Fails only when the target cannot be loaded or the
    /// candidate pool cannot be listed.
    pub async fn find_similar(
        &self,
        incident_id: &str,
        threshold: Option<f64>,
    ) -> Result<SimilarityReport, PersistError> {
        let threshold = threshold
            .unwrap_or(self.config.threshold)
            .clamp(0.0, 1.0);

        let target = self
            .incidents
            .get_incident(incident_id)
            .await?
            .ok_or_else(|| PersistError::NotFound(format!("incident {}", incident_id)))?;
        let pool = self
            .incidents
            .list_incidents(incident_id, self.config.candidate_limit)
            .await?;

        let ranked = rank_candidates(&target, &pool, threshold);
        debug!(
            incident_id,
            candidates = pool.len(),
            found = ranked.len(),
            "scored similarity candidates"
        );

        let edges: Vec<SimilarityMatch> = ranked
            .iter()
            .map(|c| SimilarityMatch::new(incident_id, &c.incident_id, c.score, HEURISTIC_METHOD))
            .collect();

        let written = join_all(edges.iter().map(|edge| self.write_edge(edge))).await;
        let persist_failures = written.iter().filter(|ok| !**ok).count();
        if persist_failures > 0 {
            warn!(incident_id, persist_failures, "some similarity matches were not stored");
        }

        let total_found = edges.len();
        let mut matches = edges;
        matches.truncate(self.config.result_limit);

        info!(incident_id, total_found, threshold, "similarity search finished");
        Ok(SimilarityReport {
            incident_id: incident_id.to_string(),
            threshold,
            matches,
            total_found,
            persist_failures,
        })
    }

    async fn write_edge(&self, edge: &SimilarityMatch) -> bool {
        for attempt in 1..=WRITE_ATTEMPTS {
            match self.sink.insert_similarity_match(edge).await {
                Ok(()) => return true,
                Err(e) => warn!(
                    source = %edge.source_incident_id,
                    target = %edge.target_incident_id,
                    attempt,
                    error = %e,
                    "similarity match write failed"
                ),
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bugseek_core::models::{
        AnalysisResult, AnalysisType, ConfidenceTier, Incident, IncidentMetadata,
        ServiceIdentity, ServiceStatus, StatusDelta,
    };
    use bugseek_core::store::memory::InMemoryStore;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn incident(id: &str, team: &str, module: &str, error: &str, desc: &str, age: i64) -> Incident {
        Incident {
            id: id.to_string(),
            content: String::new(),
            metadata: IncidentMetadata {
                team_name: team.to_string(),
                module: module.to_string(),
                error_name: error.to_string(),
                description: desc.to_string(),
                ..Default::default()
            },
            created_at: Utc::now() - Duration::seconds(age),
        }
    }

    fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_incident(incident("t", "Core", "Camera", "HAL_CRASH", "camera service crashed", 0))
            .unwrap();
        // Same team/module/error, half the description words shared: 0.3+0.2+0.1+0.2 = 0.8.
        store
            .insert_incident(incident("a", "core", "camera ", "hal_crash", "camera service hung", 10))
            .unwrap();
        // Same error and module only -> 0.5.
        store
            .insert_incident(incident("b", "Media", "Camera", "HAL_CRASH", "unrelated words here", 20))
            .unwrap();
        // Identical -> 1.0.
        store
            .insert_incident(incident("c", "Core", "Camera", "HAL_CRASH", "camera service crashed", 30))
            .unwrap();
        store
    }

    fn engine(store: Arc<InMemoryStore>, sink: Arc<dyn AnalysisSink>) -> SimilarityEngine {
        SimilarityEngine::new(store, sink, SimilarityConfig::default())
    }

    #[tokio::test]
    async fn test_find_similar_filters_and_sorts() {
        let store = seeded_store();
        let engine = engine(store.clone(), store.clone());

        let report = engine.find_similar("t", None).await.unwrap();
        let ids: Vec<&str> = report
            .matches
            .iter()
            .map(|m| m.target_incident_id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "a"]);
        assert_eq!(report.total_found, 2);
        assert_eq!(report.persist_failures, 0);
        assert_eq!(report.matches[1].score, 0.8);
        assert_eq!(report.matches[1].confidence, ConfidenceTier::High);
        assert!(report.matches.iter().all(|m| m.score >= 0.7));

        assert_eq!(store.all_similarity_matches().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_high_threshold_finds_nothing() {
        let store = seeded_store();
        store
            .insert_incident(incident("t2", "Core", "Camera", "HAL_CRASH", "camera service crashed", 5))
            .unwrap();
        let engine = engine(store.clone(), store.clone());

        let report = engine.find_similar("a", Some(0.9)).await.unwrap();
        assert!(report.matches.is_empty());
        assert_eq!(report.total_found, 0);
    }

    #[tokio::test]
    async fn test_result_limit_truncates_but_counts_all() {
        let store = seeded_store();
        let mut config = SimilarityConfig::default();
        config.result_limit = 1;
        let engine = SimilarityEngine::new(store.clone(), store.clone(), config);

        let report = engine.find_similar("t", Some(0.5)).await.unwrap();
        assert_eq!(report.total_found, 3);
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].target_incident_id, "c");
        assert_eq!(store.all_similarity_matches().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_rerun_appends_edges() {
        let store = seeded_store();
        let engine = engine(store.clone(), store.clone());
        engine.find_similar("t", None).await.unwrap();
        engine.find_similar("t", None).await.unwrap();

        assert_eq!(store.all_similarity_matches().unwrap().len(), 4);
        assert_eq!(store.list_similarity_matches("t").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_incident() {
        let store = seeded_store();
        let engine = engine(store.clone(), store.clone());
        let err = engine.find_similar("missing", None).await.unwrap_err();
        assert!(matches!(err, PersistError::NotFound(_)));
    }

    /// Sink that fails the first `fail_first` edge writes.
    struct FlakySink {
        inner: InMemoryStore,
        fail_first: usize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl AnalysisSink for FlakySink {
        async fn upsert_analysis_result(&self, r: &AnalysisResult) -> Result<(), PersistError> {
            self.inner.upsert_analysis_result(r).await
        }
        async fn get_analysis_result(
            &self,
            incident_id: &str,
            t: AnalysisType,
        ) -> Result<Option<AnalysisResult>, PersistError> {
            self.inner.get_analysis_result(incident_id, t).await
        }
        async fn insert_similarity_match(&self, e: &SimilarityMatch) -> Result<(), PersistError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) < self.fail_first {
                return Err(PersistError::backend("database is locked"));
            }
            self.inner.insert_similarity_match(e).await
        }
        async fn list_similarity_matches(
            &self,
            source_id: &str,
        ) -> Result<Vec<SimilarityMatch>, PersistError> {
            self.inner.list_similarity_matches(source_id).await
        }
        async fn get_or_create_service_status(
            &self,
            identity: &ServiceIdentity,
        ) -> Result<ServiceStatus, PersistError> {
            self.inner.get_or_create_service_status(identity).await
        }
        async fn update_service_status(&self, d: &StatusDelta) -> Result<(), PersistError> {
            self.inner.update_service_status(d).await
        }
    }

    #[tokio::test]
    async fn test_single_failure_is_retried() {
        let store = seeded_store();
        let sink = Arc::new(FlakySink {
            inner: InMemoryStore::new(),
            fail_first: 1,
            writes: AtomicUsize::new(0),
        });
        let engine = engine(store, sink.clone());

        let report = engine.find_similar("t", None).await.unwrap();
        assert_eq!(report.persist_failures, 0);
        assert_eq!(sink.inner.all_similarity_matches().unwrap().len(), 2);
        assert_eq!(sink.writes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_write_failures_are_counted_not_raised() {
        let store = seeded_store();
        let sink = Arc::new(FlakySink {
            inner: InMemoryStore::new(),
            fail_first: usize::MAX,
            writes: AtomicUsize::new(0),
        });
        let engine = engine(store, sink.clone());

        let report = engine.find_similar("t", None).await.unwrap();
        assert_eq!(report.matches.len(), 2);
        assert_eq!(report.persist_failures, 2);
        assert_eq!(sink.writes.load(Ordering::SeqCst), 4);
    }
}
