//! Heuristic incident similarity.
//!
//! Scores are additive and capped at `1.0`:
//!
//! | Signal | Weight |
//! |--------|--------|
//! | same error name | `0.3` |
//! | same module | `0.2` |
//! | same team | `0.1` |
//! | Jaccard overlap of description words | `× 0.4` |
//!
//! Field comparisons are trimmed and case-insensitive; an empty field never
//! counts as a match. The score is a pure function of the two incidents and
//! symmetric in its arguments.

use std::collections::HashSet;

use serde::Serialize;

use crate::models::Incident;

pub const ERROR_NAME_WEIGHT: f64 = 0.3;
pub const MODULE_WEIGHT: f64 = 0.2;
pub const TEAM_WEIGHT: f64 = 0.1;
pub const DESCRIPTION_WEIGHT: f64 = 0.4;

/// Method label stored on every edge produced here.
pub const HEURISTIC_METHOD: &str = "heuristic";

/// Default minimum score for a candidate to count as similar.
pub const DEFAULT_THRESHOLD: f64 = 0.7;

fn same_field(a: &str, b: &str) -> bool {
    let a = a.trim();
    let b = b.trim();
    !a.is_empty() && a.eq_ignore_ascii_case(b)
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

/// Jaccard similarity of the lowercase whitespace-separated word sets.
///
/// Returns `0.0` when both texts are empty.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let wa = word_set(a);
    let wb = word_set(b);
    let union = wa.union(&wb).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = wa.intersection(&wb).count();
    intersection as f64 / union as f64
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Similarity between two incidents in `[0.0, 1.0]`, rounded to 4 decimals.
pub fn similarity_score(a: &Incident, b: &Incident) -> f64 {
    let mut score = 0.0;
    if same_field(&a.metadata.error_name, &b.metadata.error_name) {
        score += ERROR_NAME_WEIGHT;
    }
    if same_field(&a.metadata.module, &b.metadata.module) {
        score += MODULE_WEIGHT;
    }
    if same_field(&a.metadata.team_name, &b.metadata.team_name) {
        score += TEAM_WEIGHT;
    }
    score += jaccard(&a.metadata.description, &b.metadata.description) * DESCRIPTION_WEIGHT;
    round4(score.min(1.0))
}

/// One candidate that cleared the threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub incident_id: String,
    pub score: f64,
}

/// Score `pool` against `target` and keep candidates at or above `threshold`.
///
/// The target itself is skipped if it appears in the pool. Output is sorted by
/// descending score, ties by incident id, and is not truncated.
pub fn rank_candidates(
    target: &Incident,
    pool: &[Incident],
    threshold: f64,
) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = pool
        .iter()
        .filter(|c| c.id != target.id)
        .map(|c| ScoredCandidate {
            incident_id: c.id.clone(),
            score: similarity_score(target, c),
        })
        .filter(|c| c.score >= threshold)
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.incident_id.cmp(&b.incident_id))
    });
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfidenceTier, IncidentMetadata};
    use chrono::Utc;

    fn incident(id: &str, team: &str, module: &str, error: &str, desc: &str) -> Incident {
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
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_jaccard_basic() {
        assert!((jaccard("a b c", "a b c") - 1.0).abs() < 1e-9);
        assert!((jaccard("a b", "c d")).abs() < 1e-9);
        assert!((jaccard("A b", "a B") - 1.0).abs() < 1e-9);
        assert_eq!(jaccard("", ""), 0.0);
    }

    #[test]
    fn test_full_metadata_half_overlap_scores_point_eight() {
        // word sets {connection, pool, exhausted} and {connection, pool, timeout}
        // share 2 of 4 words
        let a = incident("a", "Backend", "Database", "DB_POOL", "connection pool exhausted");
        let b = incident("b", "Backend", "Database", "DB_POOL", "connection pool timeout");
        let score = similarity_score(&a, &b);
        assert_eq!(score, 0.8);
        assert_eq!(ConfidenceTier::from_score(score), ConfidenceTier::High);
    }

    #[test]
    fn test_symmetric() {
        let a = incident("a", "Backend", "Auth", "TOKEN_EXPIRED", "token expired for user session");
        let b = incident("b", "backend", "Payments", "TOKEN_EXPIRED", "session token rejected");
        assert_eq!(similarity_score(&a, &b), similarity_score(&b, &a));
    }

    #[test]
    fn test_monotonic_in_matching_fields() {
        let base = incident("a", "Backend", "Database", "DB_POOL", "pool exhausted");
        let mut other = incident("b", "Frontend", "UI", "RENDER", "pool exhausted");
        let s0 = similarity_score(&base, &other);

        other.metadata.team_name = "Backend".to_string();
        let s1 = similarity_score(&base, &other);
        other.metadata.module = "Database".to_string();
        let s2 = similarity_score(&base, &other);
        other.metadata.error_name = "DB_POOL".to_string();
        let s3 = similarity_score(&base, &other);

        assert!(s0 <= s1 && s1 <= s2 && s2 <= s3, "{} {} {} {}", s0, s1, s2, s3);
        assert_eq!(s3, 1.0);
    }

    #[test]
    fn test_empty_fields_never_match() {
        let a = incident("a", "", "", "", "");
        let b = incident("b", "", "", "", "");
        assert_eq!(similarity_score(&a, &b), 0.0);
    }

    #[test]
    fn test_rank_filters_and_sorts() {
        let target = incident("t", "Backend", "Database", "DB_POOL", "connection pool exhausted");
        let pool = vec![
            incident("low", "Other", "Other", "OTHER", "unrelated words"),
            incident("mid", "Backend", "Database", "OTHER", "connection pool exhausted"),
            incident("top", "Backend", "Database", "DB_POOL", "connection pool exhausted"),
            incident("t", "Backend", "Database", "DB_POOL", "connection pool exhausted"),
        ];
        let ranked = rank_candidates(&target, &pool, 0.5);
        let ids: Vec<&str> = ranked.iter().map(|c| c.incident_id.as_str()).collect();
        assert_eq!(ids, vec!["top", "mid"]);
        assert!(ranked.iter().all(|c| c.score >= 0.5));
    }

    #[test]
    fn test_rank_threshold_above_best_is_empty() {
        let target = incident("t", "Backend", "Database", "DB_POOL", "connection pool exhausted");
        let pool = vec![incident("b", "Backend", "Database", "DB_POOL", "connection pool timeout")];
        assert!(rank_candidates(&target, &pool, 0.9).is_empty());
    }

    #[test]
    fn test_rank_ties_by_id() {
        let target = incident("t", "Backend", "Database", "X", "same words here");
        let pool = vec![
            incident("z", "Backend", "Database", "X", "same words here"),
            incident("a", "Backend", "Database", "X", "same words here"),
        ];
        let ranked = rank_candidates(&target, &pool, 0.0);
        assert_eq!(ranked[0].incident_id, "a");
        assert_eq!(ranked[1].incident_id, "z");
    }
}
