//! Core data models shared by the analysis pipeline and its stores.
//!
//! Incidents come in from the ingestion side and are never mutated here.
//! Everything the pipeline derives from them ([`AnalysisResult`],
//! [`SimilarityMatch`], [`ServiceStatus`]) is defined alongside so that both
//! the SQLite and in-memory stores speak the same types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity tier, totally ordered `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Lenient parse used for AI replies and stored rows.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::parse(s).ok_or_else(|| format!("unknown severity: '{}'", s))
    }
}

/// Classification metadata attached to an incident by its reporter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentMetadata {
    #[serde(default)]
    pub team_name: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub error_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub log_file_name: String,
    #[serde(default)]
    pub declared_severity: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
}

/// One submitted error report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    /// Log text, possibly truncated to the ingest preview length.
    #[serde(default)]
    pub content: String,
    #[serde(flatten)]
    pub metadata: IncidentMetadata,
    pub created_at: DateTime<Utc>,
}

/// A single rule hit produced by the pattern recognizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub name: String,
    pub category: String,
    pub severity: Severity,
    pub description: String,
}

/// Lifecycle of an [`AnalysisResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(AnalysisStatus::Pending),
            "processing" => Some(AnalysisStatus::Processing),
            "completed" => Some(AnalysisStatus::Completed),
            "failed" => Some(AnalysisStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of analysis run. One authoritative row exists per incident and type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    Complete,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Complete => "complete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "complete" => Some(AnalysisType::Complete),
            _ => None,
        }
    }
}

/// A suggested remediation, either from the AI service or from local heuristics.
///
/// Every field has a default so that partially-formed AI output still parses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_solution_category")]
    pub category: String,
    #[serde(default = "default_level")]
    pub priority: String,
    #[serde(default = "default_level")]
    pub difficulty: String,
    #[serde(default = "default_risk")]
    pub risk: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

fn default_solution_category() -> String {
    "general".to_string()
}
fn default_level() -> String {
    "medium".to_string()
}
fn default_risk() -> String {
    "low".to_string()
}

/// Stored outcome of analyzing one incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: String,
    pub incident_id: String,
    pub analysis_type: AnalysisType,
    pub status: AnalysisStatus,
    pub summary: Option<String>,
    pub confidence: f64,
    pub keywords: Vec<String>,
    pub solutions: Vec<Solution>,
    pub root_cause: Option<String>,
    pub investigation_areas: Vec<String>,
    pub error_pattern: Option<String>,
    pub error_category: Option<String>,
    /// Deterministic, pattern-derived estimate.
    pub estimated_severity: Option<Severity>,
    /// Severity reported by the AI service, when it answered.
    pub ai_severity: Option<Severity>,
    pub model_used: Option<String>,
    pub tokens_used: i64,
    pub estimated_cost: f64,
    /// Number of times analysis has been started for this incident and type.
    pub attempt: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl AnalysisResult {
    /// A fresh `pending` result with a new id.
    pub fn new(incident_id: &str, analysis_type: AnalysisType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            incident_id: incident_id.to_string(),
            analysis_type,
            status: AnalysisStatus::Pending,
            summary: None,
            confidence: 0.0,
            keywords: Vec::new(),
            solutions: Vec::new(),
            root_cause: None,
            investigation_areas: Vec::new(),
            error_pattern: None,
            error_category: None,
            estimated_severity: None,
            ai_severity: None,
            model_used: None,
            tokens_used: 0,
            estimated_cost: 0.0,
            attempt: 0,
            started_at: None,
            finished_at: None,
            error_message: None,
        }
    }

    /// Start a new attempt on a result that may already hold an earlier one.
    ///
    /// Keeps the id and bumps `attempt`; everything derived from the earlier
    /// attempt is cleared and the status goes back to `pending`.
    pub fn restart(
        previous: Option<AnalysisResult>,
        incident_id: &str,
        analysis_type: AnalysisType,
    ) -> Self {
        let (id, attempt) = match previous {
            Some(prev) => (prev.id, prev.attempt),
            None => (Uuid::new_v4().to_string(), 0),
        };
        let mut result = Self::new(incident_id, analysis_type);
        result.id = id;
        result.attempt = attempt + 1;
        result
    }

    /// `pending -> processing`.
    pub fn begin(&mut self) {
        self.status = AnalysisStatus::Processing;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = AnalysisStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.error_message = None;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = AnalysisStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error_message = Some(message.into());
    }
}

/// Confidence tier derived from a similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    pub const MEDIUM_FLOOR: f64 = 0.6;
    pub const HIGH_FLOOR: f64 = 0.8;

    pub fn from_score(score: f64) -> Self {
        if score >= Self::HIGH_FLOOR {
            ConfidenceTier::High
        } else if score >= Self::MEDIUM_FLOOR {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::Low => "low",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(ConfidenceTier::Low),
            "medium" => Some(ConfidenceTier::Medium),
            "high" => Some(ConfidenceTier::High),
            _ => None,
        }
    }
}

/// Directed, scored edge between two incidents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatch {
    pub id: String,
    pub source_incident_id: String,
    pub target_incident_id: String,
    pub score: f64,
    pub method: String,
    pub confidence: ConfidenceTier,
    pub created_at: DateTime<Utc>,
}

impl SimilarityMatch {
    pub fn new(source: &str, target: &str, score: f64, method: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_incident_id: source.to_string(),
            target_incident_id: target.to_string(),
            score,
            method: method.to_string(),
            confidence: ConfidenceTier::from_score(score),
            created_at: Utc::now(),
        }
    }
}

/// Identity of the AI endpoint a [`ServiceStatus`] describes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub endpoint: String,
    pub model: String,
    /// SHA-256 of the API key, hex encoded. The key itself is never stored.
    pub api_key_hash: Option<String>,
}

/// Process-wide bookkeeping for the AI endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub identity: ServiceIdentity,
    pub is_connected: bool,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub total_calls: i64,
    pub total_tokens: i64,
    pub estimated_cost: f64,
}

impl ServiceStatus {
    pub fn new(identity: ServiceIdentity) -> Self {
        Self {
            identity,
            is_connected: false,
            last_check_at: None,
            last_success_at: None,
            last_error: None,
            total_calls: 0,
            total_tokens: 0,
            estimated_cost: 0.0,
        }
    }

    /// Apply a delta in place. Stores call this under their own lock or
    /// translate the same arithmetic into a single atomic statement.
    pub fn apply(&mut self, delta: &StatusDelta) {
        self.total_calls += delta.calls;
        self.total_tokens += delta.tokens;
        self.estimated_cost += delta.cost;
        self.last_check_at = Some(delta.at);
        match &delta.outcome {
            CallOutcome::Connected => {
                self.is_connected = true;
                self.last_success_at = Some(delta.at);
                self.last_error = None;
            }
            CallOutcome::Failed(message) => {
                self.is_connected = false;
                self.last_error = Some(message.clone());
            }
        }
    }
}

/// Connectivity observed by one AI call attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallOutcome {
    Connected,
    Failed(String),
}

/// Increment applied to the singleton [`ServiceStatus`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatusDelta {
    pub calls: i64,
    pub tokens: i64,
    pub cost: f64,
    pub outcome: CallOutcome,
    pub at: DateTime<Utc>,
}

impl StatusDelta {
    pub fn success(tokens: i64, cost: f64) -> Self {
        Self {
            calls: 1,
            tokens,
            cost,
            outcome: CallOutcome::Connected,
            at: Utc::now(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            calls: 1,
            tokens: 0,
            cost: 0.0,
            outcome: CallOutcome::Failed(message.into()),
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_severity_parse_lenient() {
        assert_eq!(Severity::parse(" HIGH "), Some(Severity::High));
        assert_eq!(Severity::parse("urgent"), None);
        assert_eq!("critical".parse::<Severity>(), Ok(Severity::Critical));
    }

    #[test]
    fn test_confidence_tier_thresholds() {
        assert_eq!(ConfidenceTier::from_score(0.59), ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::from_score(0.6), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(0.79), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_score(0.8), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_score(1.0), ConfidenceTier::High);
    }

    #[test]
    fn test_restart_keeps_id_and_bumps_attempt() {
        let mut first = AnalysisResult::restart(None, "inc-1", AnalysisType::Complete);
        assert_eq!(first.attempt, 1);
        assert_eq!(first.status, AnalysisStatus::Pending);
        first.begin();
        assert_eq!(first.status, AnalysisStatus::Processing);
        assert!(first.started_at.is_some());

        let mut done = first.clone();
        done.summary = Some("old".to_string());
        done.complete();

        let second = AnalysisResult::restart(Some(done), "inc-1", AnalysisType::Complete);
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempt, 2);
        assert_eq!(second.status, AnalysisStatus::Pending);
        assert!(second.summary.is_none());
        assert!(second.finished_at.is_none());
    }

    #[test]
    fn test_status_apply_success_then_failure() {
        let mut status = ServiceStatus::new(ServiceIdentity::default());
        status.apply(&StatusDelta::success(120, 0.0024));
        assert!(status.is_connected);
        assert_eq!(status.total_calls, 1);
        assert_eq!(status.total_tokens, 120);

        status.apply(&StatusDelta::failure("HTTP 500"));
        assert!(!status.is_connected);
        assert_eq!(status.total_calls, 2);
        assert_eq!(status.total_tokens, 120);
        assert_eq!(status.last_error.as_deref(), Some("HTTP 500"));
        assert!(status.last_success_at.is_some());
    }

    #[test]
    fn test_solution_defaults_from_partial_json() {
        let s: Solution = serde_json::from_str(r#"{"description": "restart the pod"}"#).unwrap();
        assert_eq!(s.category, "general");
        assert_eq!(s.priority, "medium");
        assert_eq!(s.risk, "low");
        assert!(s.steps.is_empty());
    }
}
