//! Analysis orchestration.
//!
//! [`Analyzer::analyze`] runs one incident through the pipeline and always
//! leaves the stored [`AnalysisResult`] in a terminal state:
//!
//! ```text
//! pending -> processing -> patterns -> summary -> solutions -> completed
//!                                                           \-> failed
//! ```
//!
//! | Step | Source | Fallback |
//! |------|--------|----------|
//! | Patterns | [`PatternRecognizer`] | none needed |
//! | Summary | [`AiBackend::summarize`] | pattern-derived text, confidence 0.4 |
//! | Solutions | [`AiBackend::suggest_solutions`] | keyword heuristics plus a generic entry |
//!
//! The result is written after every step. A failed write is recorded in the
//! [`AnalysisReport`] and the pipeline carries on. A panic inside steps 2 to 4
//! and caller cancellation both end the run as `failed`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use regex::RegexBuilder;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bugseek_core::models::{AnalysisResult, AnalysisType, Incident, Solution};
use bugseek_core::patterns::{PatternRecognizer, Recognition};
use bugseek_core::store::{AnalysisSink, IncidentStore, PersistError};

use crate::ai_client::{AiBackend, AiError, Summary};

/// Confidence attached to an AI-generated summary.
pub const AI_SUMMARY_CONFIDENCE: f64 = 0.85;
/// Confidence attached to the pattern-derived fallback summary.
pub const FALLBACK_CONFIDENCE: f64 = 0.4;

pub const CANCELLED_MESSAGE: &str = "analysis cancelled";

/// Pipeline stage a report entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStep {
    Start,
    Patterns,
    Summary,
    Solutions,
    Finish,
}

impl AnalysisStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStep::Start => "start",
            AnalysisStep::Patterns => "patterns",
            AnalysisStep::Summary => "summary",
            AnalysisStep::Solutions => "solutions",
            AnalysisStep::Finish => "finish",
        }
    }
}

/// Persistence outcome of one step.
#[derive(Debug)]
pub struct StepOutcome {
    pub step: AnalysisStep,
    pub persisted: Result<(), PersistError>,
}

/// An AI call that failed and was replaced by a fallback.
#[derive(Debug)]
pub struct AiIssue {
    pub step: AnalysisStep,
    pub error: AiError,
}

/// Final result plus everything that went wrong along the way.
#[derive(Debug)]
pub struct AnalysisReport {
    pub result: AnalysisResult,
    pub steps: Vec<StepOutcome>,
    pub ai_issues: Vec<AiIssue>,
}

#[derive(Debug, Serialize)]
pub struct IssueView {
    pub step: AnalysisStep,
    pub error: String,
}

/// Serializable form of an [`AnalysisReport`].
#[derive(Debug, Serialize)]
pub struct ReportView<'a> {
    pub result: &'a AnalysisResult,
    pub persist_failures: Vec<IssueView>,
    pub ai_failures: Vec<IssueView>,
}

impl AnalysisReport {
    /// Steps whose write did not reach the store.
    pub fn persist_failures(&self) -> impl Iterator<Item = (AnalysisStep, &PersistError)> {
        self.steps
            .iter()
            .filter_map(|s| s.persisted.as_ref().err().map(|e| (s.step, e)))
    }

    pub fn fully_persisted(&self) -> bool {
        self.persist_failures().next().is_none()
    }

    pub fn view(&self) -> ReportView<'_> {
        ReportView {
            result: &self.result,
            persist_failures: self
                .persist_failures()
                .map(|(step, e)| IssueView {
                    step,
                    error: e.to_string(),
                })
                .collect(),
            ai_failures: self
                .ai_issues
                .iter()
                .map(|i| IssueView {
                    step: i.step,
                    error: i.error.to_string(),
                })
                .collect(),
        }
    }
}

enum RunEnd {
    Done,
    Cancelled,
}

/// Drives incidents through pattern recognition, summary and solutions.
pub struct Analyzer {
    incidents: Arc<dyn IncidentStore>,
    sink: Arc<dyn AnalysisSink>,
    recognizer: Arc<PatternRecognizer>,
    ai: Option<Arc<dyn AiBackend>>,
}

impl Analyzer {
    /// `ai = None` runs every AI step on its local fallback.
    pub fn new(
        incidents: Arc<dyn IncidentStore>,
        sink: Arc<dyn AnalysisSink>,
        recognizer: Arc<PatternRecognizer>,
        ai: Option<Arc<dyn AiBackend>>,
    ) -> Self {
        Self {
            incidents,
            sink,
            recognizer,
            ai,
        }
    }

    /// Load the incident and analyze it.
    ///
    /// Fails only when the incident cannot be loaded; everything after that
    /// is reported inside the returned [`AnalysisReport`].
    pub async fn analyze(
        &self,
        incident_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AnalysisReport, PersistError> {
        let incident = self
            .incidents
            .get_incident(incident_id)
            .await?
            .ok_or_else(|| PersistError::NotFound(format!("incident {}", incident_id)))?;
        Ok(self.analyze_incident(&incident, cancel).await)
    }

    pub async fn analyze_incident(
        &self,
        incident: &Incident,
        cancel: &CancellationToken,
    ) -> AnalysisReport {
        let mut steps = Vec::new();
        let mut ai_issues = Vec::new();

        let previous = match self
            .sink
            .get_analysis_result(&incident.id, AnalysisType::Complete)
            .await
        {
            Ok(previous) => previous,
            Err(e) => {
                warn!(incident_id = %incident.id, error = %e, "could not load previous analysis");
                None
            }
        };
        let mut result = AnalysisResult::restart(previous, &incident.id, AnalysisType::Complete);
        result.begin();
        info!(incident_id = %incident.id, attempt = result.attempt, "analysis started");
        self.persist(AnalysisStep::Start, &result, &mut steps).await;

        let run = AssertUnwindSafe(self.run_steps(
            incident,
            &mut result,
            &mut steps,
            &mut ai_issues,
            cancel,
        ))
        .catch_unwind()
        .await;

        if let Some(ai) = &self.ai {
            result.estimated_cost = result.tokens_used as f64 * ai.unit_price();
        }
        match run {
            Ok(RunEnd::Done) => result.complete(),
            Ok(RunEnd::Cancelled) => result.fail(CANCELLED_MESSAGE),
            Err(payload) => {
                let message = panic_message(payload);
                warn!(incident_id = %incident.id, panic = %message, "analysis step panicked");
                result.fail(format!("analysis aborted: {}", message));
            }
        }

        self.persist(AnalysisStep::Finish, &result, &mut steps).await;
        info!(
            incident_id = %incident.id,
            status = %result.status,
            tokens = result.tokens_used,
            "analysis finished"
        );

        AnalysisReport {
            result,
            steps,
            ai_issues,
        }
    }

    async fn run_steps(
        &self,
        incident: &Incident,
        result: &mut AnalysisResult,
        steps: &mut Vec<StepOutcome>,
        ai_issues: &mut Vec<AiIssue>,
        cancel: &CancellationToken,
    ) -> RunEnd {
        // Patterns
        let recognition = self.recognizer.recognize(&incident.content);
        result.error_pattern = recognition.primary_pattern.clone();
        result.error_category = Some(recognition.primary_category.clone());
        result.estimated_severity = Some(recognition.estimated_severity);
        self.persist(AnalysisStep::Patterns, result, steps).await;

        // Summary
        if cancel.is_cancelled() {
            return RunEnd::Cancelled;
        }
        let mut prior: Option<Summary> = None;
        let ai_summary = match &self.ai {
            Some(ai) => match ai.summarize(&incident.content, &incident.metadata, cancel).await {
                Ok(answer) => {
                    result.tokens_used += answer.tokens_used;
                    result.model_used = Some(ai.model_name().to_string());
                    Some(answer.reply.into_summary())
                }
                Err(AiError::Cancelled) => return RunEnd::Cancelled,
                Err(error) => {
                    warn!(incident_id = %incident.id, error = %error, "AI summary failed, using fallback");
                    ai_issues.push(AiIssue {
                        step: AnalysisStep::Summary,
                        error,
                    });
                    None
                }
            },
            None => None,
        };
        match ai_summary {
            Some(summary) => {
                result.summary = Some(summary.summary.clone());
                result.confidence = AI_SUMMARY_CONFIDENCE;
                result.keywords = summary.keywords.clone();
                result.root_cause = summary.root_cause.clone();
                result.investigation_areas = summary.investigation_areas.clone();
                result.ai_severity = Some(summary.severity);
                prior = Some(summary);
            }
            None => {
                result.summary = Some(fallback_summary(&recognition));
                result.confidence = FALLBACK_CONFIDENCE;
                result.keywords = recognition.matches.iter().map(|m| m.name.clone()).collect();
            }
        }
        self.persist(AnalysisStep::Summary, result, steps).await;

        // Solutions
        if cancel.is_cancelled() {
            return RunEnd::Cancelled;
        }
        let ai_solutions = match &self.ai {
            Some(ai) => match ai
                .suggest_solutions(
                    &incident.content,
                    &incident.metadata,
                    prior.as_ref(),
                    cancel,
                )
                .await
            {
                Ok(answer) => {
                    result.tokens_used += answer.tokens_used;
                    result.model_used = Some(ai.model_name().to_string());
                    Some(answer.reply.into_solutions())
                }
                Err(AiError::Cancelled) => return RunEnd::Cancelled,
                Err(error) => {
                    warn!(incident_id = %incident.id, error = %error, "AI solutions failed, using heuristics");
                    ai_issues.push(AiIssue {
                        step: AnalysisStep::Solutions,
                        error,
                    });
                    None
                }
            },
            None => None,
        };
        result.solutions = match ai_solutions {
            Some(solutions) => solutions,
            None => heuristic_solutions(
                &result.keywords,
                &incident.content,
                result.error_category.as_deref(),
            ),
        };
        self.persist(AnalysisStep::Solutions, result, steps).await;

        RunEnd::Done
    }

    async fn persist(
        &self,
        step: AnalysisStep,
        result: &AnalysisResult,
        steps: &mut Vec<StepOutcome>,
    ) {
        let persisted = self.sink.upsert_analysis_result(result).await;
        if let Err(e) = &persisted {
            warn!(
                incident_id = %result.incident_id,
                step = step.as_str(),
                error = %e,
                "failed to persist analysis result"
            );
        }
        steps.push(StepOutcome { step, persisted });
    }
}

/// Summary text built from pattern matches alone.
pub fn fallback_summary(recognition: &Recognition) -> String {
    match recognition.primary() {
        Some(primary) => {
            let names: Vec<&str> = recognition.matches.iter().map(|m| m.name.as_str()).collect();
            format!(
                "{} detected ({} error, estimated severity {}). Matched patterns: {}. \
                 AI analysis was unavailable; this summary is derived from log patterns.",
                primary.description,
                primary.category,
                recognition.estimated_severity,
                names.join(", ")
            )
        }
        None => "No known error pattern was detected in the log. AI analysis was unavailable; \
                 manual review is recommended."
            .to_string(),
    }
}

struct Remedy {
    triggers: &'static [&'static str],
    description: &'static str,
    category: &'static str,
    priority: &'static str,
    difficulty: &'static str,
    risk: &'static str,
    steps: &'static [&'static str],
}

const REMEDIES: &[Remedy] = &[
    Remedy {
        triggers: &["memory", "heap", "oom", "out_of_memory", "outofmemoryerror"],
        description: "Investigate memory consumption and raise limits if usage is legitimate",
        category: "infrastructure",
        priority: "high",
        difficulty: "medium",
        risk: "low",
        steps: &[
            "Check memory usage trends around the failure time",
            "Look for leaks with a heap profiler",
            "Increase heap or container memory limits if usage is expected",
        ],
    },
    Remedy {
        triggers: &["timeout", "timed out", "watchdog"],
        description: "Find the slow dependency behind the timeout",
        category: "configuration",
        priority: "high",
        difficulty: "medium",
        risk: "low",
        steps: &[
            "Identify which call exceeded its deadline",
            "Check latency of downstream services",
            "Tune timeout values only after the root cause is understood",
        ],
    },
    Remedy {
        triggers: &["network", "connection refused", "unreachable", "socket"],
        description: "Verify network connectivity between the affected components",
        category: "network",
        priority: "high",
        difficulty: "easy",
        risk: "low",
        steps: &[
            "Confirm the remote host and port are reachable",
            "Check DNS resolution and firewall rules",
            "Review recent network configuration changes",
        ],
    },
    Remedy {
        triggers: &["permission", "access denied", "forbidden", "eacces"],
        description: "Fix permissions for the failing resource",
        category: "configuration",
        priority: "medium",
        difficulty: "easy",
        risk: "medium",
        steps: &[
            "Identify the user or service account performing the operation",
            "Compare required and granted permissions on the resource",
            "Grant the minimum access needed",
        ],
    },
    Remedy {
        triggers: &["disk", "i/o", "io_error", "no space", "filesystem"],
        description: "Check storage health and free space",
        category: "infrastructure",
        priority: "high",
        difficulty: "medium",
        risk: "low",
        steps: &[
            "Check free space and inode usage on the affected volumes",
            "Inspect kernel logs for device or I/O errors",
            "Replace or remount failing storage",
        ],
    },
    Remedy {
        triggers: &["null", "nullpointerexception", "none type", "nil pointer"],
        description: "Guard against the missing value that triggered the null reference",
        category: "code",
        priority: "medium",
        difficulty: "easy",
        risk: "low",
        steps: &[
            "Locate the dereference in the stack trace",
            "Trace where the value should have been initialized",
            "Add validation or a default for the missing value",
        ],
    },
    Remedy {
        triggers: &["database", "sql", "sqlexception", "sqlite", "deadlock", "constraint"],
        description: "Inspect database health and the failing query",
        category: "data",
        priority: "medium",
        difficulty: "medium",
        risk: "medium",
        steps: &[
            "Find the failing statement in the database logs",
            "Check connection pool saturation and lock contention",
            "Validate recent schema or data migrations",
        ],
    },
];

/// Local remediation list used when the AI service gave no solutions.
///
/// One entry per remedy with a trigger in `keywords`, the log text or the
/// pattern category, followed by a generic entry. Triggers match whole words;
/// `_`, `-` and `.` separate words.
pub fn heuristic_solutions(
    keywords: &[String],
    content: &str,
    category: Option<&str>,
) -> Vec<Solution> {
    let mut haystack = content.to_lowercase();
    for k in keywords {
        haystack.push(' ');
        haystack.push_str(&k.to_lowercase());
    }
    if let Some(c) = category {
        haystack.push(' ');
        haystack.push_str(&c.to_lowercase());
    }

    let mut solutions: Vec<Solution> = REMEDIES
        .iter()
        .filter(|r| r.triggers.iter().any(|t| mentions(&haystack, t)))
        .map(|r| Solution {
            description: r.description.to_string(),
            category: r.category.to_string(),
            priority: r.priority.to_string(),
            difficulty: r.difficulty.to_string(),
            risk: r.risk.to_string(),
            steps: r.steps.iter().map(|s| s.to_string()).collect(),
        })
        .collect();

    solutions.push(Solution {
        description: "Review recent changes and reproduce the failure in a test environment"
            .to_string(),
        category: "general".to_string(),
        priority: "low".to_string(),
        difficulty: "medium".to_string(),
        risk: "low".to_string(),
        steps: vec![
            "List deployments and configuration changes before the first occurrence".to_string(),
            "Reproduce with the same inputs in a non-production environment".to_string(),
            "Escalate to the owning team with the collected evidence".to_string(),
        ],
    });
    solutions
}

/// Whether `trigger` occurs in `haystack` bounded by non-alphanumerics.
fn mentions(haystack: &str, trigger: &str) -> bool {
    let pattern = format!(
        r"(?:^|[^\p{{Alphabetic}}\p{{Nd}}]){}(?:[^\p{{Alphabetic}}\p{{Nd}}]|$)",
        regex::escape(trigger)
    );
    match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(re) => re.is_match(haystack),
        Err(e) => {
            warn!(trigger, error = %e, "skipping unusable remedy trigger");
            false
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_client::{Answer, SolutionsReply, SummaryReply};
    use async_trait::async_trait;
    use bugseek_core::models::{
        AnalysisStatus, IncidentMetadata, ServiceIdentity, ServiceStatus, Severity,
        SimilarityMatch, StatusDelta,
    };
    use bugseek_core::store::memory::InMemoryStore;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Mode {
        Good,
        Down,
        Panics,
        Cancels,
    }

    struct FakeAi {
        mode: Mode,
        calls: AtomicUsize,
    }

    impl FakeAi {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AiBackend for FakeAi {
        fn model_name(&self) -> &str {
            "fake-model"
        }

        fn unit_price(&self) -> f64 {
            0.001
        }

        async fn summarize(
            &self,
            _log_text: &str,
            _metadata: &IncidentMetadata,
            cancel: &CancellationToken,
        ) -> Result<Answer<SummaryReply>, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Mode::Good => Ok(Answer {
                    reply: SummaryReply::parse(
                        r#"{"summary": "JVM ran out of heap", "severity": "critical",
                            "keywords": ["heap", "gc"], "root_cause": "leak in cache",
                            "investigation_areas": ["cache eviction"]}"#,
                    ),
                    tokens_used: 200,
                }),
                Mode::Down => Err(AiError::Http {
                    status: 503,
                    body: "unavailable".to_string(),
                }),
                Mode::Panics => panic!("summarizer exploded"),
                Mode::Cancels => {
                    cancel.cancel();
                    Err(AiError::Cancelled)
                }
            }
        }

        async fn suggest_solutions(
            &self,
            _log_text: &str,
            _metadata: &IncidentMetadata,
            prior: Option<&Summary>,
            _cancel: &CancellationToken,
        ) -> Result<Answer<SolutionsReply>, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Mode::Down => Err(AiError::Timeout(std::time::Duration::from_secs(30))),
                _ => {
                    assert!(prior.is_some());
                    Ok(Answer {
                        reply: SolutionsReply::parse("just restart it"),
                        tokens_used: 100,
                    })
                }
            }
        }
    }

    /// Sink whose analysis writes always fail.
    struct BrokenSink;

    #[async_trait]
    impl AnalysisSink for BrokenSink {
        async fn upsert_analysis_result(&self, _r: &AnalysisResult) -> Result<(), PersistError> {
            Err(PersistError::backend("disk full"))
        }
        async fn get_analysis_result(
            &self,
            _incident_id: &str,
            _t: AnalysisType,
        ) -> Result<Option<AnalysisResult>, PersistError> {
            Err(PersistError::backend("disk full"))
        }
        async fn insert_similarity_match(&self, _e: &SimilarityMatch) -> Result<(), PersistError> {
            Err(PersistError::backend("disk full"))
        }
        async fn list_similarity_matches(
            &self,
            _source_id: &str,
        ) -> Result<Vec<SimilarityMatch>, PersistError> {
            Ok(Vec::new())
        }
        async fn get_or_create_service_status(
            &self,
            identity: &ServiceIdentity,
        ) -> Result<ServiceStatus, PersistError> {
            Ok(ServiceStatus::new(identity.clone()))
        }
        async fn update_service_status(&self, _d: &StatusDelta) -> Result<(), PersistError> {
            Ok(())
        }
    }

    fn oom_incident() -> Incident {
        Incident {
            id: "inc-oom".to_string(),
            content: "Exception in thread \"main\" java.lang.OutOfMemoryError: Java heap space"
                .to_string(),
            metadata: IncidentMetadata {
                team_name: "Payments".to_string(),
                module: "ledger".to_string(),
                error_name: "OOM".to_string(),
                description: "ledger service crashed under load".to_string(),
                ..Default::default()
            },
            created_at: Utc::now(),
        }
    }

    fn analyzer(store: &Arc<InMemoryStore>, ai: Option<Arc<dyn AiBackend>>) -> Analyzer {
        Analyzer::new(
            store.clone(),
            store.clone(),
            Arc::new(PatternRecognizer::new().unwrap()),
            ai,
        )
    }

    #[tokio::test]
    async fn test_full_run_with_ai() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_incident(oom_incident()).unwrap();
        let ai = FakeAi::new(Mode::Good);
        let analyzer = analyzer(&store, Some(ai.clone()));

        let report = analyzer
            .analyze("inc-oom", &CancellationToken::new())
            .await
            .unwrap();
        let r = &report.result;
        assert_eq!(r.status, AnalysisStatus::Completed);
        assert_eq!(r.error_category.as_deref(), Some("memory"));
        assert_eq!(r.estimated_severity, Some(Severity::High));
        assert_eq!(r.ai_severity, Some(Severity::Critical));
        assert_eq!(r.summary.as_deref(), Some("JVM ran out of heap"));
        assert_eq!(r.confidence, AI_SUMMARY_CONFIDENCE);
        assert_eq!(r.tokens_used, 300);
        assert!((r.estimated_cost - 0.3).abs() < 1e-9);
        assert_eq!(r.solutions.len(), 1);
        assert_eq!(r.model_used.as_deref(), Some("fake-model"));
        assert!(r.finished_at.is_some());
        assert!(report.fully_persisted());
        assert!(report.ai_issues.is_empty());
        assert_eq!(ai.calls.load(Ordering::SeqCst), 2);

        let stored = store
            .get_analysis_result("inc-oom", AnalysisType::Complete)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, report.result);
    }

    #[tokio::test]
    async fn test_ai_down_uses_fallbacks() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_incident(oom_incident()).unwrap();
        let analyzer = analyzer(&store, Some(FakeAi::new(Mode::Down)));

        let report = analyzer
            .analyze("inc-oom", &CancellationToken::new())
            .await
            .unwrap();
        let r = &report.result;
        assert_eq!(r.status, AnalysisStatus::Completed);
        assert_eq!(r.confidence, FALLBACK_CONFIDENCE);
        assert!(r.summary.as_deref().unwrap().contains("memory"));
        assert_eq!(
            r.keywords,
            vec!["out_of_memory".to_string(), "java_exception".to_string()]
        );
        assert!(r.ai_severity.is_none());
        assert!(r.solutions.len() >= 2);
        assert_eq!(r.solutions.last().unwrap().category, "general");
        assert!(r.solutions.iter().any(|s| s.category == "infrastructure"));
        assert_eq!(report.ai_issues.len(), 2);
    }

    #[tokio::test]
    async fn test_ai_disabled_skips_ai() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_incident(oom_incident()).unwrap();
        let analyzer = analyzer(&store, None);

        let report = analyzer
            .analyze("inc-oom", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.result.status, AnalysisStatus::Completed);
        assert_eq!(report.result.tokens_used, 0);
        assert!(report.result.model_used.is_none());
        assert!(report.ai_issues.is_empty());
    }

    #[tokio::test]
    async fn test_rerun_is_deterministic_and_reuses_row() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_incident(oom_incident()).unwrap();
        let analyzer = analyzer(&store, Some(FakeAi::new(Mode::Down)));
        let cancel = CancellationToken::new();

        let first = analyzer.analyze("inc-oom", &cancel).await.unwrap().result;
        let second = analyzer.analyze("inc-oom", &cancel).await.unwrap().result;
        assert_eq!(first.id, second.id);
        assert_eq!(second.attempt, first.attempt + 1);
        assert_eq!(first.error_pattern, second.error_pattern);
        assert_eq!(first.error_category, second.error_category);
        assert_eq!(first.estimated_severity, second.estimated_severity);
    }

    #[tokio::test]
    async fn test_panic_marks_failed() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_incident(oom_incident()).unwrap();
        let analyzer = analyzer(&store, Some(FakeAi::new(Mode::Panics)));

        let report = analyzer
            .analyze("inc-oom", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.result.status, AnalysisStatus::Failed);
        assert!(report
            .result
            .error_message
            .as_deref()
            .unwrap()
            .contains("summarizer exploded"));
        // Pattern fields were written before the panic.
        assert_eq!(report.result.error_category.as_deref(), Some("memory"));

        let stored = store
            .get_analysis_result("inc-oom", AnalysisType::Complete)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AnalysisStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancellation_marks_failed() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_incident(oom_incident()).unwrap();
        let ai = FakeAi::new(Mode::Cancels);
        let analyzer = analyzer(&store, Some(ai.clone()));

        let report = analyzer
            .analyze("inc-oom", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.result.status, AnalysisStatus::Failed);
        assert_eq!(report.result.error_message.as_deref(), Some(CANCELLED_MESSAGE));
        assert_eq!(ai.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persist_failures_reported_not_fatal() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_incident(oom_incident()).unwrap();
        let analyzer = Analyzer::new(
            store.clone(),
            Arc::new(BrokenSink),
            Arc::new(PatternRecognizer::new().unwrap()),
            None,
        );

        let report = analyzer
            .analyze("inc-oom", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.result.status, AnalysisStatus::Completed);
        assert!(!report.fully_persisted());
        let failed: Vec<AnalysisStep> = report.persist_failures().map(|(s, _)| s).collect();
        assert_eq!(
            failed,
            vec![
                AnalysisStep::Start,
                AnalysisStep::Patterns,
                AnalysisStep::Summary,
                AnalysisStep::Solutions,
                AnalysisStep::Finish,
            ]
        );
        assert_eq!(report.view().persist_failures.len(), 5);
    }

    #[tokio::test]
    async fn test_unknown_incident() {
        let store = Arc::new(InMemoryStore::new());
        let analyzer = analyzer(&store, None);
        let err = analyzer
            .analyze("nope", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_content() {
        let store = Arc::new(InMemoryStore::new());
        let mut incident = oom_incident();
        incident.content = String::new();
        let analyzer = analyzer(&store, None);

        let report = analyzer
            .analyze_incident(&incident, &CancellationToken::new())
            .await;
        assert_eq!(report.result.status, AnalysisStatus::Completed);
        assert!(report.result.error_pattern.is_none());
        assert_eq!(report.result.error_category.as_deref(), Some("general"));
        assert_eq!(report.result.estimated_severity, Some(Severity::Medium));
        assert!(report.result.keywords.is_empty());
    }

    #[test]
    fn test_heuristic_solutions_keywords() {
        let solutions = heuristic_solutions(
            &["timeout".to_string()],
            "ERROR: connection refused while querying database",
            None,
        );
        let categories: Vec<&str> = solutions.iter().map(|s| s.category.as_str()).collect();
        assert_eq!(categories, vec!["configuration", "network", "data", "general"]);

        let only_generic = heuristic_solutions(&[], "", None);
        assert_eq!(only_generic.len(), 1);
    }

    #[test]
    fn test_heuristic_triggers_need_whole_words() {
        let solutions = heuristic_solutions(
            &["zoom".to_string()],
            "meeting room booking failed: nullable column rejected, see bloom filter",
            Some("general"),
        );
        let categories: Vec<&str> = solutions.iter().map(|s| s.category.as_str()).collect();
        assert_eq!(categories, vec!["general"]);
    }

    #[test]
    fn test_heuristic_triggers_split_on_punctuation() {
        let solutions = heuristic_solutions(
            &["oom_killer".to_string()],
            "java.lang.NullPointerException at Foo.bar(Foo.java:12); SQLITE_BUSY",
            None,
        );
        let categories: Vec<&str> = solutions.iter().map(|s| s.category.as_str()).collect();
        assert_eq!(categories, vec!["infrastructure", "code", "data", "general"]);
    }
}
