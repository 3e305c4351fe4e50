//! Chat-completion client with retry, backoff, cancellation and usage accounting.
//!
//! [`AiClient::complete`] is the single network primitive. It POSTs a
//! chat-completion payload to the configured URL and retries any non-2xx
//! status, network error or per-attempt timeout:
//!
//! | Attempt | Delay before it |
//! |---------|-----------------|
//! | 1 | none |
//! | 2 | `backoff_initial_ms` |
//! | n | `backoff_initial_ms * backoff_multiplier^(n-2)` |
//!
//! `max_retries` is the total number of attempts. A 2xx reply is never retried.
//! Every attempt is recorded on the shared [`ServiceStatus`] row through the
//! [`AnalysisSink`]; a cancelled attempt is not.
//!
//! [`AiClient::summarize`] and [`AiClient::suggest_solutions`] build the
//! analysis prompts on top of `complete` and parse the reply into
//! [`SummaryReply`] / [`SolutionsReply`]. Malformed replies fall back to
//! raw-text variants rather than errors.
//!
//! [`ServiceStatus`]: bugseek_core::models::ServiceStatus

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bugseek_core::models::{IncidentMetadata, ServiceIdentity, Severity, Solution, StatusDelta};
use bugseek_core::store::AnalysisSink;

use crate::config::AiConfig;

/// Characters kept from a reply that could not be parsed as JSON.
const RAW_TEXT_CHARS: usize = 500;
/// Characters of an error body kept in [`AiError::Http`].
const ERROR_BODY_CHARS: usize = 300;

const SUMMARY_TEMPERATURE: f64 = 0.3;
const SOLUTIONS_TEMPERATURE: f64 = 0.5;

const SUMMARY_SYSTEM_PROMPT: &str = "\
You are an expert system administrator and software engineer specializing in error log analysis.
Analyze the error log and give a concise, actionable summary. Focus on the root cause, the
severity, the key technical details and where to investigate first.

Respond with JSON only, using these fields:
- summary: brief description of the error (2-3 sentences)
- severity: one of [low, medium, high, critical]
- keywords: array of important technical terms found in the log
- root_cause: likely root cause if identifiable
- investigation_areas: array of areas to investigate";

const SOLUTIONS_SYSTEM_PROMPT: &str = "\
You are an expert DevOps engineer and troubleshooter specializing in system errors.
Suggest practical, actionable solutions ordered by likelihood of success, implementation
difficulty and risk.

Respond with JSON only, in the form {\"solutions\": [...]} where each solution has:
- description: clear, actionable description
- category: one of [configuration, code, infrastructure, data, network]
- priority: one of [high, medium, low]
- difficulty: one of [easy, medium, hard]
- risk: one of [low, medium, high]
- steps: array of specific implementation steps";

/// Failure of a call to the AI endpoint.
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("API key not configured (set the {0} environment variable)")]
    MissingApiKey(String),
    #[error("API key in {0} is not a valid header value")]
    InvalidApiKey(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("request cancelled")]
    Cancelled,
}

impl AiError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AiError::Http { .. } | AiError::Timeout(_) | AiError::Network(_)
        )
    }
}

/// Reply text and usage from one successful completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: i64,
}

/// A parsed reply together with the tokens it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer<T> {
    pub reply: T,
    pub tokens_used: i64,
}

/// Result of [`AiClient::check_connection`].
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCheck {
    pub connected: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub model: String,
    pub endpoint: String,
}

// ============ Reply parsing ============

/// Normalized summary used by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub summary: String,
    pub severity: Severity,
    pub keywords: Vec<String>,
    pub root_cause: Option<String>,
    pub investigation_areas: Vec<String>,
}

/// Fields read from a JSON summary reply. A field with an unexpected shape
/// reads as absent without discarding the others.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructuredSummary {
    pub summary: String,
    pub severity: Option<String>,
    pub keywords: Vec<String>,
    pub root_cause: Option<String>,
    pub investigation_areas: Vec<String>,
}

impl StructuredSummary {
    fn from_object(obj: &serde_json::Map<String, Value>) -> Self {
        Self {
            summary: text_field(obj, "summary").unwrap_or_default(),
            severity: text_field(obj, "severity"),
            keywords: list_field(obj, "keywords"),
            root_cause: text_field(obj, "root_cause"),
            investigation_areas: list_field(obj, "investigation_areas"),
        }
    }
}

/// Summary reply: the JSON object asked for, or whatever text came back.
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryReply {
    Structured(StructuredSummary),
    RawText(String),
}

impl SummaryReply {
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(strip_code_fence(text)) {
            Ok(Value::Object(obj)) => SummaryReply::Structured(StructuredSummary::from_object(&obj)),
            _ => SummaryReply::RawText(text.to_string()),
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, SummaryReply::Structured(_))
    }

    /// Collapse into a [`Summary`]. Missing severity reads as medium.
    pub fn into_summary(self) -> Summary {
        match self {
            SummaryReply::Structured(s) => {
                let summary = if s.summary.trim().is_empty() {
                    "No summary provided".to_string()
                } else {
                    s.summary
                };
                Summary {
                    summary,
                    severity: s
                        .severity
                        .as_deref()
                        .and_then(Severity::parse)
                        .unwrap_or_default(),
                    keywords: s.keywords,
                    root_cause: s.root_cause.filter(|r| !r.trim().is_empty()),
                    investigation_areas: s.investigation_areas,
                }
            }
            SummaryReply::RawText(text) => Summary {
                summary: truncate_chars(text.trim(), RAW_TEXT_CHARS),
                severity: Severity::Medium,
                keywords: Vec::new(),
                root_cause: None,
                investigation_areas: Vec::new(),
            },
        }
    }
}

/// Solutions reply: a parsed list, or the raw text.
#[derive(Debug, Clone, PartialEq)]
pub enum SolutionsReply {
    Parsed(Vec<Solution>),
    RawText(String),
}

impl SolutionsReply {
    /// Accepts `{"solutions": [...]}` or a bare array. Entries that are not
    /// objects or strings are skipped; bad fields fall back to their defaults.
    pub fn parse(text: &str) -> Self {
        let items = match serde_json::from_str::<Value>(strip_code_fence(text)) {
            Ok(Value::Array(items)) => items,
            Ok(Value::Object(mut obj)) => match obj.remove("solutions") {
                Some(Value::Array(items)) => items,
                _ => return SolutionsReply::RawText(text.to_string()),
            },
            _ => return SolutionsReply::RawText(text.to_string()),
        };
        let solutions: Vec<Solution> = items.iter().filter_map(solution_from_value).collect();
        if solutions.is_empty() && !items.is_empty() {
            return SolutionsReply::RawText(text.to_string());
        }
        SolutionsReply::Parsed(solutions)
    }

    /// Collapse into a list. Raw text becomes one generic entry.
    pub fn into_solutions(self) -> Vec<Solution> {
        match self {
            SolutionsReply::Parsed(solutions) => solutions,
            SolutionsReply::RawText(text) => vec![Solution {
                description: truncate_chars(text.trim(), RAW_TEXT_CHARS),
                category: "general".to_string(),
                priority: "medium".to_string(),
                difficulty: "medium".to_string(),
                risk: "low".to_string(),
                steps: vec![
                    "Review the suggested solution".to_string(),
                    "Test in a development environment".to_string(),
                ],
            }],
        }
    }
}

fn solution_from_value(value: &Value) -> Option<Solution> {
    let obj = match value {
        Value::Object(obj) => obj,
        Value::String(s) if !s.trim().is_empty() => {
            return Some(Solution {
                description: s.trim().to_string(),
                ..default_solution()
            })
        }
        _ => return None,
    };
    let defaults = default_solution();
    Some(Solution {
        description: text_field(obj, "description").unwrap_or(defaults.description),
        category: text_field(obj, "category").unwrap_or(defaults.category),
        priority: level_field(obj, "priority").unwrap_or(defaults.priority),
        difficulty: level_field(obj, "difficulty").unwrap_or(defaults.difficulty),
        risk: level_field(obj, "risk").unwrap_or(defaults.risk),
        steps: list_field(obj, "steps"),
    })
}

fn default_solution() -> Solution {
    Solution {
        description: String::new(),
        category: "general".to_string(),
        priority: "medium".to_string(),
        difficulty: "medium".to_string(),
        risk: "low".to_string(),
        steps: Vec::new(),
    }
}

/// A string, or a number or bool rendered as text. Blank reads as absent.
fn text_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    scalar_text(obj.get(key)?)
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Like [`text_field`], but ranks 1, 2 and 3 read as high, medium and low.
fn level_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::Number(n) => match n.as_u64() {
            Some(1) => Some("high".to_string()),
            Some(2) => Some("medium".to_string()),
            Some(3) => Some("low".to_string()),
            _ => None,
        },
        other => scalar_text(other).map(|s| s.to_lowercase()),
    }
}

/// An array of scalars, or one comma-separated string. Anything else is empty.
fn list_field(obj: &serde_json::Map<String, Value>, key: &str) -> Vec<String> {
    match obj.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Remove a surrounding Markdown code fence (```` ``` ```` or ```` ```json ````).
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string on the opening line.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// First `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn or_unknown(value: &str) -> &str {
    if value.trim().is_empty() {
        "Unknown"
    } else {
        value
    }
}

fn summary_prompt(log_text: &str, metadata: &IncidentMetadata, max_chars: usize) -> String {
    format!(
        "Analyze this error log:\n\n\
         **Metadata:**\n\
         - Team: {}\n\
         - Module: {}\n\
         - Error Name: {}\n\
         - Description: {}\n\n\
         **Log Content:**\n{}\n\n\
         Please analyze this error log and provide a structured summary.",
        or_unknown(&metadata.team_name),
        or_unknown(&metadata.module),
        or_unknown(&metadata.error_name),
        or_unknown(&metadata.description),
        truncate_chars(log_text, max_chars),
    )
}

fn solutions_prompt(
    log_text: &str,
    metadata: &IncidentMetadata,
    prior: Option<&Summary>,
    max_chars: usize,
) -> String {
    let context = match prior {
        Some(s) => format!(
            "\n**Previous Analysis:**\n- Summary: {}\n- Severity: {}\n- Root Cause: {}\n",
            s.summary,
            s.severity,
            s.root_cause.as_deref().unwrap_or("unknown"),
        ),
        None => String::new(),
    };
    format!(
        "Suggest solutions for this error:\n\n\
         **Error Details:**\n\
         - Team: {}\n\
         - Module: {}\n\
         - Error: {}\n\
         - Description: {}\n{}\n\
         **Log Sample:**\n{}\n\n\
         Please provide practical solutions ranked by effectiveness.",
        or_unknown(&metadata.team_name),
        or_unknown(&metadata.module),
        or_unknown(&metadata.error_name),
        or_unknown(&metadata.description),
        context,
        truncate_chars(log_text, max_chars),
    )
}

// ============ Backend seam ============

/// What the analysis orchestrator needs from an AI service.
#[async_trait]
pub trait AiBackend: Send + Sync {
    fn model_name(&self) -> &str;

    /// Estimated cost of one token.
    fn unit_price(&self) -> f64;

    async fn summarize(
        &self,
        log_text: &str,
        metadata: &IncidentMetadata,
        cancel: &CancellationToken,
    ) -> Result<Answer<SummaryReply>, AiError>;

    async fn suggest_solutions(
        &self,
        log_text: &str,
        metadata: &IncidentMetadata,
        prior: Option<&Summary>,
        cancel: &CancellationToken,
    ) -> Result<Answer<SolutionsReply>, AiError>;
}

// ============ HTTP client ============

/// HTTP client for an OpenAI-compatible chat-completion endpoint.
pub struct AiClient {
    http: reqwest::Client,
    config: AiConfig,
    header_name: HeaderName,
    extra_body: serde_json::Map<String, Value>,
    identity: ServiceIdentity,
    sink: Arc<dyn AnalysisSink>,
    registered: OnceCell<()>,
}

impl AiClient {
    /// Build a client from configuration. Status updates go to `sink`.
    pub fn new(config: &AiConfig, sink: Arc<dyn AnalysisSink>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client")?;
        let header_name = HeaderName::from_bytes(config.api_key_header.as_bytes())
            .with_context(|| format!("Invalid ai.api_key_header: '{}'", config.api_key_header))?;
        let extra_body = config.extra_body_json()?;

        let identity = ServiceIdentity {
            endpoint: endpoint_without_query(&config.url),
            model: config.model.clone(),
            api_key_hash: config.api_key().map(|k| hash_key(&k)),
        };

        Ok(Self {
            http,
            config: config.clone(),
            header_name,
            extra_body,
            identity,
            sink,
            registered: OnceCell::new(),
        })
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Send one chat completion, retrying transient failures.
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
        temperature: f64,
        cancel: &CancellationToken,
    ) -> Result<Completion, AiError> {
        let auth = self.auth_header()?;
        self.ensure_registered().await;

        let body = self.request_body(system_prompt, user_prompt, max_tokens, temperature);
        let max_attempts = self.config.max_attempts();
        let mut last_err = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = self.config.backoff_delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AiError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AiError::Cancelled),
                r = self.send_once(&auth, &body) => r,
            };

            match outcome {
                Ok(completion) => {
                    let cost = completion.tokens_used as f64 * self.config.unit_price_per_token;
                    self.record(StatusDelta::success(completion.tokens_used, cost))
                        .await;
                    debug!(
                        attempt = attempt + 1,
                        tokens = completion.tokens_used,
                        "completion succeeded"
                    );
                    return Ok(completion);
                }
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "completion attempt failed"
                    );
                    self.record(StatusDelta::failure(e.to_string())).await;
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| AiError::Network("no attempt was made".to_string())))
    }

    /// Probe the endpoint with one small completion and no retries.
    pub async fn check_connection(&self) -> ConnectionCheck {
        let mut check = ConnectionCheck {
            connected: false,
            message: String::new(),
            error: None,
            model: self.config.model.clone(),
            endpoint: self.identity.endpoint.clone(),
        };

        let auth = match self.auth_header() {
            Ok(auth) => auth,
            Err(e) => {
                check.message = match e {
                    AiError::InvalidApiKey(_) => "API key is invalid",
                    _ => "API key not configured",
                }
                .to_string();
                check.error = Some(e.to_string());
                return check;
            }
        };
        self.ensure_registered().await;

        let body = self.request_body("You are a helpful assistant.", "Hello", 10, 0.0);
        match self.send_once(&auth, &body).await {
            Ok(completion) => {
                let cost = completion.tokens_used as f64 * self.config.unit_price_per_token;
                self.record(StatusDelta::success(completion.tokens_used, cost))
                    .await;
                info!(endpoint = %check.endpoint, "AI endpoint reachable");
                check.connected = true;
                check.message = "Connection successful".to_string();
            }
            Err(e) => {
                self.record(StatusDelta::failure(e.to_string())).await;
                warn!(endpoint = %check.endpoint, error = %e, "AI endpoint check failed");
                check.message = "Connection failed".to_string();
                check.error = Some(e.to_string());
            }
        }
        check
    }

    fn request_body(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Value {
        let mut body = self.extra_body.clone();
        body.insert(
            "messages".to_string(),
            json!([
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ]),
        );
        body.insert("max_tokens".to_string(), json!(max_tokens));
        body.insert("temperature".to_string(), json!(temperature));
        if self.config.send_model {
            body.insert("model".to_string(), json!(self.config.model));
        }
        Value::Object(body)
    }

    /// Key header value. Checked before any request is sent.
    fn auth_header(&self) -> Result<HeaderValue, AiError> {
        let key = self
            .config
            .api_key()
            .ok_or_else(|| AiError::MissingApiKey(self.config.api_key_env.clone()))?;
        let mut value = HeaderValue::from_str(&format!("{}{}", self.config.api_key_prefix, key))
            .map_err(|_| AiError::InvalidApiKey(self.config.api_key_env.clone()))?;
        value.set_sensitive(true);
        Ok(value)
    }

    async fn send_once(&self, auth: &HeaderValue, body: &Value) -> Result<Completion, AiError> {
        let response = self
            .http
            .post(&self.config.url)
            .header(self.header_name.clone(), auth.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AiError::Http {
                status: status.as_u16(),
                body: truncate_chars(text.trim(), ERROR_BODY_CHARS),
            });
        }

        let json: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                AiError::Timeout(self.config.timeout())
            } else {
                AiError::InvalidResponse(e.to_string())
            }
        })?;
        self.extract(&json)
    }

    fn map_transport(&self, err: reqwest::Error) -> AiError {
        if err.is_timeout() {
            AiError::Timeout(self.config.timeout())
        } else {
            AiError::Network(err.to_string())
        }
    }

    fn extract(&self, json: &Value) -> Result<Completion, AiError> {
        let text = json
            .pointer(&self.config.response_text_pointer)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AiError::InvalidResponse(format!(
                    "no text at {}",
                    self.config.response_text_pointer
                ))
            })?;
        let tokens_used = if self.config.usage_tokens_pointer.is_empty() {
            0
        } else {
            json.pointer(&self.config.usage_tokens_pointer)
                .and_then(|v| v.as_i64())
                .unwrap_or(0)
        };
        Ok(Completion {
            text: text.to_string(),
            tokens_used,
        })
    }

    async fn ensure_registered(&self) {
        self.registered
            .get_or_init(|| async {
                if let Err(e) = self.sink.get_or_create_service_status(&self.identity).await {
                    warn!(error = %e, "failed to register AI service status");
                }
            })
            .await;
    }

    async fn record(&self, delta: StatusDelta) {
        if let Err(e) = self.sink.update_service_status(&delta).await {
            warn!(error = %e, "failed to update AI service status");
        }
    }
}

#[async_trait]
impl AiBackend for AiClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn unit_price(&self) -> f64 {
        self.config.unit_price_per_token
    }

    async fn summarize(
        &self,
        log_text: &str,
        metadata: &IncidentMetadata,
        cancel: &CancellationToken,
    ) -> Result<Answer<SummaryReply>, AiError> {
        let prompt = summary_prompt(log_text, metadata, self.config.summary_input_chars);
        let completion = self
            .complete(
                SUMMARY_SYSTEM_PROMPT,
                &prompt,
                self.config.summary_max_tokens,
                SUMMARY_TEMPERATURE,
                cancel,
            )
            .await?;
        let reply = SummaryReply::parse(&completion.text);
        if !reply.is_structured() {
            debug!("summary reply was not JSON, keeping raw text");
        }
        Ok(Answer {
            reply,
            tokens_used: completion.tokens_used,
        })
    }

    async fn suggest_solutions(
        &self,
        log_text: &str,
        metadata: &IncidentMetadata,
        prior: Option<&Summary>,
        cancel: &CancellationToken,
    ) -> Result<Answer<SolutionsReply>, AiError> {
        let prompt = solutions_prompt(log_text, metadata, prior, self.config.solutions_input_chars);
        let completion = self
            .complete(
                SOLUTIONS_SYSTEM_PROMPT,
                &prompt,
                self.config.solutions_max_tokens,
                SOLUTIONS_TEMPERATURE,
                cancel,
            )
            .await?;
        Ok(Answer {
            reply: SolutionsReply::parse(&completion.text),
            tokens_used: completion.tokens_used,
        })
    }
}

fn endpoint_without_query(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}

/// SHA-256 of the API key, hex encoded.
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
