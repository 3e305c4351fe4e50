//! TOML configuration.
//!
//! Every knob the analysis core needs (endpoint, key source, retries,
//! timeouts, pricing, similarity limits) comes from here; nothing is
//! hardcoded in the pipeline itself.
//!
//! ```toml
//! [db]
//! path = "./data/bugseek.sqlite"
//!
//! [ai]
//! url = "https://gateway.example.com/openai/deployments/gpt-4o-mini/chat/completions?api-version=2024-10-21"
//! api_key_env = "OPENAI_API_KEY"
//! model = "gpt-4o-mini"
//!
//! [similarity]
//! threshold = 0.7
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bugseek_core::patterns::PatternRule;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub patterns: PatternsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Settings for the external chat-completion endpoint.
///
/// The request body is `{messages, max_tokens, temperature}` plus `model`
/// when `send_model` is set, plus everything in `extra_body`. Reply text and
/// token usage are located with JSON pointers so other vendors' shapes can be
/// used without code changes.
#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Full completion URL, including any query string the provider needs.
    #[serde(default)]
    pub url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    /// Prepended to the key in the header value, e.g. `"Bearer "`.
    #[serde(default)]
    pub api_key_prefix: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub send_model: bool,
    /// Total attempts per completion, the first one included.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Estimated cost per token, in the billing currency.
    #[serde(default = "default_unit_price")]
    pub unit_price_per_token: f64,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
    #[serde(default = "default_solutions_max_tokens")]
    pub solutions_max_tokens: u32,
    #[serde(default = "default_summary_input_chars")]
    pub summary_input_chars: usize,
    #[serde(default = "default_solutions_input_chars")]
    pub solutions_input_chars: usize,
    #[serde(default = "default_text_pointer")]
    pub response_text_pointer: String,
    #[serde(default = "default_usage_pointer")]
    pub usage_tokens_pointer: String,
    /// Extra top-level fields merged into every request body.
    #[serde(default)]
    pub extra_body: BTreeMap<String, toml::Value>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: String::new(),
            api_key_env: default_api_key_env(),
            api_key_header: default_api_key_header(),
            api_key_prefix: String::new(),
            model: default_model(),
            send_model: false,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            unit_price_per_token: default_unit_price(),
            summary_max_tokens: default_summary_max_tokens(),
            solutions_max_tokens: default_solutions_max_tokens(),
            summary_input_chars: default_summary_input_chars(),
            solutions_input_chars: default_solutions_input_chars(),
            response_text_pointer: default_text_pointer(),
            usage_tokens_pointer: default_usage_pointer(),
            extra_body: BTreeMap::new(),
        }
    }
}

impl AiConfig {
    /// Attempts made by one completion call; never less than one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay before retry number `retry` (1-based): `initial * multiplier^(retry-1)`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16) as i32;
        let ms = self.backoff_initial_ms as f64 * self.backoff_multiplier.powi(exp);
        Duration::from_millis(ms.min(u64::MAX as f64) as u64)
    }

    /// The configured API key, if its environment variable is set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    /// `extra_body` converted to JSON.
    pub fn extra_body_json(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.extra_body {
            let json = serde_json::to_value(v)
                .with_context(|| format!("ai.extra_body.{} is not representable as JSON", k))?;
            map.insert(k.clone(), json);
        }
        Ok(map)
    }
}

fn default_true() -> bool {
    true
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_api_key_header() -> String {
    "api-key".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_backoff_initial_ms() -> u64 {
    1000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_unit_price() -> f64 {
    0.00002
}
fn default_summary_max_tokens() -> u32 {
    1000
}
fn default_solutions_max_tokens() -> u32 {
    1500
}
fn default_summary_input_chars() -> usize {
    8000
}
fn default_solutions_input_chars() -> usize {
    6000
}
fn default_text_pointer() -> String {
    "/choices/0/message/content".to_string()
}
fn default_usage_pointer() -> String {
    "/usage/total_tokens".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimilarityConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Size of the candidate pool scored per request.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    /// Maximum matches returned to the caller.
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            candidate_limit: default_candidate_limit(),
            result_limit: default_result_limit(),
        }
    }
}

fn default_threshold() -> f64 {
    bugseek_core::similarity::DEFAULT_THRESHOLD
}
fn default_candidate_limit() -> usize {
    100
}
fn default_result_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Incident content beyond this many bytes is cut on import.
    #[serde(default = "default_preview_bytes")]
    pub preview_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            preview_bytes: default_preview_bytes(),
        }
    }
}

fn default_preview_bytes() -> usize {
    64 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

/// Additional pattern rules, evaluated after the built-in table.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PatternsConfig {
    #[serde(default)]
    pub rules: Vec<PatternRule>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if !(0.0..=1.0).contains(&config.similarity.threshold) {
        anyhow::bail!("similarity.threshold must be in [0.0, 1.0]");
    }
    if config.similarity.candidate_limit == 0 {
        anyhow::bail!("similarity.candidate_limit must be >= 1");
    }
    if config.similarity.result_limit == 0 {
        anyhow::bail!("similarity.result_limit must be >= 1");
    }
    if config.ingest.preview_bytes == 0 {
        anyhow::bail!("ingest.preview_bytes must be > 0");
    }

    if config.ai.enabled {
        if config.ai.url.trim().is_empty() {
            anyhow::bail!("ai.url must be set when ai.enabled = true");
        }
        if config.ai.max_retries == 0 {
            anyhow::bail!("ai.max_retries must be >= 1 (it counts total attempts)");
        }
        if config.ai.timeout_secs == 0 {
            anyhow::bail!("ai.timeout_secs must be > 0");
        }
        if config.ai.backoff_multiplier < 1.0 {
            anyhow::bail!("ai.backoff_multiplier must be >= 1.0");
        }
        if config.ai.unit_price_per_token < 0.0 {
            anyhow::bail!("ai.unit_price_per_token must be >= 0");
        }
        for (name, pointer) in [
            ("response_text_pointer", &config.ai.response_text_pointer),
            ("usage_tokens_pointer", &config.ai.usage_tokens_pointer),
        ] {
            if !pointer.is_empty() && !pointer.starts_with('/') {
                anyhow::bail!("ai.{} must be a JSON pointer starting with '/'", name);
            }
        }
    }

    Ok(config)
}
