//! Wiring of the analysis pipeline against the SQLite store.
//!
//! Both the CLI commands and the HTTP server build one [`App`] from the
//! loaded [`Config`] and call into it.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use bugseek_core::models::ServiceStatus;
use bugseek_core::patterns::PatternRecognizer;
use bugseek_core::store::PersistError;

use crate::ai_client::{AiBackend, AiClient, ConnectionCheck};
use crate::analysis::Analyzer;
use crate::config::Config;
use crate::db;
use crate::similar::SimilarityEngine;
use crate::sqlite_store::SqliteStore;

pub struct App {
    pub store: Arc<SqliteStore>,
    pub analyzer: Analyzer,
    pub similarity: SimilarityEngine,
    /// `None` when `[ai] enabled = false`.
    pub ai: Option<Arc<AiClient>>,
}

impl App {
    /// Open the database and build every component. Run `bugseek init` first.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let store = Arc::new(SqliteStore::new(pool));

        let recognizer = Arc::new(
            PatternRecognizer::with_extra_rules(config.patterns.rules.clone())
                .context("Invalid [[patterns.rules]] entry")?,
        );

        let ai = if config.ai.enabled {
            Some(Arc::new(AiClient::new(&config.ai, store.clone())?))
        } else {
            info!("AI analysis disabled; using local fallbacks");
            None
        };

        let analyzer = Analyzer::new(
            store.clone(),
            store.clone(),
            recognizer,
            ai.clone().map(|c| c as Arc<dyn AiBackend>),
        );
        let similarity =
            SimilarityEngine::new(store.clone(), store.clone(), config.similarity.clone());

        Ok(Self {
            store,
            analyzer,
            similarity,
            ai,
        })
    }

    /// Probe the AI endpoint. Reports "disabled" without a network call.
    pub async fn check_ai(&self, config: &Config) -> ConnectionCheck {
        match &self.ai {
            Some(client) => client.check_connection().await,
            None => ConnectionCheck {
                connected: false,
                message: "AI analysis is disabled in configuration".to_string(),
                error: None,
                model: config.ai.model.clone(),
                endpoint: String::new(),
            },
        }
    }

    pub async fn service_status(&self) -> Result<Option<ServiceStatus>, PersistError> {
        self.store.service_status().await
    }
}
