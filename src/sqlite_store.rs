//! SQLite-backed [`IncidentStore`] and [`AnalysisSink`].
//!
//! Maps each store operation onto the schema created by
//! [`migrate`](crate::migrate). Timestamps are stored as Unix milliseconds and
//! list-valued fields as JSON text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use bugseek_core::models::{
    AnalysisResult, AnalysisStatus, AnalysisType, CallOutcome, ConfidenceTier, Incident,
    IncidentMetadata, ServiceIdentity, ServiceStatus, Severity, SimilarityMatch, StatusDelta,
};
use bugseek_core::store::{latest_per_target, AnalysisSink, IncidentStore, PersistError};

/// SQLite implementation of the store traits.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace an incident. Used by `bugseek import`.
    pub async fn insert_incident(&self, incident: &Incident) -> Result<(), PersistError> {
        let m = &incident.metadata;
        sqlx::query(
            r#"
            INSERT INTO incidents (id, team_name, module, error_name, description, owner,
                                   log_file_name, declared_severity, environment, content,
                                   created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                team_name = excluded.team_name,
                module = excluded.module,
                error_name = excluded.error_name,
                description = excluded.description,
                owner = excluded.owner,
                log_file_name = excluded.log_file_name,
                declared_severity = excluded.declared_severity,
                environment = excluded.environment,
                content = excluded.content
            "#,
        )
        .bind(&incident.id)
        .bind(&m.team_name)
        .bind(&m.module)
        .bind(&m.error_name)
        .bind(&m.description)
        .bind(&m.owner)
        .bind(&m.log_file_name)
        .bind(&m.declared_severity)
        .bind(&m.environment)
        .bind(&incident.content)
        .bind(incident.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(PersistError::backend)?;
        Ok(())
    }

    /// Current service status without creating it.
    pub async fn service_status(&self) -> Result<Option<ServiceStatus>, PersistError> {
        let row = sqlx::query(STATUS_SELECT)
            .fetch_optional(&self.pool)
            .await
            .map_err(PersistError::backend)?;
        row.map(|r| status_from_row(&r)).transpose()
    }
}

const INCIDENT_COLUMNS: &str = "id, team_name, module, error_name, description, owner, \
     log_file_name, declared_severity, environment, content, created_at";

const ANALYSIS_COLUMNS: &str = "id, incident_id, analysis_type, status, summary, confidence, \
     keywords_json, solutions_json, root_cause, investigation_areas_json, error_pattern, \
     error_category, estimated_severity, ai_severity, model_used, tokens_used, estimated_cost, \
     attempt, started_at, finished_at, error_message";

const STATUS_SELECT: &str = "SELECT endpoint, model, api_key_hash, is_connected, last_check_at, \
     last_success_at, last_error, total_calls, total_tokens, estimated_cost \
     FROM service_status WHERE id = 1";

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, PersistError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(PersistError::backend)
}

fn millis_to_dt(ms: i64) -> Result<DateTime<Utc>, PersistError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| PersistError::Corrupt(format!("timestamp out of range: {}", ms)))
}

fn opt_millis_to_dt(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, PersistError> {
    ms.map(millis_to_dt).transpose()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, PersistError> {
    serde_json::to_string(value).map_err(PersistError::backend)
}

fn from_json<T: serde::de::DeserializeOwned>(text: &str, column: &str) -> Result<T, PersistError> {
    serde_json::from_str(text)
        .map_err(|e| PersistError::Corrupt(format!("{} is not valid JSON: {}", column, e)))
}

fn parse_severity(value: Option<String>) -> Option<Severity> {
    value.as_deref().and_then(Severity::parse)
}

fn incident_from_row(row: &SqliteRow) -> Result<Incident, PersistError> {
    Ok(Incident {
        id: get(row, "id")?,
        content: get(row, "content")?,
        metadata: IncidentMetadata {
            team_name: get(row, "team_name")?,
            module: get(row, "module")?,
            error_name: get(row, "error_name")?,
            description: get(row, "description")?,
            owner: get(row, "owner")?,
            log_file_name: get(row, "log_file_name")?,
            declared_severity: get(row, "declared_severity")?,
            environment: get(row, "environment")?,
        },
        created_at: millis_to_dt(get(row, "created_at")?)?,
    })
}

fn analysis_from_row(row: &SqliteRow) -> Result<AnalysisResult, PersistError> {
    let analysis_type: String = get(row, "analysis_type")?;
    let status: String = get(row, "status")?;
    let keywords: String = get(row, "keywords_json")?;
    let solutions: String = get(row, "solutions_json")?;
    let areas: String = get(row, "investigation_areas_json")?;

    Ok(AnalysisResult {
        id: get(row, "id")?,
        incident_id: get(row, "incident_id")?,
        analysis_type: AnalysisType::parse(&analysis_type)
            .ok_or_else(|| PersistError::Corrupt(format!("analysis type '{}'", analysis_type)))?,
        status: AnalysisStatus::parse(&status)
            .ok_or_else(|| PersistError::Corrupt(format!("analysis status '{}'", status)))?,
        summary: get(row, "summary")?,
        confidence: get(row, "confidence")?,
        keywords: from_json(&keywords, "keywords_json")?,
        solutions: from_json(&solutions, "solutions_json")?,
        root_cause: get(row, "root_cause")?,
        investigation_areas: from_json(&areas, "investigation_areas_json")?,
        error_pattern: get(row, "error_pattern")?,
        error_category: get(row, "error_category")?,
        estimated_severity: parse_severity(get(row, "estimated_severity")?),
        ai_severity: parse_severity(get(row, "ai_severity")?),
        model_used: get(row, "model_used")?,
        tokens_used: get(row, "tokens_used")?,
        estimated_cost: get(row, "estimated_cost")?,
        attempt: get(row, "attempt")?,
        started_at: opt_millis_to_dt(get(row, "started_at")?)?,
        finished_at: opt_millis_to_dt(get(row, "finished_at")?)?,
        error_message: get(row, "error_message")?,
    })
}

fn edge_from_row(row: &SqliteRow) -> Result<SimilarityMatch, PersistError> {
    let confidence: String = get(row, "confidence")?;
    Ok(SimilarityMatch {
        id: get(row, "id")?,
        source_incident_id: get(row, "source_incident_id")?,
        target_incident_id: get(row, "target_incident_id")?,
        score: get(row, "score")?,
        method: get(row, "method")?,
        confidence: ConfidenceTier::parse(&confidence)
            .ok_or_else(|| PersistError::Corrupt(format!("confidence tier '{}'", confidence)))?,
        created_at: millis_to_dt(get(row, "created_at")?)?,
    })
}

fn status_from_row(row: &SqliteRow) -> Result<ServiceStatus, PersistError> {
    let connected: i64 = get(row, "is_connected")?;
    Ok(ServiceStatus {
        identity: ServiceIdentity {
            endpoint: get(row, "endpoint")?,
            model: get(row, "model")?,
            api_key_hash: get(row, "api_key_hash")?,
        },
        is_connected: connected != 0,
        last_check_at: opt_millis_to_dt(get(row, "last_check_at")?)?,
        last_success_at: opt_millis_to_dt(get(row, "last_success_at")?)?,
        last_error: get(row, "last_error")?,
        total_calls: get(row, "total_calls")?,
        total_tokens: get(row, "total_tokens")?,
        estimated_cost: get(row, "estimated_cost")?,
    })
}

#[async_trait]
impl IncidentStore for SqliteStore {
    async fn get_incident(&self, id: &str) -> Result<Option<Incident>, PersistError> {
        let sql = format!("SELECT {} FROM incidents WHERE id = ?", INCIDENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PersistError::backend)?;
        row.map(|r| incident_from_row(&r)).transpose()
    }

    async fn list_incidents(
        &self,
        excluding: &str,
        limit: usize,
    ) -> Result<Vec<Incident>, PersistError> {
        let sql = format!(
            "SELECT {} FROM incidents WHERE id != ? ORDER BY created_at DESC, id ASC LIMIT ?",
            INCIDENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(excluding)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(PersistError::backend)?;
        rows.iter().map(incident_from_row).collect()
    }
}

#[async_trait]
impl AnalysisSink for SqliteStore {
    async fn upsert_analysis_result(&self, result: &AnalysisResult) -> Result<(), PersistError> {
        sqlx::query(
            r#"
            INSERT INTO analysis_results (id, incident_id, analysis_type, status, summary,
                confidence, keywords_json, solutions_json, root_cause, investigation_areas_json,
                error_pattern, error_category, estimated_severity, ai_severity, model_used,
                tokens_used, estimated_cost, attempt, started_at, finished_at, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(incident_id, analysis_type) DO UPDATE SET
                status = excluded.status,
                summary = excluded.summary,
                confidence = excluded.confidence,
                keywords_json = excluded.keywords_json,
                solutions_json = excluded.solutions_json,
                root_cause = excluded.root_cause,
                investigation_areas_json = excluded.investigation_areas_json,
                error_pattern = excluded.error_pattern,
                error_category = excluded.error_category,
                estimated_severity = excluded.estimated_severity,
                ai_severity = excluded.ai_severity,
                model_used = excluded.model_used,
                tokens_used = excluded.tokens_used,
                estimated_cost = excluded.estimated_cost,
                attempt = excluded.attempt,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                error_message = excluded.error_message
            "#,
        )
        .bind(&result.id)
        .bind(&result.incident_id)
        .bind(result.analysis_type.as_str())
        .bind(result.status.as_str())
        .bind(&result.summary)
        .bind(result.confidence)
        .bind(to_json(&result.keywords)?)
        .bind(to_json(&result.solutions)?)
        .bind(&result.root_cause)
        .bind(to_json(&result.investigation_areas)?)
        .bind(&result.error_pattern)
        .bind(&result.error_category)
        .bind(result.estimated_severity.map(|s| s.as_str()))
        .bind(result.ai_severity.map(|s| s.as_str()))
        .bind(&result.model_used)
        .bind(result.tokens_used)
        .bind(result.estimated_cost)
        .bind(result.attempt)
        .bind(result.started_at.map(|t| t.timestamp_millis()))
        .bind(result.finished_at.map(|t| t.timestamp_millis()))
        .bind(&result.error_message)
        .execute(&self.pool)
        .await
        .map_err(PersistError::backend)?;
        Ok(())
    }

    async fn get_analysis_result(
        &self,
        incident_id: &str,
        analysis_type: AnalysisType,
    ) -> Result<Option<AnalysisResult>, PersistError> {
        let sql = format!(
            "SELECT {} FROM analysis_results WHERE incident_id = ? AND analysis_type = ?",
            ANALYSIS_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(incident_id)
            .bind(analysis_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(PersistError::backend)?;
        row.map(|r| analysis_from_row(&r)).transpose()
    }

    async fn insert_similarity_match(&self, edge: &SimilarityMatch) -> Result<(), PersistError> {
        sqlx::query(
            r#"
            INSERT INTO similarity_matches (id, source_incident_id, target_incident_id, score,
                                            method, confidence, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&edge.id)
        .bind(&edge.source_incident_id)
        .bind(&edge.target_incident_id)
        .bind(edge.score)
        .bind(&edge.method)
        .bind(edge.confidence.as_str())
        .bind(edge.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(PersistError::backend)?;
        Ok(())
    }

    async fn list_similarity_matches(
        &self,
        source_id: &str,
    ) -> Result<Vec<SimilarityMatch>, PersistError> {
        let rows = sqlx::query(
            "SELECT id, source_incident_id, target_incident_id, score, method, confidence, \
             created_at FROM similarity_matches WHERE source_incident_id = ?",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(PersistError::backend)?;
        let edges = rows
            .iter()
            .map(edge_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(latest_per_target(edges))
    }

    async fn get_or_create_service_status(
        &self,
        identity: &ServiceIdentity,
    ) -> Result<ServiceStatus, PersistError> {
        sqlx::query(
            r#"
            INSERT INTO service_status (id, endpoint, model, api_key_hash)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                endpoint = excluded.endpoint,
                model = excluded.model,
                api_key_hash = excluded.api_key_hash
            "#,
        )
        .bind(&identity.endpoint)
        .bind(&identity.model)
        .bind(&identity.api_key_hash)
        .execute(&self.pool)
        .await
        .map_err(PersistError::backend)?;

        self.service_status()
            .await?
            .ok_or_else(|| PersistError::NotFound("service_status".to_string()))
    }

    async fn update_service_status(&self, delta: &StatusDelta) -> Result<(), PersistError> {
        sqlx::query("INSERT OR IGNORE INTO service_status (id) VALUES (1)")
            .execute(&self.pool)
            .await
            .map_err(PersistError::backend)?;

        let at = delta.at.timestamp_millis();
        // Single statement so concurrent callers never lose an increment.
        let query = match &delta.outcome {
            CallOutcome::Connected => sqlx::query(
                r#"
                UPDATE service_status SET
                    total_calls = total_calls + ?,
                    total_tokens = total_tokens + ?,
                    estimated_cost = estimated_cost + ?,
                    is_connected = 1,
                    last_check_at = ?,
                    last_success_at = ?,
                    last_error = NULL
                WHERE id = 1
                "#,
            )
            .bind(delta.calls)
            .bind(delta.tokens)
            .bind(delta.cost)
            .bind(at)
            .bind(at),
            CallOutcome::Failed(message) => sqlx::query(
                r#"
                UPDATE service_status SET
                    total_calls = total_calls + ?,
                    total_tokens = total_tokens + ?,
                    estimated_cost = estimated_cost + ?,
                    is_connected = 0,
                    last_check_at = ?,
                    last_error = ?
                WHERE id = 1
                "#,
            )
            .bind(delta.calls)
            .bind(delta.tokens)
            .bind(delta.cost)
            .bind(at)
            .bind(message.clone()),
        };
        query
            .execute(&self.pool)
            .await
            .map_err(PersistError::backend)?;
        Ok(())
    }
}
