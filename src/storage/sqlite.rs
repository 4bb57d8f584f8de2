use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info};

use super::{
    AssessmentResult, AssessmentSession, ConversationMessage, LlmInvocation, OverallAssessment,
    SessionStatus, Storage,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::instruments::AssessmentKind;
use crate::risk::{latest_by_kind, LatestResults, UserAssessmentProfile};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory database, used by tests and the one-shot CLI.
    ///
    /// Every pooled connection to `:memory:` opens a separate database, so the
    /// pool is pinned to a single connection that never expires.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }
}

/// Fixed-width timestamps so that text ordering matches time ordering.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Query {
            message: format!("Invalid timestamp in database: {} ({})", raw, e),
        })
}

fn to_json<T: serde::Serialize>(value: &T) -> StorageResult<String> {
    serde_json::to_string(value).map_err(|e| StorageError::Query {
        message: format!("Failed to serialize column: {}", e),
    })
}

fn parse_kind(raw: &str) -> StorageResult<AssessmentKind> {
    raw.parse().map_err(|_| StorageError::Query {
        message: format!("Unknown assessment type in database: {}", raw),
    })
}

fn parse_responses(raw: &str) -> StorageResult<BTreeMap<String, i64>> {
    serde_json::from_str(raw).map_err(|e| StorageError::Query {
        message: format!("Invalid responses column: {}", e),
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn insert_result(&self, result: &AssessmentResult) -> StorageResult<()> {
        let responses = to_json(&result.responses)?;

        sqlx::query(
            r#"
            INSERT INTO assessment_results (id, user_id, assessment_id, score, level, severity, responses, taken_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result.id)
        .bind(&result.user_id)
        .bind(result.assessment_id.id())
        .bind(result.score)
        .bind(&result.level)
        .bind(result.severity.as_str())
        .bind(&responses)
        .bind(ts(&result.taken_at))
        .execute(&self.pool)
        .await?;

        debug!(result_id = %result.id, assessment = %result.assessment_id, "Result stored");
        Ok(())
    }

    async fn get_result(&self, id: &str) -> StorageResult<Option<AssessmentResult>> {
        let row: Option<ResultRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, assessment_id, score, level, severity, responses, taken_at
            FROM assessment_results
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AssessmentResult::try_from).transpose()
    }

    async fn get_latest_per_type(&self, user_id: &str) -> StorageResult<LatestResults> {
        let rows: Vec<ResultRow> = sqlx::query_as(
            r#"
            SELECT r.id, r.user_id, r.assessment_id, r.score, r.level, r.severity, r.responses, r.taken_at
            FROM assessment_results r
            WHERE r.user_id = ?
              AND r.taken_at = (
                  SELECT MAX(taken_at) FROM assessment_results
                  WHERE user_id = r.user_id AND assessment_id = r.assessment_id
              )
            ORDER BY r.taken_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let results = rows
            .into_iter()
            .map(AssessmentResult::try_from)
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(latest_by_kind(results))
    }

    async fn get_history(&self, user_id: &str, limit: u32) -> StorageResult<Vec<AssessmentResult>> {
        let rows: Vec<ResultRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, assessment_id, score, level, severity, responses, taken_at
            FROM assessment_results
            WHERE user_id = ?
            ORDER BY taken_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AssessmentResult::try_from).collect()
    }

    async fn upsert_profile(&self, profile: &UserAssessmentProfile) -> StorageResult<()> {
        let body = to_json(profile)?;
        let updated_at = ts(&profile.updated_at.unwrap_or_else(Utc::now));

        sqlx::query(
            r#"
            INSERT INTO user_assessment_profiles (user_id, profile, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET profile = excluded.profile, updated_at = excluded.updated_at
            "#,
        )
        .bind(&profile.user_id)
        .bind(&body)
        .bind(&updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_profile(&self, user_id: &str) -> StorageResult<Option<UserAssessmentProfile>> {
        let body: Option<(String,)> =
            sqlx::query_as("SELECT profile FROM user_assessment_profiles WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        body.map(|(raw,)| {
            serde_json::from_str(&raw).map_err(|e| StorageError::Query {
                message: format!("Corrupt profile for {}: {}", user_id, e),
            })
        })
        .transpose()
    }

    async fn upsert_session(&self, session: &AssessmentSession) -> StorageResult<()> {
        let responses = to_json(&session.responses)?;

        sqlx::query(
            r#"
            INSERT INTO assessment_sessions (id, user_id, assessment_id, responses, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                responses = excluded.responses,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(session.assessment_id.id())
        .bind(&responses)
        .bind(session.status.to_string())
        .bind(ts(&session.created_at))
        .bind(ts(&session.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_active_session(
        &self,
        user_id: &str,
        assessment_id: AssessmentKind,
    ) -> StorageResult<Option<AssessmentSession>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, assessment_id, responses, status, created_at, updated_at
            FROM assessment_sessions
            WHERE user_id = ? AND assessment_id = ? AND status = 'in_progress'
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(assessment_id.id())
        .fetch_optional(&self.pool)
        .await?;

        row.map(AssessmentSession::try_from).transpose()
    }

    async fn complete_sessions(&self, user_id: &str, assessment_id: AssessmentKind) -> StorageResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE assessment_sessions
            SET status = 'completed', updated_at = ?
            WHERE user_id = ? AND assessment_id = ? AND status = 'in_progress'
            "#,
        )
        .bind(ts(&Utc::now()))
        .bind(user_id)
        .bind(assessment_id.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn append_message(&self, message: &ConversationMessage) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO conversation_progress (id, user_id, conversation_id, role, content, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.user_id)
        .bind(&message.conversation_id)
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(ts(&message.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_recent_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: u32,
    ) -> StorageResult<Vec<ConversationMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, conversation_id, role, content, created_at
            FROM conversation_progress
            WHERE user_id = ? AND conversation_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(conversation_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .into_iter()
            .map(ConversationMessage::try_from)
            .collect::<StorageResult<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn get_overall_assessment(&self, user_id: &str) -> StorageResult<Option<OverallAssessment>> {
        let row: Option<OverallRow> = sqlx::query_as(
            r#"
            SELECT user_id, fingerprint, analysis, created_at
            FROM overall_assessments
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OverallAssessment::try_from).transpose()
    }

    async fn save_overall_assessment(&self, overall: &OverallAssessment) -> StorageResult<()> {
        let analysis = to_json(&overall.analysis)?;

        sqlx::query(
            r#"
            INSERT INTO overall_assessments (user_id, fingerprint, analysis, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                fingerprint = excluded.fingerprint,
                analysis = excluded.analysis,
                created_at = excluded.created_at
            "#,
        )
        .bind(&overall.user_id)
        .bind(&overall.fingerprint)
        .bind(&analysis)
        .bind(ts(&overall.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn log_invocation(&self, invocation: &LlmInvocation) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO llm_invocations (id, user_id, operation, model, latency_ms, success, fallback_used, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&invocation.id)
        .bind(&invocation.user_id)
        .bind(&invocation.operation)
        .bind(&invocation.model)
        .bind(invocation.latency_ms)
        .bind(invocation.success)
        .bind(invocation.fallback_used)
        .bind(&invocation.error)
        .bind(ts(&invocation.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct ResultRow {
    id: String,
    user_id: String,
    assessment_id: String,
    score: f64,
    level: String,
    severity: String,
    responses: String,
    taken_at: String,
}

impl TryFrom<ResultRow> for AssessmentResult {
    type Error = StorageError;

    fn try_from(row: ResultRow) -> StorageResult<Self> {
        let assessment_id = parse_kind(&row.assessment_id)?;
        let severity = row.severity.parse().map_err(|e: String| StorageError::Query { message: e })?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            assessment_id,
            score: row.score,
            level: row.level,
            severity,
            responses: parse_responses(&row.responses)?,
            taken_at: parse_ts(&row.taken_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    assessment_id: String,
    responses: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SessionRow> for AssessmentSession {
    type Error = StorageError;

    fn try_from(row: SessionRow) -> StorageResult<Self> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            assessment_id: parse_kind(&row.assessment_id)?,
            responses: parse_responses(&row.responses)?,
            status: row.status.parse().unwrap_or(SessionStatus::InProgress),
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    user_id: String,
    conversation_id: String,
    role: String,
    content: String,
    created_at: String,
}

impl TryFrom<MessageRow> for ConversationMessage {
    type Error = StorageError;

    fn try_from(row: MessageRow) -> StorageResult<Self> {
        let role = row.role.parse().map_err(|e: String| StorageError::Query { message: e })?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            conversation_id: row.conversation_id,
            role,
            content: row.content,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OverallRow {
    user_id: String,
    fingerprint: String,
    analysis: String,
    created_at: String,
}

impl TryFrom<OverallRow> for OverallAssessment {
    type Error = StorageError;

    fn try_from(row: OverallRow) -> StorageResult<Self> {
        let analysis = serde_json::from_str(&row.analysis).map_err(|e| StorageError::Query {
            message: format!("Invalid analysis column: {}", e),
        })?;

        Ok(Self {
            user_id: row.user_id,
            fingerprint: row.fingerprint,
            analysis,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn corrupt(storage: &SqliteStorage, id: &str, column: &str, value: &str) {
        let mut result = AssessmentResult::new("user-1", AssessmentKind::Phq9, 3.0, BTreeMap::new());
        result.id = id.to_string();
        storage.insert_result(&result).await.unwrap();

        let sql = format!("UPDATE assessment_results SET {} = ? WHERE id = ?", column);
        sqlx::query(&sql)
            .bind(value)
            .bind(id)
            .execute(&storage.pool)
            .await
            .unwrap();
    }

    #[test]
    fn test_timestamps_are_fixed_width() {
        let dt = DateTime::parse_from_rfc3339("2024-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(ts(&dt), "2024-03-01T08:00:00.000000Z");
        assert_eq!(parse_ts(&ts(&dt)).unwrap(), dt);
    }

    #[test]
    fn test_parse_helpers_reject_garbage() {
        assert!(matches!(parse_ts("yesterday"), Err(StorageError::Query { .. })));
        assert!(matches!(parse_responses("{not json"), Err(StorageError::Query { .. })));
        assert_eq!(parse_responses(r#"{"phq9_9":2}"#).unwrap().get("phq9_9"), Some(&2));
    }

    #[tokio::test]
    async fn test_corrupt_timestamp_is_query_error() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        corrupt(&storage, "bad-ts", "taken_at", "not-a-time").await;

        let err = storage.get_result("bad-ts").await.unwrap_err();
        assert!(matches!(err, StorageError::Query { .. }), "got {:?}", err);
        assert!(storage.get_latest_per_type("user-1").await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_responses_is_query_error() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        corrupt(&storage, "bad-json", "responses", "{\"phq9_9\":").await;

        let err = storage.get_history("user-1", 10).await.unwrap_err();
        assert!(matches!(err, StorageError::Query { .. }), "got {:?}", err);
    }
}
