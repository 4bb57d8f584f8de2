//! Storage layer for assessment persistence.
//!
//! This module provides SQLite-based storage for assessment results, derived
//! profiles, in-progress questionnaire sessions, chat turns, cached holistic
//! analyses and the LLM invocation log.

mod retry;
mod sqlite;

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

pub use retry::{with_retry, RetryPolicy};
pub use sqlite::SqliteStorage;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::instruments::AssessmentKind;
use crate::risk::{LatestResults, UserAssessmentProfile};
use crate::scoring::{classify, Severity};

/// A submitted questionnaire. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    /// Unique result identifier.
    pub id: String,
    /// Owner of the result.
    pub user_id: String,
    /// Which questionnaire was taken.
    pub assessment_id: AssessmentKind,
    /// Raw total score.
    pub score: f64,
    /// Human-readable band name, e.g. "Moderately severe".
    pub level: String,
    /// Severity band.
    pub severity: Severity,
    /// Answers keyed by question id.
    pub responses: BTreeMap<String, i64>,
    /// When the questionnaire was submitted.
    pub taken_at: DateTime<Utc>,
}

impl AssessmentResult {
    /// Create a result, classifying the score.
    pub fn new(
        user_id: impl Into<String>,
        assessment_id: AssessmentKind,
        score: f64,
        responses: BTreeMap<String, i64>,
    ) -> Self {
        let classification = classify(assessment_id, score);
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            assessment_id,
            score,
            level: classification.level,
            severity: classification.severity,
            responses,
            taken_at: Utc::now(),
        }
    }
}

/// Status of a questionnaire session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// User is still answering.
    #[default]
    InProgress,
    /// A result was submitted for this session.
    Completed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::InProgress => write!(f, "in_progress"),
            SessionStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_progress" => Ok(SessionStatus::InProgress),
            "completed" => Ok(SessionStatus::Completed),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// Partially answered questionnaire that can be resumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSession {
    pub id: String,
    pub user_id: String,
    pub assessment_id: AssessmentKind,
    pub responses: BTreeMap<String, i64>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssessmentSession {
    /// Start a new in-progress session.
    pub fn new(user_id: impl Into<String>, assessment_id: AssessmentKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            assessment_id,
            responses: BTreeMap::new(),
            status: SessionStatus::InProgress,
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of questions still unanswered.
    pub fn remaining(&self) -> usize {
        let total = usize::from(self.assessment_id.instrument().item_count);
        total.saturating_sub(self.responses.len())
    }
}

/// Speaker of a stored chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
    User,
    Assistant,
}

impl std::fmt::Display for ConversationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationRole::User => write!(f, "user"),
            ConversationRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for ConversationRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(ConversationRole::User),
            "assistant" => Ok(ConversationRole::Assistant),
            _ => Err(format!("Unknown conversation role: {}", s)),
        }
    }
}

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub role: ConversationRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        role: ConversationRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Cached holistic analysis for a user.
///
/// Valid only while `fingerprint` matches the ids of the results it was
/// computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallAssessment {
    pub user_id: String,
    pub fingerprint: String,
    pub analysis: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Audit record of one LLM-backed operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmInvocation {
    /// Unique invocation identifier.
    pub id: String,
    /// User the call was made for, if any.
    pub user_id: Option<String>,
    /// Operation name, e.g. "explanation".
    pub operation: String,
    /// Model requested.
    pub model: Option<String>,
    /// Wall-clock latency.
    pub latency_ms: Option<i64>,
    /// Whether the model produced a usable answer.
    pub success: bool,
    /// Whether static fallback content was returned instead.
    pub fallback_used: bool,
    /// Error message when the call failed.
    pub error: Option<String>,
    /// When the call was made.
    pub created_at: DateTime<Utc>,
}

impl LlmInvocation {
    /// Create a new invocation log entry
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: None,
            operation: operation.into(),
            model: None,
            latency_ms: None,
            success: true,
            fallback_used: false,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Set the user ID
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the model name
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Mark as successful
    pub fn success(mut self, latency_ms: i64) -> Self {
        self.success = true;
        self.fallback_used = false;
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Mark as failed; the caller served fallback content
    pub fn fallback(mut self, error: impl Into<String>, latency_ms: i64) -> Self {
        self.success = false;
        self.fallback_used = true;
        self.error = Some(error.into());
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// Storage trait for assessment persistence.
#[async_trait]
pub trait Storage: Send + Sync {
    // Result operations

    /// Insert a new result. Fails with a constraint error if the id exists.
    async fn insert_result(&self, result: &AssessmentResult) -> StorageResult<()>;
    /// Get a result by ID.
    async fn get_result(&self, id: &str) -> StorageResult<Option<AssessmentResult>>;
    /// Get the newest result of each type for a user.
    async fn get_latest_per_type(&self, user_id: &str) -> StorageResult<LatestResults>;
    /// Get a user's results, newest first.
    async fn get_history(&self, user_id: &str, limit: u32) -> StorageResult<Vec<AssessmentResult>>;

    // Profile operations

    /// Insert or replace a user's derived profile.
    async fn upsert_profile(&self, profile: &UserAssessmentProfile) -> StorageResult<()>;
    /// Get a user's stored profile.
    async fn get_profile(&self, user_id: &str) -> StorageResult<Option<UserAssessmentProfile>>;

    // Session operations

    /// Insert or update a questionnaire session.
    async fn upsert_session(&self, session: &AssessmentSession) -> StorageResult<()>;
    /// Get the in-progress session for a user and questionnaire.
    async fn get_active_session(
        &self,
        user_id: &str,
        assessment_id: AssessmentKind,
    ) -> StorageResult<Option<AssessmentSession>>;
    /// Mark any in-progress session for this questionnaire as completed.
    async fn complete_sessions(&self, user_id: &str, assessment_id: AssessmentKind) -> StorageResult<u64>;

    // Conversation operations

    /// Append a chat turn.
    async fn append_message(&self, message: &ConversationMessage) -> StorageResult<()>;
    /// Get the most recent turns of a conversation in chronological order.
    async fn get_recent_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: u32,
    ) -> StorageResult<Vec<ConversationMessage>>;

    // Holistic analysis cache

    /// Get the cached holistic analysis for a user.
    async fn get_overall_assessment(&self, user_id: &str) -> StorageResult<Option<OverallAssessment>>;
    /// Insert or replace the cached holistic analysis.
    async fn save_overall_assessment(&self, overall: &OverallAssessment) -> StorageResult<()>;

    // Invocation log

    /// Record an LLM invocation.
    async fn log_invocation(&self, invocation: &LlmInvocation) -> StorageResult<()>;
}
