use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{require_non_empty, ServiceCore};
use crate::error::{AppResult, StorageResult};
use crate::instruments::AssessmentKind;
use crate::risk::{build_context, AssessmentContext, LatestResults, UserAssessmentProfile};
use crate::storage::{with_retry, AssessmentResult, AssessmentSession, Storage};

/// Default number of results returned by history.
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Input for a questionnaire submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitParams {
    pub user_id: String,
    pub assessment_id: String,
    /// Answers keyed by question id, e.g. `{"phq9_1": 2}`
    pub responses: BTreeMap<String, i64>,
}

/// Stored result plus the recomputed context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResult {
    pub result: AssessmentResult,
    pub context: AssessmentContext,
}

/// Input for saving partial answers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSaveParams {
    pub user_id: String,
    pub assessment_id: String,
    #[serde(default)]
    pub responses: BTreeMap<String, i64>,
}

type HistoryCell = Arc<OnceCell<Vec<AssessmentResult>>>;
type HistoryKey = (String, u32);
type InflightMap = Mutex<HashMap<HistoryKey, HistoryCell>>;

fn lock_inflight(map: &InflightMap) -> MutexGuard<'_, HashMap<HistoryKey, HistoryCell>> {
    map.lock().unwrap_or_else(|e| {
        warn!("history_inflight mutex was poisoned, recovering");
        e.into_inner()
    })
}

/// Removes an in-flight history entry when the caller finishes or is dropped.
struct InflightEntry<'a> {
    map: &'a InflightMap,
    key: HistoryKey,
    cell: HistoryCell,
}

impl Drop for InflightEntry<'_> {
    fn drop(&mut self) {
        let mut inflight = lock_inflight(self.map);
        if inflight.get(&self.key).is_some_and(|c| Arc::ptr_eq(c, &self.cell)) {
            inflight.remove(&self.key);
        }
    }
}

/// Submission, context, history and session operations
#[derive(Clone)]
pub struct AssessmentService {
    core: ServiceCore,
    history_inflight: Arc<InflightMap>,
}

impl AssessmentService {
    /// Create a new assessment service
    pub fn new(core: ServiceCore) -> Self {
        Self {
            core,
            history_inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validate, score, classify and persist a questionnaire.
    pub async fn submit(&self, params: SubmitParams) -> AppResult<SubmitResult> {
        let start = Instant::now();
        require_non_empty("user_id", &params.user_id)?;

        let kind: AssessmentKind = params.assessment_id.parse()?;
        let score = kind.instrument().score(&params.responses)?;
        let result = AssessmentResult::new(&params.user_id, kind, f64::from(score), params.responses);

        debug!(user_id = %result.user_id, assessment = %kind, score, "Storing assessment result");

        let policy = self.core.retry_policy();
        let storage = self.core.storage();
        with_retry(&policy, "insert_result", || storage.insert_result(&result)).await?;

        match storage.complete_sessions(&result.user_id, kind).await {
            Ok(closed) if closed > 0 => debug!(user_id = %result.user_id, closed, "Sessions completed"),
            Ok(_) => {}
            Err(e) => warn!(user_id = %result.user_id, error = %e, "Failed to complete sessions"),
        }

        let context = self.refresh_profile(&result.user_id).await?;

        info!(
            user_id = %result.user_id,
            result_id = %result.id,
            assessment = %kind,
            severity = %result.severity,
            risk_level = %context.risk_level,
            latency_ms = start.elapsed().as_millis() as u64,
            "Assessment submitted"
        );

        Ok(SubmitResult { result, context })
    }

    /// Recompute the profile from the latest results and store it.
    ///
    /// A failed profile write is logged and skipped; the profile is only a
    /// cache of the results table.
    pub async fn refresh_profile(&self, user_id: &str) -> AppResult<AssessmentContext> {
        let latest = self.core.storage().get_latest_per_type(user_id).await?;
        let context = build_context(user_id, &latest, &self.core.config().risk);

        let policy = self.core.retry_policy();
        let storage = self.core.storage();
        if let Err(e) = with_retry(&policy, "upsert_profile", || {
            storage.upsert_profile(&context.profile)
        })
        .await
        {
            warn!(user_id, error = %e, "Failed to store assessment profile");
        }

        Ok(context)
    }

    /// Latest results per type for a user.
    pub async fn latest(&self, user_id: &str) -> AppResult<LatestResults> {
        require_non_empty("user_id", user_id)?;
        Ok(self.core.storage().get_latest_per_type(user_id).await?)
    }

    /// Compute the assessment context for a user. Users without results get
    /// a low-risk context with default focus areas.
    pub async fn context(&self, user_id: &str) -> AppResult<AssessmentContext> {
        let latest = self.latest(user_id).await?;
        Ok(build_context(user_id, &latest, &self.core.config().risk))
    }

    /// Stored profile, or one computed from scratch when none is stored yet.
    pub async fn profile(&self, user_id: &str) -> AppResult<UserAssessmentProfile> {
        require_non_empty("user_id", user_id)?;
        match self.core.storage().get_profile(user_id).await? {
            Some(profile) => Ok(profile),
            None => Ok(self.context(user_id).await?.profile),
        }
    }

    /// A user's results, newest first.
    ///
    /// Concurrent calls for the same user and limit share one query.
    pub async fn history(&self, user_id: &str, limit: Option<u32>) -> AppResult<Vec<AssessmentResult>> {
        require_non_empty("user_id", user_id)?;
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1);
        let key = (user_id.to_string(), limit);

        let cell = lock_inflight(&self.history_inflight)
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let entry = InflightEntry {
            map: &self.history_inflight,
            key,
            cell,
        };

        let storage = self.core.storage();
        let result: StorageResult<Vec<AssessmentResult>> = entry
            .cell
            .get_or_try_init(|| storage.get_history(user_id, limit))
            .await
            .cloned();
        drop(entry);

        Ok(result?)
    }

    /// Save partial answers for later resumption.
    pub async fn save_session(&self, params: SessionSaveParams) -> AppResult<AssessmentSession> {
        require_non_empty("user_id", &params.user_id)?;
        let kind: AssessmentKind = params.assessment_id.parse()?;
        kind.instrument().validate_partial(&params.responses)?;

        let storage = self.core.storage();
        let mut session = match storage.get_active_session(&params.user_id, kind).await? {
            Some(existing) => existing,
            None => AssessmentSession::new(&params.user_id, kind),
        };
        session.responses.extend(params.responses);
        session.updated_at = Utc::now();

        let policy = self.core.retry_policy();
        with_retry(&policy, "upsert_session", || storage.upsert_session(&session)).await?;

        debug!(
            user_id = %session.user_id,
            session_id = %session.id,
            remaining = session.remaining(),
            "Session saved"
        );
        Ok(session)
    }

    /// In-progress session for a questionnaire, if any.
    pub async fn get_session(&self, user_id: &str, assessment_id: &str) -> AppResult<Option<AssessmentSession>> {
        require_non_empty("user_id", user_id)?;
        let kind: AssessmentKind = assessment_id.parse()?;
        Ok(self.core.storage().get_active_session(user_id, kind).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Config, DatabaseConfig, LogFormat, LoggingConfig, OpenAiConfig, PersistenceConfig,
        RequestConfig, TimeoutConfig,
    };
    use crate::error::{AppError, AssessmentError};
    use crate::llm::MockLlmClient;
    use crate::risk::{RiskLevel, RiskThresholds};
    use crate::scoring::Severity;
    use crate::storage::SqliteStorage;
    use std::path::PathBuf;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            openai: OpenAiConfig {
                api_key: "test-key".to_string(),
                base_url: "http://localhost".to_string(),
                model: "test-model".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from(":memory:"),
                max_connections: 1,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: LogFormat::Pretty,
            },
            request: RequestConfig::default(),
            timeouts: TimeoutConfig::default(),
            persistence: PersistenceConfig {
                max_attempts: 3,
                backoff_ms: 1,
            },
            risk: RiskThresholds::default(),
        }
    }

    async fn create_service() -> AssessmentService {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let llm = Arc::new(MockLlmClient::new());
        AssessmentService::new(ServiceCore::new(storage, llm, test_config()))
    }

    fn answers(kind: AssessmentKind, values: &[i64]) -> BTreeMap<String, i64> {
        let instrument = kind.instrument();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (instrument.item_id(i as u8 + 1), *v))
            .collect()
    }

    #[tokio::test]
    async fn test_submit_scores_and_builds_context() {
        let service = create_service().await;
        let submitted = service
            .submit(SubmitParams {
                user_id: "u1".to_string(),
                assessment_id: "phq9".to_string(),
                responses: answers(AssessmentKind::Phq9, &[3, 3, 3, 3, 3, 3, 2, 2, 0]),
            })
            .await
            .unwrap();

        assert_eq!(submitted.result.score, 22.0);
        assert_eq!(submitted.result.severity, Severity::Severe);
        assert_eq!(submitted.context.risk_level, RiskLevel::Crisis);

        let stored = service.profile("u1").await.unwrap();
        assert!(stored.depression.is_some());
    }

    #[tokio::test]
    async fn test_submit_rejects_incomplete_responses() {
        let service = create_service().await;
        let err = service
            .submit(SubmitParams {
                user_id: "u1".to_string(),
                assessment_id: "gad7".to_string(),
                responses: answers(AssessmentKind::Gad7, &[1, 1, 1]),
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Assessment(AssessmentError::Validation { ref field, .. }) if field == "gad7_4"
        ));
        assert!(service.history("u1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_instrument() {
        let service = create_service().await;
        let err = service
            .submit(SubmitParams {
                user_id: "u1".to_string(),
                assessment_id: "hamd".to_string(),
                responses: BTreeMap::new(),
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Assessment(AssessmentError::UnknownInstrument { .. })
        ));
    }

    #[tokio::test]
    async fn test_context_for_new_user_is_low() {
        let service = create_service().await;
        let context = service.context("nobody").await.unwrap();
        assert_eq!(context.risk_level, RiskLevel::Low);
        assert!(!context.profile.has_assessments());
    }

    #[tokio::test]
    async fn test_session_save_merges_and_completes_on_submit() {
        let service = create_service().await;

        let first = service
            .save_session(SessionSaveParams {
                user_id: "u1".to_string(),
                assessment_id: "who5".to_string(),
                responses: answers(AssessmentKind::Who5, &[3, 3]),
            })
            .await
            .unwrap();
        let mut more = BTreeMap::new();
        more.insert("who5_3".to_string(), 4);
        let second = service
            .save_session(SessionSaveParams {
                user_id: "u1".to_string(),
                assessment_id: "who5".to_string(),
                responses: more,
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.responses.len(), 3);
        assert_eq!(second.remaining(), 2);

        service
            .submit(SubmitParams {
                user_id: "u1".to_string(),
                assessment_id: "who5".to_string(),
                responses: answers(AssessmentKind::Who5, &[3, 3, 4, 4, 4]),
            })
            .await
            .unwrap();

        assert!(service.get_session("u1", "who5").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_save_rejects_out_of_range() {
        let service = create_service().await;
        let err = service
            .save_session(SessionSaveParams {
                user_id: "u1".to_string(),
                assessment_id: "who5".to_string(),
                responses: answers(AssessmentKind::Who5, &[9]),
            })
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_history_calls_agree() {
        let service = create_service().await;
        for _ in 0..3 {
            service
                .submit(SubmitParams {
                    user_id: "u1".to_string(),
                    assessment_id: "ace".to_string(),
                    responses: answers(AssessmentKind::Ace, &[1, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
                })
                .await
                .unwrap();
        }

        let (a, b, c) = tokio::join!(
            service.history("u1", Some(10)),
            service.history("u1", Some(10)),
            service.history("u1", Some(10)),
        );
        let a = a.unwrap();
        assert_eq!(a.len(), 3);
        assert_eq!(a, b.unwrap());
        assert_eq!(a, c.unwrap());
        assert!(lock_inflight(&service.history_inflight).is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_history_call_leaves_no_entry() {
        let service = create_service().await;

        // A zero deadline drops the query future after at most one poll.
        let _ = tokio::time::timeout(Duration::ZERO, service.history("u1", Some(5))).await;
        assert!(lock_inflight(&service.history_inflight).is_empty());

        service
            .submit(SubmitParams {
                user_id: "u1".to_string(),
                assessment_id: "ace".to_string(),
                responses: answers(AssessmentKind::Ace, &[0; 10]),
            })
            .await
            .unwrap();
        assert_eq!(service.history("u1", Some(5)).await.unwrap().len(), 1);
    }
}
