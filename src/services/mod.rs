//! Application services behind the MCP tools.
//!
//! Every service composes a [`ServiceCore`] holding storage, the LLM client
//! and configuration. LLM calls go through [`ServiceCore::call_llm`], which
//! applies the per-operation deadline, records the invocation and never lets
//! an upstream failure escape: callers receive an error they turn into
//! static fallback content.

mod assessment;
mod chat;
mod explanation;
mod holistic;
mod sanitize;

pub use assessment::{AssessmentService, SessionSaveParams, SubmitParams, SubmitResult};
pub use chat::{ChatParams, ChatReply, ChatService, CHAT_HISTORY_TURNS};
pub use explanation::{AssessmentExplanation, ExplainParams, ExplanationService};
pub use holistic::{fingerprint, HolisticAnalysis, HolisticParams, HolisticService};
pub use sanitize::{MAX_LIST_ITEMS, MAX_TEXT_CHARS};

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AssessmentError, LlmError, LlmResult};
use crate::llm::{CompletionOptions, LlmClient, Message};
use crate::storage::{with_retry, LlmInvocation, RetryPolicy, SqliteStorage, Storage};

/// Shown whenever a user may be at risk.
pub const CRISIS_RESOURCES: &str = "If you are thinking about harming yourself or feel unsafe, \
please reach out now: call or text 988 (Suicide & Crisis Lifeline, US), contact your local \
emergency number, or go to the nearest emergency department.";

/// Where generated content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    /// Produced by the model and validated.
    Ai,
    /// Static template used because the model failed, timed out or returned unusable output.
    Fallback,
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<(), AssessmentError> {
    if value.trim().is_empty() {
        return Err(AssessmentError::Validation {
            field: field.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

/// Await `fut` for at most `limit`.
///
/// The future is dropped on expiry, so nothing it would have written lands
/// afterwards.
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> LlmResult<T>
where
    F: Future<Output = LlmResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = limit.as_millis() as u64, "Operation timed out");
            Err(LlmError::Timeout {
                timeout_ms: limit.as_millis() as u64,
            })
        }
    }
}

/// Shared dependencies for all services.
#[derive(Clone)]
pub struct ServiceCore {
    storage: SqliteStorage,
    llm: Arc<dyn LlmClient>,
    config: Config,
}

impl ServiceCore {
    /// Create a new service core.
    pub fn new(storage: SqliteStorage, llm: Arc<dyn LlmClient>, config: Config) -> Self {
        Self {
            storage,
            llm,
            config,
        }
    }

    /// Get a reference to the storage backend.
    #[inline]
    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Get a reference to the LLM client.
    #[inline]
    pub fn llm(&self) -> &dyn LlmClient {
        self.llm.as_ref()
    }

    /// Get a reference to the configuration.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Retry policy for persistence writes.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.config.persistence)
    }

    /// Run one LLM completion under a deadline and record it.
    pub async fn call_llm(
        &self,
        operation: &str,
        user_id: &str,
        messages: Vec<Message>,
        options: CompletionOptions,
        limit: Duration,
    ) -> LlmResult<String> {
        let start = Instant::now();
        let model = self.llm.model();
        debug!(operation, user_id, %model, messages = messages.len(), "Calling LLM");

        let result = with_timeout(operation, limit, self.llm.complete(messages, options)).await;
        let latency = start.elapsed().as_millis() as i64;

        let invocation = LlmInvocation::new(operation)
            .with_user(user_id)
            .with_model(model);
        let invocation = match &result {
            Ok(_) => invocation.success(latency),
            Err(e) => invocation.fallback(e.to_string(), latency),
        };
        self.record_invocation(&invocation).await;

        result
    }

    /// Record an invocation that was served from fallback without a usable completion.
    pub async fn record_unusable(&self, operation: &str, user_id: &str, latency_ms: i64) {
        let invocation = LlmInvocation::new(operation)
            .with_user(user_id)
            .with_model(self.llm.model())
            .fallback("Completion was not usable JSON", latency_ms);
        self.record_invocation(&invocation).await;
    }

    async fn record_invocation(&self, invocation: &LlmInvocation) {
        let policy = self.retry_policy();
        if let Err(e) = with_retry(&policy, "log_invocation", || {
            self.storage.log_invocation(invocation)
        })
        .await
        {
            warn!(operation = %invocation.operation, error = %e, "Failed to record LLM invocation");
        }
    }
}
