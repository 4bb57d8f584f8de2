//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers and routing
//! - Shared application state management

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::config::Config;
use crate::llm::LlmClient;
use crate::services::{AssessmentService, ChatService, ExplanationService, HolisticService, ServiceCore};
use crate::storage::SqliteStorage;

/// Application state shared across handlers.
///
/// Contains every service and the shared resources needed for
/// processing tool calls.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// SQLite storage backend.
    pub storage: SqliteStorage,
    /// Submission, context, history and session operations.
    pub assessment: AssessmentService,
    /// Per-result explanations.
    pub explanation: ExplanationService,
    /// Cross-instrument analysis.
    pub holistic: HolisticService,
    /// Context-aware chat.
    pub chat: ChatService,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config, storage: SqliteStorage, llm: Arc<dyn LlmClient>) -> Self {
        tracing::info!(
            model = %llm.model(),
            thresholds_version = %config.risk.version,
            explanation_timeout_ms = config.timeouts.explanation_ms,
            holistic_timeout_ms = config.timeouts.holistic_ms,
            chat_timeout_ms = config.timeouts.chat_ms,
            "AppState initializing"
        );

        let core = ServiceCore::new(storage.clone(), llm, config.clone());

        Self {
            config,
            storage,
            assessment: AssessmentService::new(core.clone()),
            explanation: ExplanationService::new(core.clone()),
            holistic: HolisticService::new(core.clone()),
            chat: ChatService::new(core),
        }
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DatabaseConfig, LogFormat, LoggingConfig, OpenAiConfig, PersistenceConfig, RequestConfig,
        TimeoutConfig,
    };
    use crate::llm::MockLlmClient;
    use crate::risk::RiskThresholds;
    use std::path::PathBuf;

    fn create_test_config() -> Config {
        Config {
            openai: OpenAiConfig {
                api_key: "test-key".to_string(),
                base_url: "https://api.openai.com".to_string(),
                model: "gpt-4o-mini".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from(":memory:"),
                max_connections: 5,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            request: RequestConfig::default(),
            timeouts: TimeoutConfig::default(),
            persistence: PersistenceConfig::default(),
            risk: RiskThresholds::default(),
        }
    }

    fn create_test_llm() -> Arc<dyn LlmClient> {
        let mut llm = MockLlmClient::new();
        llm.expect_model().return_const("mock-model".to_string());
        Arc::new(llm)
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let config = create_test_config();
        let storage = SqliteStorage::new_in_memory().await.unwrap();

        let state = AppState::new(config, storage, create_test_llm());

        assert_eq!(state.config.openai.api_key, "test-key");
        assert_eq!(state.config.risk.version, "2024-1");
    }

    #[tokio::test]
    async fn test_shared_state_type() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state = AppState::new(create_test_config(), storage, create_test_llm());
        let shared: SharedState = Arc::new(state);

        let shared2 = Arc::clone(&shared);
        assert_eq!(Arc::strong_count(&shared), 2);
        drop(shared2);
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[tokio::test]
    async fn test_services_share_storage() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state = AppState::new(create_test_config(), storage, create_test_llm());

        let context = state.assessment.context("new-user").await.unwrap();
        assert!(!context.profile.has_assessments());
    }
}
