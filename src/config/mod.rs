use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;
use crate::risk::RiskThresholds;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub openai: OpenAiConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub timeouts: TimeoutConfig,
    pub persistence: PersistenceConfig,
    pub risk: RiskThresholds,
}

/// OpenAI-compatible completion API configuration
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Per-operation deadlines for LLM-backed features.
///
/// These bound the whole operation (including HTTP retries); when one
/// elapses the caller falls back to static content.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub explanation_ms: u64,
    pub holistic_ms: u64,
    pub chat_ms: u64,
}

/// Retry policy for persistence writes
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let openai = OpenAiConfig {
            api_key: env::var("OPENAI_API_KEY").map_err(|_| AppError::Config {
                message: "OPENAI_API_KEY is required".to_string(),
            })?,
            base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/assessments.db".to_string()),
            ),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env_or("REQUEST_TIMEOUT_MS", 30000),
            max_retries: env_or("MAX_RETRIES", 2),
            retry_delay_ms: env_or("RETRY_DELAY_MS", 1000),
        };

        let timeouts = TimeoutConfig {
            explanation_ms: env_or("EXPLANATION_TIMEOUT_MS", 30000),
            holistic_ms: env_or("HOLISTIC_TIMEOUT_MS", 90000),
            chat_ms: env_or("CHAT_TIMEOUT_MS", 60000),
        };

        let persistence = PersistenceConfig {
            max_attempts: env_or::<u32>("PERSIST_MAX_ATTEMPTS", 3).max(1),
            backoff_ms: env_or("PERSIST_BACKOFF_MS", 1000),
        };

        let mut risk = RiskThresholds::default();
        if let Some(value) = env_parse("RISK_CRISIS_DEPRESSION") {
            risk.crisis_depression = value;
        }
        if let Some(value) = env_parse("RISK_CRISIS_ANXIETY") {
            risk.crisis_anxiety = value;
        }

        Ok(Config {
            openai,
            database,
            logging,
            request,
            timeouts,
            persistence,
            risk,
        })
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env_parse(key).unwrap_or(default)
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 2,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            explanation_ms: 30000,
            holistic_ms: 90000,
            chat_ms: 60000,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1000,
        }
    }
}
