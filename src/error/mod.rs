use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Assessment error: {0}")]
    Assessment(#[from] AssessmentError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Constraint violation: {message}")]
    Constraint { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(sqlx::Error),
}

impl StorageError {
    /// Whether retrying the same operation could succeed.
    ///
    /// Constraint violations and migration failures are permanent; everything
    /// else (pool timeouts, locked database, I/O) is treated as transient.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            StorageError::Constraint { .. } | StorageError::Migration { .. }
        )
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() || db.is_foreign_key_violation() || db.is_check_violation()
            {
                return StorageError::Constraint {
                    message: db.message().to_string(),
                };
            }
        }
        StorageError::Sqlx(err)
    }
}

/// LLM completion API errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors raised while validating or scoring a questionnaire
#[derive(Debug, Error)]
pub enum AssessmentError {
    #[error("Unknown assessment: {assessment_id}")]
    UnknownInstrument { assessment_id: String },

    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Result type alias for questionnaire validation and scoring
pub type ScoringResult<T> = Result<T, AssessmentError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::from(AssessmentError::UnknownInstrument {
            assessment_id: "mmpi".to_string(),
        });
        assert_eq!(err.to_string(), "Assessment error: Unknown assessment: mmpi");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Connection {
            message: "failed to connect".to_string(),
        };
        assert_eq!(err.to_string(), "Database connection failed: failed to connect");

        let err = StorageError::Constraint {
            message: "UNIQUE constraint failed: assessment_results.id".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Constraint violation: UNIQUE constraint failed: assessment_results.id"
        );

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_storage_error_transience() {
        assert!(StorageError::Connection {
            message: "pool timed out".to_string()
        }
        .is_transient());
        assert!(StorageError::Query {
            message: "database is locked".to_string()
        }
        .is_transient());
        assert!(!StorageError::Constraint {
            message: "duplicate".to_string()
        }
        .is_transient());
        assert!(!StorageError::Migration {
            message: "bad".to_string()
        }
        .is_transient());
        assert!(StorageError::from(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::Unavailable {
            message: "server down".to_string(),
            retries: 3,
        };
        assert_eq!(err.to_string(), "LLM unavailable: server down (retries: 3)");

        let err = LlmError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 401 - unauthorized");

        let err = LlmError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");
    }

    #[test]
    fn test_assessment_error_display() {
        let err = AssessmentError::UnknownInstrument {
            assessment_id: "bdi".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown assessment: bdi");

        let err = AssessmentError::Validation {
            field: "phq9_3".to_string(),
            reason: "value 7 outside 0..=3".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Validation failed: phq9_3 - value 7 outside 0..=3"
        );
    }

    #[test]
    fn test_mcp_error_display() {
        let err = McpError::UnknownTool {
            tool_name: "nonexistent".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown tool: nonexistent");

        let err = McpError::InvalidParameters {
            tool_name: "assessment_submit".to_string(),
            message: "missing responses".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid parameters for assessment_submit: missing responses"
        );
    }

    #[test]
    fn test_app_error_conversion_to_mcp_error() {
        let app_err = AppError::Config {
            message: "test error".to_string(),
        };
        let mcp_err: McpError = app_err.into();
        assert!(matches!(mcp_err, McpError::ExecutionFailed { .. }));
        assert!(mcp_err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_layer_errors_convert_to_app_error() {
        let app_err: AppError = StorageError::Query {
            message: "x".to_string(),
        }
        .into();
        assert!(matches!(app_err, AppError::Storage(_)));

        let app_err: AppError = LlmError::Timeout { timeout_ms: 1000 }.into();
        assert!(matches!(app_err, AppError::Llm(_)));

        let app_err: AppError = AssessmentError::UnknownInstrument {
            assessment_id: "x".to_string(),
        }
        .into();
        assert!(matches!(app_err, AppError::Assessment(_)));
    }
}
