//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides. Config::from_env() also loads a .env file
//! via dotenvy, so each test sets the API key explicitly.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use mcp_wellbeing_assessment::config::{Config, LogFormat};
use serial_test::serial;
use std::env;

fn with_api_key() {
    env::set_var("OPENAI_API_KEY", "test-key");
}

#[test]
#[serial]
fn test_config_requires_api_key() {
    env::remove_var("OPENAI_API_KEY");

    // A .env file in the working directory may still provide the key.
    if let Err(e) = Config::from_env() {
        assert!(e.to_string().contains("OPENAI_API_KEY"));
    }

    with_api_key();
}

#[test]
#[serial]
fn test_config_from_env_custom_openai() {
    with_api_key();
    env::set_var("OPENAI_BASE_URL", "https://llm.internal.example");
    env::set_var("OPENAI_MODEL", "gpt-4o");

    let config = Config::from_env().unwrap();
    assert_eq!(config.openai.api_key, "test-key");
    assert_eq!(config.openai.base_url, "https://llm.internal.example");
    assert_eq!(config.openai.model, "gpt-4o");

    env::remove_var("OPENAI_BASE_URL");
    env::remove_var("OPENAI_MODEL");
}

#[test]
#[serial]
fn test_config_from_env_custom_database() {
    with_api_key();
    env::set_var("DATABASE_PATH", "/custom/path.db");
    env::set_var("DATABASE_MAX_CONNECTIONS", "10");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.path.to_str().unwrap(), "/custom/path.db");
    assert_eq!(config.database.max_connections, 10);

    env::remove_var("DATABASE_PATH");
    env::remove_var("DATABASE_MAX_CONNECTIONS");
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    with_api_key();
    env::set_var("LOG_FORMAT", "JSON");
    env::set_var("LOG_LEVEL", "debug");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.logging.level, "debug");

    env::remove_var("LOG_FORMAT");
    env::remove_var("LOG_LEVEL");
}

#[test]
#[serial]
fn test_config_from_env_timeouts() {
    with_api_key();
    env::set_var("EXPLANATION_TIMEOUT_MS", "1000");
    env::set_var("HOLISTIC_TIMEOUT_MS", "2000");
    env::set_var("CHAT_TIMEOUT_MS", "3000");

    let config = Config::from_env().unwrap();
    assert_eq!(config.timeouts.explanation_ms, 1000);
    assert_eq!(config.timeouts.holistic_ms, 2000);
    assert_eq!(config.timeouts.chat_ms, 3000);

    env::remove_var("EXPLANATION_TIMEOUT_MS");
    env::remove_var("HOLISTIC_TIMEOUT_MS");
    env::remove_var("CHAT_TIMEOUT_MS");
}

#[test]
#[serial]
fn test_config_persistence_attempts_at_least_one() {
    with_api_key();
    env::set_var("PERSIST_MAX_ATTEMPTS", "0");
    env::set_var("PERSIST_BACKOFF_MS", "50");

    let config = Config::from_env().unwrap();
    assert_eq!(config.persistence.max_attempts, 1);
    assert_eq!(config.persistence.backoff_ms, 50);

    env::remove_var("PERSIST_MAX_ATTEMPTS");
    env::remove_var("PERSIST_BACKOFF_MS");
}

#[test]
#[serial]
fn test_config_crisis_threshold_overrides() {
    with_api_key();
    env::set_var("RISK_CRISIS_DEPRESSION", "20");
    env::set_var("RISK_CRISIS_ANXIETY", "18");

    let config = Config::from_env().unwrap();
    assert_eq!(config.risk.crisis_depression, 20);
    assert_eq!(config.risk.crisis_anxiety, 18);

    env::remove_var("RISK_CRISIS_DEPRESSION");
    env::remove_var("RISK_CRISIS_ANXIETY");

    let config = Config::from_env().unwrap();
    assert_eq!(config.risk.crisis_depression, 15);
    assert_eq!(config.risk.crisis_anxiety, 15);
}

#[test]
#[serial]
fn test_config_invalid_number_uses_default() {
    with_api_key();
    env::set_var("DATABASE_MAX_CONNECTIONS", "not-a-number");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.max_connections, 5);

    env::remove_var("DATABASE_MAX_CONNECTIONS");
}
