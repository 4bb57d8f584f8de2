//! # MCP Wellbeing Assessment Server
//!
//! A Model Context Protocol (MCP) server for standardized mental-health
//! self-assessments. Scores are classified into severity bands, combined into
//! a per-user risk profile, and used to personalize LLM-generated explanations,
//! holistic analyses and chat replies.
//!
//! ## Features
//!
//! - **Instruments**: PHQ-9, GAD-7, ACE, CD-RISC-10, PSS-10, WHO-5 and PCL-5
//! - **Classification**: Deterministic severity bands per instrument
//! - **Risk Aggregation**: Overall risk level with personalization tags
//! - **Explanations**: Per-result interpretation with static fallback
//! - **Holistic Analysis**: Cross-instrument overview, cached by result set
//! - **Chat**: Context-aware conversation with persisted history
//! - **Session Resume**: Partial answers saved per questionnaire
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → MCP Server (Rust) → Chat Completions API (HTTP)
//!                    ↓
//!              SQLite (Results, Profiles, Chat)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp_wellbeing_assessment::{Config, AppState, McpServer};
//! use mcp_wellbeing_assessment::llm::OpenAiClient;
//! use mcp_wellbeing_assessment::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let llm = OpenAiClient::new(&config.openai, config.request.clone())?;
//!     let state = Arc::new(AppState::new(config, storage, Arc::new(llm)));
//!     McpServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Command-line interface.
pub mod cli;
/// Configuration management for the MCP server.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Questionnaire definitions and response validation.
pub mod instruments;
/// Chat completion client and wire types.
pub mod llm;
/// System prompts for LLM-backed operations.
pub mod prompts;
/// Risk aggregation, user profiles and prompt context.
pub mod risk;
/// Severity classification of raw scores.
pub mod scoring;
/// MCP server implementation and request handling.
pub mod server;
/// Assessment, explanation, holistic and chat services.
pub mod services;
/// SQLite storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
