//! Command-line interface.
//!
//! `serve` (the default) runs the MCP server on stdio. The other commands
//! classify scores and inspect stored results without starting it.

use clap::{Parser, Subcommand};

use crate::risk::{build_context, RiskThresholds};
use crate::scoring::classify_by_id;
use crate::storage::{SqliteStorage, Storage};

/// Top-level command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "mcp-wellbeing-assessment", version, about = "Mental-health self-assessment MCP server")]
pub struct Cli {
    /// Command to run; defaults to `serve`
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// The command to run, `serve` when none was given.
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run the MCP server over stdio
    Serve,

    /// Classify a raw score without storing it
    Classify {
        /// Questionnaire id, e.g. phq9 or cd_risc
        assessment: String,
        /// Raw total score
        score: f64,
    },

    /// Show a user's aggregated risk context
    Context {
        /// User whose results to aggregate
        user_id: String,
    },

    /// Show a user's results, newest first
    History {
        /// User whose results to list
        user_id: String,

        /// Maximum number of results to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

/// Result of CLI command execution.
#[derive(Debug)]
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a one-shot CLI command against the given storage.
pub async fn execute_command(
    command: Commands,
    storage: &SqliteStorage,
    thresholds: &RiskThresholds,
) -> CliResult {
    match command {
        Commands::Serve => CliResult::error("serve runs the MCP server and is not a one-shot command"),
        Commands::Classify { assessment, score } => execute_classify(&assessment, score),
        Commands::Context { user_id } => execute_context(storage, thresholds, &user_id).await,
        Commands::History { user_id, limit } => execute_history(storage, &user_id, limit).await,
    }
}

/// Execute classify command. Needs no storage or configuration.
pub fn execute_classify(assessment: &str, score: f64) -> CliResult {
    match classify_by_id(assessment, score) {
        Ok(c) => CliResult::success(format!("{} (severity: {})", c.level, c.severity)),
        Err(e) => CliResult::error(format!("Error: {}", e)),
    }
}

async fn execute_context(storage: &SqliteStorage, thresholds: &RiskThresholds, user_id: &str) -> CliResult {
    let latest = match storage.get_latest_per_type(user_id).await {
        Ok(latest) => latest,
        Err(e) => return CliResult::error(format!("Failed to load results: {}", e)),
    };
    let context = build_context(user_id, &latest, thresholds);

    let mut output = String::new();
    output.push_str(&format!("\nAssessment Context: {}\n", user_id));
    output.push_str("═══════════════════════════════════════════════════════════════════════════════\n\n");
    output.push_str(&format!("Risk level:      {}\n", context.risk_level));
    output.push_str(&format!("Thresholds:      {}\n", context.thresholds_version));

    if latest.is_empty() {
        output.push_str("Completed:       none\n");
    } else {
        output.push_str("Completed:\n");
        for result in latest.values() {
            output.push_str(&format!(
                "  {:<8} {:>5}  {} ({})\n",
                result.assessment_id, result.score, result.level, result.severity
            ));
        }
    }

    let list = |items: &[String]| if items.is_empty() { "-".to_string() } else { items.join(", ") };
    output.push_str(&format!("Risk factors:    {}\n", list(&context.profile.risk_factors)));
    output.push_str(&format!("Focus areas:     {}\n", list(&context.personalized_approach.focus_areas)));
    output.push_str(&format!("Recommendations: {}\n", list(&context.recommendations)));

    CliResult::success(output)
}

async fn execute_history(storage: &SqliteStorage, user_id: &str, limit: u32) -> CliResult {
    let history = match storage.get_history(user_id, limit).await {
        Ok(history) => history,
        Err(e) => return CliResult::error(format!("Failed to load history: {}", e)),
    };

    if history.is_empty() {
        return CliResult::success(format!("No results for {}", user_id));
    }

    let mut output = format!("\nHistory for {} ({} results)\n\n", user_id, history.len());
    for result in &history {
        output.push_str(&format!(
            "  {}  {:<8} {:>5}  {}\n",
            result.taken_at.format("%Y-%m-%d %H:%M"),
            result.assessment_id,
            result.score,
            result.level
        ));
    }
    CliResult::success(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::AssessmentKind;
    use crate::storage::AssessmentResult;
    use std::collections::BTreeMap;

    #[test]
    fn test_default_command_is_serve() {
        let cli = Cli::parse_from(["mcp-wellbeing-assessment"]);
        assert_eq!(cli.command(), Commands::Serve);
    }

    #[test]
    fn test_parse_history_limit() {
        let cli = Cli::parse_from(["mcp-wellbeing-assessment", "history", "u1", "--limit", "5"]);
        assert_eq!(
            cli.command(),
            Commands::History {
                user_id: "u1".to_string(),
                limit: 5
            }
        );
    }

    #[test]
    fn test_classify() {
        let result = execute_classify("phq9", 22.0);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.message, "Severe (severity: severe)");

        let result = execute_classify("bdi", 10.0);
        assert_eq!(result.exit_code, 1);
        assert!(result.message.contains("bdi"));
    }

    #[tokio::test]
    async fn test_context_and_history() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let thresholds = RiskThresholds::default();

        let empty = execute_command(Commands::History { user_id: "u1".into(), limit: 10 }, &storage, &thresholds).await;
        assert_eq!(empty.message, "No results for u1");

        storage
            .insert_result(&AssessmentResult::new("u1", AssessmentKind::Gad7, 16.0, BTreeMap::new()))
            .await
            .unwrap();

        let context = execute_command(Commands::Context { user_id: "u1".into() }, &storage, &thresholds).await;
        assert_eq!(context.exit_code, 0);
        assert!(context.message.contains("Risk level:      crisis"));

        let history = execute_command(Commands::History { user_id: "u1".into(), limit: 10 }, &storage, &thresholds).await;
        assert!(history.message.contains("1 results"));
    }
}
