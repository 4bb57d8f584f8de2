use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcp_wellbeing_assessment::{
    cli::{execute_classify, execute_command, Cli, Commands},
    config::{Config, LogFormat},
    llm::OpenAiClient,
    server::{AppState, McpServer},
    storage::SqliteStorage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command();

    // Classification is pure; it must work without any configuration.
    if let Commands::Classify { assessment, score } = &command {
        let result = execute_classify(assessment, *score);
        finish(result.exit_code, &result.message);
    }

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    // Initialize storage
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    if command != Commands::Serve {
        let result = execute_command(command, &storage, &config.risk).await;
        finish(result.exit_code, &result.message);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "MCP Wellbeing Assessment Server starting..."
    );

    // Initialize completion client
    let llm = match OpenAiClient::new(&config.openai, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.openai.base_url, model = %config.openai.model, "LLM client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize LLM client");
            return Err(e.into());
        }
    };

    // Create application state
    let state = Arc::new(AppState::new(config, storage, Arc::new(llm)));

    // Start MCP server
    let server = McpServer::new(state);

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

fn finish(exit_code: i32, message: &str) -> ! {
    if exit_code == 0 {
        println!("{}", message);
    } else {
        eprintln!("{}", message);
    }
    std::process::exit(exit_code);
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
