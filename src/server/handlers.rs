use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::SharedState;
use crate::error::{McpError, McpResult};
use crate::instruments::{all_instruments, AssessmentKind, InstrumentInfo};
use crate::scoring::{classify, Classification};
use crate::services::{ChatParams, ExplainParams, HolisticParams, SessionSaveParams, SubmitParams};

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        // Catalogue and classification
        "assessment_list_instruments" => handle_list_instruments(),
        "assessment_classify" => handle_classify(arguments),
        // Results
        "assessment_submit" => handle_submit(state, arguments).await,
        "assessment_context" => handle_context(state, arguments).await,
        "assessment_history" => handle_history(state, arguments).await,
        // LLM-backed analysis
        "assessment_explain" => handle_explain(state, arguments).await,
        "assessment_holistic" => handle_holistic(state, arguments).await,
        // Session resume
        "assessment_session_save" => handle_session_save(state, arguments).await,
        "assessment_session_get" => handle_session_get(state, arguments).await,
        // Chat
        "chat_send" => handle_chat_send(state, arguments).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

/// Handle assessment_list_instruments tool call
fn handle_list_instruments() -> McpResult<Value> {
    let instruments: Vec<InstrumentInfo> = all_instruments().into_iter().map(InstrumentInfo::from).collect();
    serde_json::to_value(instruments).map_err(McpError::Json)
}

#[derive(Debug, Serialize)]
struct ClassifyResponse {
    assessment_id: AssessmentKind,
    score: f64,
    #[serde(flatten)]
    classification: Classification,
}

/// Handle assessment_classify tool call
fn handle_classify(arguments: Option<Value>) -> McpResult<Value> {
    #[derive(Deserialize)]
    struct ClassifyParams {
        assessment_id: String,
        score: f64,
    }

    let params: ClassifyParams = parse_arguments("assessment_classify", arguments)?;
    let assessment_id = params
        .assessment_id
        .parse::<AssessmentKind>()
        .map_err(|e| McpError::InvalidParameters {
            tool_name: "assessment_classify".to_string(),
            message: e.to_string(),
        })?;
    let classification = classify(assessment_id, params.score);

    serde_json::to_value(ClassifyResponse {
        assessment_id,
        score: params.score,
        classification,
    })
    .map_err(McpError::Json)
}

/// Handle assessment_submit tool call
async fn handle_submit(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("assessment_submit", arguments, |params: SubmitParams| {
        state.assessment.submit(params)
    })
    .await
}

#[derive(Deserialize)]
struct UserParams {
    user_id: String,
}

/// Handle assessment_context tool call
async fn handle_context(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: UserParams = parse_arguments("assessment_context", arguments)?;

    let context = state
        .assessment
        .context(&params.user_id)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(context).map_err(McpError::Json)
}

/// Handle assessment_history tool call
async fn handle_history(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    #[derive(Deserialize)]
    struct HistoryParams {
        user_id: String,
        #[serde(default)]
        limit: Option<u32>,
    }

    let params: HistoryParams = parse_arguments("assessment_history", arguments)?;

    let history = state
        .assessment
        .history(&params.user_id, params.limit)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(history).map_err(McpError::Json)
}

/// Handle assessment_explain tool call
async fn handle_explain(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("assessment_explain", arguments, |params: ExplainParams| {
        state.explanation.explain(params)
    })
    .await
}

/// Handle assessment_holistic tool call
async fn handle_holistic(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("assessment_holistic", arguments, |params: HolisticParams| {
        state.holistic.analyze(params)
    })
    .await
}

/// Handle assessment_session_save tool call
async fn handle_session_save(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "assessment_session_save",
        arguments,
        |params: SessionSaveParams| state.assessment.save_session(params),
    )
    .await
}

/// Handle assessment_session_get tool call
async fn handle_session_get(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    #[derive(Deserialize)]
    struct SessionGetParams {
        user_id: String,
        assessment_id: String,
    }

    let params: SessionGetParams = parse_arguments("assessment_session_get", arguments)?;

    let session = state
        .assessment
        .get_session(&params.user_id, &params.assessment_id)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(serde_json::json!({ "session": session })).map_err(McpError::Json)
}

/// Handle chat_send tool call
async fn handle_chat_send(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("chat_send", arguments, |params: ChatParams| state.chat.send(params)).await
}

fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Generic handler that executes a service operation with consistent error handling.
///
/// # Type Parameters
/// - `P`: Parameter type (must implement DeserializeOwned)
/// - `R`: Result type (must implement Serialize)
/// - `E`: Error type (must implement Display)
/// - `F`: Async operation that takes P and returns Result<R, E>
async fn execute_handler<P, R, E, F, Fut>(
    tool_name: &str,
    arguments: Option<Value>,
    operation: F,
) -> McpResult<Value>
where
    P: serde::de::DeserializeOwned,
    R: Serialize,
    E: std::fmt::Display,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
{
    let params: P = parse_arguments(tool_name, arguments)?;

    let result = operation(params)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;

    serde_json::to_value(result).map_err(McpError::Json)
}
