//! Newline-delimited JSON-RPC 2.0 over stdio, plus the assessment tool
//! catalogue advertised through `tools/list`.
//!
//! Request and response bodies carry questionnaire answers, so the loop logs
//! methods and sizes only.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use super::{handle_tool_call, SharedState};
use crate::instruments::AssessmentKind;

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "mcp-wellbeing-assessment";

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier (null if notification).
    pub id: Value,
    /// The result on success (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code (negative for predefined errors).
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// MCP server information returned during initialization.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    /// The server name identifier.
    pub name: String,
    /// The server version string.
    pub version: String,
}

/// MCP server capabilities advertised to clients.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// Tool-related capabilities.
    pub tools: ToolCapabilities,
}

/// Tool-specific capabilities.
#[derive(Debug, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change dynamically.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Result of the MCP initialize handshake.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    /// The MCP protocol version supported.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities.
    pub capabilities: Capabilities,
    /// Server identification information.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// MCP tool definition with JSON Schema.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    /// Unique tool name (used in tool calls).
    pub name: String,
    /// Human-readable description of the tool.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Parameters for a tools/call request.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    /// The name of the tool to invoke.
    pub name: String,
    /// Optional arguments for the tool.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Content item within a tool result.
#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    /// The content type (e.g., "text").
    #[serde(rename = "type")]
    pub content_type: String,
    /// The text content of the result.
    pub text: String,
}

/// Result of a tool invocation.
#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    /// The result content items.
    pub content: Vec<ToolResultContent>,
    /// Whether the result represents an error.
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// MCP Server running over stdio.
///
/// Handles JSON-RPC 2.0 messages over stdin/stdout for MCP protocol
/// communication with clients.
pub struct McpServer {
    /// Shared application state.
    state: SharedState,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Run the server using async stdio
    pub async fn run(&self) -> std::io::Result<()> {
        info!("MCP Wellbeing Assessment Server starting...");

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                info!("Client closed stdin, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => {
                    debug!(method = %request.method, bytes = trimmed.len(), "Received request");
                    self.handle_request(request).await
                }
                Err(e) => {
                    error!(error = %e, bytes = trimmed.len(), "Failed to parse request");
                    Some(JsonRpcResponse::error(
                        None,
                        PARSE_ERROR,
                        format!("Parse error: {}", e),
                    ))
                }
            };

            if let Some(response) = response {
                let response_json = serde_json::to_string(&response)?;
                debug!(bytes = response_json.len(), is_error = response.error.is_some(), "Sending response");

                stdout.write_all(response_json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        Ok(())
    }

    /// Route one request. Notifications (no `id`) never get a response.
    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" | "notifications/initialized" | "notifications/cancelled" => {
                debug!(method = %request.method, "Notification acknowledged");
                None
            }
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "tools/call" => Some(self.handle_tool_call(request.id, request.params).await),
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method if is_notification => {
                debug!(method = %method, "Ignoring unknown notification");
                None
            }
            method => {
                error!(method = %method, "Unknown method");
                Some(JsonRpcResponse::error(
                    request.id,
                    METHOD_NOT_FOUND,
                    format!("Method not found: {}", method),
                ))
            }
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!(tools = get_tools().len(), "Client initialized");

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Internal error: {}", e))
            }
        }
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        JsonRpcResponse::success(id, serde_json::json!({ "tools": get_tools() }))
    }

    /// Handle tools/call request
    async fn handle_tool_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(id, INVALID_PARAMS, format!("Invalid params: {}", e));
                }
            },
            None => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params");
            }
        };

        info!(tool = %params.name, "Handling tool call");

        let (content, is_error) =
            match handle_tool_call(&self.state, &params.name, params.arguments).await {
                Ok(result) => {
                    let text = serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
                        error!(error = %e, "Failed to serialize tool result");
                        format!("{{\"error\": \"Serialization failed: {}\"}}", e)
                    });
                    (
                        ToolResultContent {
                            content_type: "text".to_string(),
                            text,
                        },
                        None,
                    )
                }
                Err(e) => (
                    ToolResultContent {
                        content_type: "text".to_string(),
                        text: format!("Error: {}", e),
                    },
                    Some(true),
                ),
            };

        let tool_result = ToolCallResult {
            content: vec![content],
            is_error,
        };

        match serde_json::to_value(tool_result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize tool call result");
                JsonRpcResponse::error(id.clone(), INTERNAL_ERROR, format!("Internal error: {}", e))
            }
        }
    }
}

/// Every advertised tool, in listing order.
fn get_tools() -> Vec<Tool> {
    vec![
        get_list_instruments_tool(),
        get_classify_tool(),
        get_submit_tool(),
        get_context_tool(),
        get_history_tool(),
        get_explain_tool(),
        get_holistic_tool(),
        get_session_save_tool(),
        get_session_get_tool(),
        get_chat_send_tool(),
    ]
}

fn assessment_id_schema() -> Value {
    serde_json::json!({
        "type": "string",
        "enum": AssessmentKind::ALL.iter().map(|k| k.id()).collect::<Vec<_>>(),
        "description": "Questionnaire identifier"
    })
}

/// Get the instrument listing tool definition
fn get_list_instruments_tool() -> Tool {
    Tool {
        name: "assessment_list_instruments".to_string(),
        description: "List supported questionnaires with their question ids, answer ranges and score ranges.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        }),
    }
}

/// Get the classification tool definition
fn get_classify_tool() -> Tool {
    Tool {
        name: "assessment_classify".to_string(),
        description: "Classify a raw questionnaire score into a named level and severity band without storing anything.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "assessment_id": assessment_id_schema(),
                "score": {
                    "type": "number",
                    "minimum": 0,
                    "description": "Raw total score"
                }
            },
            "required": ["assessment_id", "score"],
            "additionalProperties": false
        }),
    }
}

/// Get the submission tool definition
fn get_submit_tool() -> Tool {
    Tool {
        name: "assessment_submit".to_string(),
        description: "Submit a completed questionnaire. Validates and scores the answers, stores the result and returns it with the updated assessment context.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User identifier"
                },
                "assessment_id": assessment_id_schema(),
                "responses": {
                    "type": "object",
                    "additionalProperties": { "type": "integer" },
                    "description": "Answers keyed by question id, e.g. {\"phq9_1\": 2}"
                }
            },
            "required": ["user_id", "assessment_id", "responses"],
            "additionalProperties": false
        }),
    }
}

/// Get the context tool definition
fn get_context_tool() -> Tool {
    Tool {
        name: "assessment_context".to_string(),
        description: "Get the user's assessment context: latest results per questionnaire, risk level, focus areas, safety protocols and recommended styles.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User identifier"
                }
            },
            "required": ["user_id"],
            "additionalProperties": false
        }),
    }
}

/// Get the history tool definition
fn get_history_tool() -> Tool {
    Tool {
        name: "assessment_history".to_string(),
        description: "List the user's stored results, newest first.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User identifier"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 500,
                    "description": "Maximum number of results (default: 50)"
                }
            },
            "required": ["user_id"],
            "additionalProperties": false
        }),
    }
}

/// Get the explanation tool definition
fn get_explain_tool() -> Tool {
    Tool {
        name: "assessment_explain".to_string(),
        description: "Explain one result in plain language. Falls back to a static explanation if the model is unavailable.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User identifier"
                },
                "result_id": {
                    "type": "string",
                    "description": "Result to explain"
                },
                "assessment_id": assessment_id_schema()
            },
            "required": ["user_id"],
            "additionalProperties": false
        }),
    }
}

/// Get the holistic analysis tool definition
fn get_holistic_tool() -> Tool {
    Tool {
        name: "assessment_holistic".to_string(),
        description: "Integrated analysis across the user's latest results. Cached until a new result is submitted.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User identifier"
                },
                "force_refresh": {
                    "type": "boolean",
                    "description": "Ignore the cached analysis (default: false)"
                }
            },
            "required": ["user_id"],
            "additionalProperties": false
        }),
    }
}

/// Get the session save tool definition
fn get_session_save_tool() -> Tool {
    Tool {
        name: "assessment_session_save".to_string(),
        description: "Save partial answers to a questionnaire so it can be resumed later.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User identifier"
                },
                "assessment_id": assessment_id_schema(),
                "responses": {
                    "type": "object",
                    "additionalProperties": { "type": "integer" },
                    "description": "Answers given so far, keyed by question id"
                }
            },
            "required": ["user_id", "assessment_id"],
            "additionalProperties": false
        }),
    }
}

/// Get the session lookup tool definition
fn get_session_get_tool() -> Tool {
    Tool {
        name: "assessment_session_get".to_string(),
        description: "Get the in-progress session for a questionnaire, if any.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User identifier"
                },
                "assessment_id": assessment_id_schema()
            },
            "required": ["user_id", "assessment_id"],
            "additionalProperties": false
        }),
    }
}

/// Get the chat tool definition
fn get_chat_send_tool() -> Tool {
    Tool {
        name: "chat_send".to_string(),
        description: "Send a message to the wellbeing companion. Replies are tailored to the user's assessment context.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User identifier"
                },
                "conversation_id": {
                    "type": "string",
                    "description": "Conversation to continue (starts a new one if omitted)"
                },
                "message": {
                    "type": "string",
                    "description": "The user's message"
                }
            },
            "required": ["user_id", "message"],
            "additionalProperties": false
        }),
    }
}
