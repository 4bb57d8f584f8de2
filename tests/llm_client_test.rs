//! Integration tests for the chat completion client
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use mcp_wellbeing_assessment::config::{OpenAiConfig, RequestConfig};
use mcp_wellbeing_assessment::error::LlmError;
use mcp_wellbeing_assessment::llm::{
    ChatCompletionRequest, CompletionOptions, LlmClient, Message, OpenAiClient,
};

/// Create a test client pointing to mock server
fn create_test_client(base_url: &str, max_retries: u32) -> OpenAiClient {
    let config = OpenAiConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
        model: "test-model".to_string(),
    };

    let request_config = RequestConfig {
        timeout_ms: 5000,
        max_retries,
        retry_delay_ms: 10,
    };

    OpenAiClient::new(&config, request_config).expect("Failed to create client")
}

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "model": "test-model",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
    })
}

#[cfg(test)]
mod completion_tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(body_partial_json(json!({"model": "test-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("  Hello there  ")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let text = client
            .complete(vec![Message::user("hi")], CompletionOptions::default())
            .await
            .unwrap();

        assert_eq!(text, "Hello there");
    }

    #[tokio::test]
    async fn test_json_mode_sets_response_format() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"response_format": {"type": "json_object"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("{\"summary\":\"ok\"}")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let text = client
            .complete(vec![Message::user("explain")], CompletionOptions::json())
            .await
            .unwrap();

        assert_eq!(text, "{\"summary\":\"ok\"}");
    }

    #[tokio::test]
    async fn test_chat_completion_reports_usage() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let request = ChatCompletionRequest::new("test-model", vec![Message::user("hi")], &CompletionOptions::default());
        let response = client.chat_completion(request).await.unwrap();

        assert_eq!(response.usage.and_then(|u| u.total_tokens), Some(15));
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[tokio::test]
    async fn test_server_error_retries_then_unavailable() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 2);
        let err = client
            .complete(vec![Message::user("hi")], CompletionOptions::default())
            .await
            .unwrap_err();

        match err {
            LlmError::Unavailable { message, retries } => {
                assert_eq!(retries, 3);
                assert!(message.contains("500"));
            }
            other => panic!("Expected Unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_choices_is_invalid_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let err = client
            .complete(vec![Message::user("hi")], CompletionOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::InvalidResponse { .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_malformed_body_is_unavailable_after_retries() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server.uri(), 0);
        let err = client
            .complete(vec![Message::user("hi")], CompletionOptions::default())
            .await
            .unwrap_err();

        match err {
            LlmError::Unavailable { message, .. } => assert!(message.contains("Invalid response")),
            other => panic!("Expected Unavailable, got {:?}", other),
        }
    }
}
