//! Chat-completion client used for explanations, holistic analysis and chat.
//!
//! [`LlmClient`] is the seam the services depend on; [`OpenAiClient`] is the
//! HTTP implementation against any OpenAI-compatible `/v1/chat/completions`
//! endpoint.

mod client;
mod types;


pub use client::OpenAiClient;
pub use types::*;

use async_trait::async_trait;

use crate::error::LlmResult;

/// A model that turns a message list into a single completion string.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one completion and return the assistant's text.
    async fn complete(&self, messages: Vec<Message>, options: CompletionOptions) -> LlmResult<String>;

    /// Model identifier used for invocation logs.
    fn model(&self) -> String;
}
