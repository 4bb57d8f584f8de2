use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{require_non_empty, ContentSource, ServiceCore, CRISIS_RESOURCES};
use crate::error::AppResult;
use crate::llm::{CompletionOptions, Message};
use crate::prompts::CHAT_SYSTEM_PROMPT;
use crate::risk::{build_context, AssessmentContext, LatestResults, RiskLevel};
use crate::storage::{with_retry, ConversationMessage, ConversationRole, Storage};

/// Number of prior turns sent with each chat request.
pub const CHAT_HISTORY_TURNS: u32 = 20;

const FALLBACK_REPLY: &str = "I'm having trouble responding right now, but I'm still here with you. \
Would you like to tell me a little more about how you're feeling?";

/// Input for one chat turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatParams {
    pub user_id: String,
    /// Existing conversation to continue; a new one is started when absent
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub message: String,
}

/// Assistant reply for one chat turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub conversation_id: String,
    pub reply: String,
    pub source: ContentSource,
    pub risk_level: RiskLevel,
}

/// Context-aware chat assistant
#[derive(Clone)]
pub struct ChatService {
    core: ServiceCore,
}

impl ChatService {
    /// Create a new chat service
    pub fn new(core: ServiceCore) -> Self {
        Self { core }
    }

    /// Send a user message and return the assistant's reply.
    pub async fn send(&self, params: ChatParams) -> AppResult<ChatReply> {
        let start = Instant::now();
        require_non_empty("user_id", &params.user_id)?;
        require_non_empty("message", &params.message)?;

        let user_id = params.user_id.as_str();
        let conversation_id = params
            .conversation_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let storage = self.core.storage();
        let latest = storage
            .get_latest_per_type(user_id)
            .await
            .unwrap_or_else(|e| {
                warn!(user_id, error = %e, "Failed to load results for chat context");
                LatestResults::new()
            });
        let context = build_context(user_id, &latest, &self.core.config().risk);

        let history = storage
            .get_recent_messages(user_id, &conversation_id, CHAT_HISTORY_TURNS)
            .await
            .unwrap_or_else(|e| {
                warn!(user_id, error = %e, "Failed to load conversation history");
                Vec::new()
            });
        debug!(user_id, %conversation_id, turns = history.len(), "Chat history loaded");

        let messages = build_messages(&context, &history, &params.message);
        let limit = Duration::from_millis(self.core.config().timeouts.chat_ms);
        let options = CompletionOptions::default().with_temperature(0.7).with_max_tokens(600);

        let (reply, source) = match self.core.call_llm("chat", user_id, messages, options, limit).await {
            Ok(text) => (text, ContentSource::Ai),
            Err(e) => {
                warn!(user_id, error = %e, "Chat completion failed, using fallback");
                (fallback_reply(context.risk_level), ContentSource::Fallback)
            }
        };

        self.persist(ConversationMessage::new(user_id, &conversation_id, ConversationRole::User, &params.message))
            .await;
        self.persist(ConversationMessage::new(user_id, &conversation_id, ConversationRole::Assistant, &reply))
            .await;

        info!(
            user_id,
            %conversation_id,
            source = ?source,
            risk_level = %context.risk_level,
            latency_ms = start.elapsed().as_millis() as u64,
            "Chat turn completed"
        );

        Ok(ChatReply {
            conversation_id,
            reply,
            source,
            risk_level: context.risk_level,
        })
    }

    async fn persist(&self, message: ConversationMessage) {
        let policy = self.core.retry_policy();
        let storage = self.core.storage();
        if let Err(e) = with_retry(&policy, "append_message", || storage.append_message(&message)).await {
            warn!(user_id = %message.user_id, role = %message.role, error = %e, "Failed to store chat turn");
        }
    }
}

/// System prompt plus context block, prior turns, then the new message.
fn build_messages(context: &AssessmentContext, history: &[ConversationMessage], message: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(format!(
        "{}\n\n{}",
        CHAT_SYSTEM_PROMPT,
        context.to_prompt_block()
    )));
    for turn in history {
        messages.push(match turn.role {
            ConversationRole::User => Message::user(&turn.content),
            ConversationRole::Assistant => Message::assistant(&turn.content),
        });
    }
    messages.push(Message::user(message));
    messages
}

pub(crate) fn fallback_reply(risk_level: RiskLevel) -> String {
    if risk_level == RiskLevel::Crisis {
        format!("{} {}", FALLBACK_REPLY, CRISIS_RESOURCES)
    } else {
        FALLBACK_REPLY.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::AssessmentKind;
    use crate::llm::MessageRole;
    use crate::risk::RiskThresholds;
    use crate::storage::AssessmentResult;
    use std::collections::BTreeMap;

    #[test]
    fn test_build_messages_order() {
        let context = build_context("u", &LatestResults::new(), &RiskThresholds::default());
        let history = vec![
            ConversationMessage::new("u", "c", ConversationRole::User, "hi"),
            ConversationMessage::new("u", "c", ConversationRole::Assistant, "hello"),
        ];
        let messages = build_messages(&context, &history, "how are you?");

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, MessageRole::System);
        assert!(messages[0].content.contains("<assessment_context>"));
        assert_eq!(messages[2].role, MessageRole::Assistant);
        assert_eq!(messages[3].content, "how are you?");
    }

    #[test]
    fn test_system_block_has_no_raw_scores() {
        let mut latest = LatestResults::new();
        latest.insert(
            AssessmentKind::Pss10,
            AssessmentResult::new("u", AssessmentKind::Pss10, 31.0, BTreeMap::new()),
        );
        let context = build_context("u", &latest, &RiskThresholds::default());
        let messages = build_messages(&context, &[], "hello");
        assert!(!messages[0].content.contains("31"));
        assert!(messages[0].content.contains("Stress: high stress"));
    }

    #[test]
    fn test_fallback_reply_adds_crisis_resources_only_in_crisis() {
        assert!(fallback_reply(RiskLevel::Crisis).contains("988"));
        assert!(!fallback_reply(RiskLevel::High).contains("988"));
    }
}
