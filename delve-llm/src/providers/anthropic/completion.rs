//! Anthropic completion provider

use super::client::AnthropicClient;
use super::types::{ContentBlock, Message, MessageRequest};
use crate::{Completion, CompletionProvider, CompletionRequest};
use async_trait::async_trait;
use delve_core::{DelveError, DelveResult, LlmError};

/// Completion provider backed by the Anthropic Messages API.
#[derive(Debug)]
pub struct AnthropicCompletionProvider {
    client: AnthropicClient,
}

impl AnthropicCompletionProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: AnthropicClient::new(api_key, 50),
        }
    }

    pub fn from_client(client: AnthropicClient) -> Self {
        Self { client }
    }

    /// Read the key from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Option<Self> {
        std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(Self::new)
    }
}

pub(crate) fn to_message_request(request: &CompletionRequest) -> MessageRequest {
    MessageRequest {
        model: request.model.clone(),
        messages: request
            .messages
            .iter()
            .map(|m| Message {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect(),
        max_tokens: request.max_tokens,
        system: request.system.clone(),
        temperature: request.temperature,
    }
}

fn extract_text(content: Vec<ContentBlock>) -> String {
    content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl CompletionProvider for AnthropicCompletionProvider {
    async fn complete(&self, request: &CompletionRequest) -> DelveResult<Completion> {
        let response = self.client.messages(&to_message_request(request)).await?;
        let text = extract_text(response.content);
        if text.is_empty() {
            return Err(DelveError::Llm(LlmError::InvalidResponse {
                provider: "anthropic".to_string(),
                reason: "response contained no text".to_string(),
            }));
        }
        Ok(Completion::new(text, response.model)
            .with_usage(response.usage.input_tokens, response.usage.output_tokens))
    }

    fn provider_id(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message as ChatMessage;

    #[test]
    fn test_request_mapping_keeps_system_separate() {
        let request = CompletionRequest::new(
            "claude-sonnet-4-5",
            vec![ChatMessage::user("q"), ChatMessage::assistant("a")],
        )
        .with_system("sys")
        .with_max_tokens(100);
        let mapped = to_message_request(&request);
        assert_eq!(mapped.system.as_deref(), Some("sys"));
        assert_eq!(mapped.messages.len(), 2);
        assert_eq!(mapped.messages[1].role, "assistant");
        assert_eq!(mapped.max_tokens, 100);
        let json = serde_json::to_value(&mapped).unwrap();
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_response_text_blocks_joined() {
        let body = r#"{
            "id": "msg_1",
            "model": "claude-sonnet-4-5",
            "stop_reason": "end_turn",
            "content": [
                {"type": "text", "text": "first"},
                {"type": "thinking", "thinking": "hidden"},
                {"type": "text", "text": "second"}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 3}
        }"#;
        let response: super::super::types::MessageResponse = serde_json::from_str(body).unwrap();
        assert_eq!(extract_text(response.content), "first\nsecond");
    }
}
