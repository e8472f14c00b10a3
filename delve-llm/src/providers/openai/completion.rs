//! OpenAI completion provider

use super::client::OpenAIClient;
use super::types::{ChatRequest, Message};
use crate::{Completion, CompletionProvider, CompletionRequest};
use async_trait::async_trait;
use delve_core::{DelveError, DelveResult, LlmError};

/// Completion provider backed by the OpenAI Chat Completions API.
#[derive(Debug)]
pub struct OpenAICompletionProvider {
    client: OpenAIClient,
}

impl OpenAICompletionProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: OpenAIClient::new(api_key, 500),
        }
    }

    pub fn from_client(client: OpenAIClient) -> Self {
        Self { client }
    }

    /// Read the key from `OPENAI_API_KEY`.
    pub fn from_env() -> Option<Self> {
        std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(Self::new)
    }
}

pub(crate) fn to_chat_request(request: &CompletionRequest) -> ChatRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(Message {
            role: "system".to_string(),
            content: Some(system.clone()),
        });
    }
    messages.extend(request.messages.iter().map(|m| Message {
        role: m.role.as_str().to_string(),
        content: Some(m.content.clone()),
    }));
    ChatRequest {
        model: request.model.clone(),
        messages,
        max_tokens: Some(request.max_tokens),
        temperature: request.temperature,
    }
}

#[async_trait]
impl CompletionProvider for OpenAICompletionProvider {
    async fn complete(&self, request: &CompletionRequest) -> DelveResult<Completion> {
        let response = self.client.chat(&to_chat_request(request)).await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                DelveError::Llm(LlmError::InvalidResponse {
                    provider: "openai".to_string(),
                    reason: "response contained no choices".to_string(),
                })
            })?;
        let (input, output) = response
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));
        Ok(Completion::new(text, response.model).with_usage(input, output))
    }

    fn provider_id(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message as ChatMessage;

    #[test]
    fn test_system_prompt_becomes_first_message() {
        let request = CompletionRequest::new("gpt-4o", vec![ChatMessage::user("q")])
            .with_system("sys")
            .with_temperature(0.0);
        let mapped = to_chat_request(&request);
        assert_eq!(mapped.messages.len(), 2);
        assert_eq!(mapped.messages[0].role, "system");
        assert_eq!(mapped.messages[0].content.as_deref(), Some("sys"));
        assert_eq!(mapped.messages[1].role, "user");
        assert_eq!(mapped.temperature, Some(0.0));
    }

    #[test]
    fn test_response_decoding() {
        let body = r#"{
            "model": "gpt-4o-2024-08-06",
            "choices": [{"message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 9, "completion_tokens": 1, "total_tokens": 10}
        }"#;
        let response: super::super::types::ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("hello"));
        assert_eq!(response.usage.unwrap().prompt_tokens, 9);
    }
}
