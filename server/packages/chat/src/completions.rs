use async_trait::async_trait;
use playground_error::PlaygroundError;
use reqwest::Client;

use crate::config::ChatConfig;
use crate::sse::{ensure_success, text_deltas, TextStream};
use crate::system_prompt::{generate_system_prompt, SystemPromptConfig};
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponse, CompletionMessage, MessageContent, Role,
};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

/// Non-streaming completions, the one call the computer-use agent needs.
#[async_trait]
pub trait ChatCompletions: Send + Sync {
    async fn create_chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, PlaygroundError>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    config: ChatConfig,
    key_variable: &'static str,
}

impl ChatClient {
    /// `key_variable` names the environment variable reported when the key is missing.
    pub fn new(config: ChatConfig, key_variable: &'static str) -> Self {
        Self {
            http: Client::new(),
            config,
            key_variable,
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    pub async fn stream_chat_completion(
        &self,
        mut request: ChatCompletionRequest,
    ) -> Result<TextStream, PlaygroundError> {
        request.stream = Some(true);
        let response = self.send(&request).await?;
        text_deltas(response).await
    }

    async fn send(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response, PlaygroundError> {
        let api_key = self.config.require_api_key(self.key_variable)?;
        let url = format!("{}/chat/completions", self.config.base_url);
        tracing::debug!(
            url = %url,
            model = %request.model,
            stream = request.stream.unwrap_or(false),
            "sending chat completion request"
        );
        self.http
            .post(&url)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|err| PlaygroundError::Api {
                status: err.status().map(|status| status.as_u16()),
                message: format!("chat completion request failed: {err}"),
            })
    }
}

#[async_trait]
impl ChatCompletions for ChatClient {
    async fn create_chat_completion(
        &self,
        mut request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, PlaygroundError> {
        request.stream = Some(false);
        let response = ensure_success(self.send(&request).await?).await?;
        let status = response.status().as_u16();
        response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|err| PlaygroundError::Api {
                status: Some(status),
                message: format!("invalid chat completion response: {err}"),
            })
    }
}

/// Builds a streaming request with the generated system prompt first.
pub fn request_with_system_prompt(
    messages: Vec<CompletionMessage>,
    model: &str,
    prompt_config: Option<SystemPromptConfig>,
) -> ChatCompletionRequest {
    let prompt_config = prompt_config.unwrap_or_else(|| SystemPromptConfig::for_model(model));
    let mut all = Vec::with_capacity(messages.len() + 1);
    all.push(CompletionMessage {
        role: Role::System,
        content: MessageContent::Text(generate_system_prompt(&prompt_config)),
    });
    all.extend(messages);

    ChatCompletionRequest {
        model: model.to_string(),
        messages: all,
        stream: Some(true),
        temperature: Some(DEFAULT_TEMPERATURE),
        max_tokens: Some(DEFAULT_MAX_TOKENS),
        response_format: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OPENCODE_API_KEY_ENV;
    use crate::types::ChatMessage;
    use crate::convert::to_completion_messages;

    #[test]
    fn system_prompt_request_prepends_prompt() {
        let messages = to_completion_messages(&[ChatMessage::user("hi")]);
        let request = request_with_system_prompt(messages, "big-pickle", None);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0]
            .content
            .as_text()
            .starts_with("You are an advanced AI assistant"));
        assert_eq!(request.messages[1].content.as_text(), "hi");
        assert_eq!(request.stream, Some(true));
        assert_eq!(request.max_tokens, Some(DEFAULT_MAX_TOKENS));
    }

    #[tokio::test]
    async fn missing_key_fails_before_request() {
        let client = ChatClient::new(
            ChatConfig::new("http://127.0.0.1:9", None),
            OPENCODE_API_KEY_ENV,
        );
        let err = client
            .create_chat_completion(ChatCompletionRequest::new("m", vec![]))
            .await
            .unwrap_err();
        match err {
            PlaygroundError::Configuration { message } => {
                assert!(message.contains(OPENCODE_API_KEY_ENV));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
