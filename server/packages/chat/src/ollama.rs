//! Client for an Ollama-compatible LLM runner.
//!
//! Streaming replies arrive as newline-delimited JSON objects, each carrying
//! a partial message, until one has `done: true`.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use playground_error::PlaygroundError;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::OllamaConfig;
use crate::sse::{ensure_success, LineBuffer};
use crate::types::Role;

pub const DEFAULT_THINKING_MODEL: &str = "deepseek-r1";
pub const DEFAULT_GENERATE_MODEL: &str = "gpt-oss:120b";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OllamaMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

impl OllamaMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            thinking: None,
        }
    }
}

/// Sampling options forwarded under `options`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f32>,
}

impl ModelOptions {
    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub think: Option<bool>,
    pub format: Option<String>,
    /// System prompt sent alongside the messages.
    pub system: Option<String>,
    pub options: ModelOptions,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [OllamaMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    think: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "ModelOptions::is_empty")]
    options: &'a ModelOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaChatChunk {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub message: Option<OllamaMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OllamaReply {
    pub content: String,
    pub thinking: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OllamaDelta {
    Thinking(String),
    Content(String),
    /// Emitted by [`OllamaClient::thinking_stream`] after both kinds were seen.
    Done,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModelDetails {
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub parameter_size: String,
    #[serde(default)]
    pub quantization_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModel {
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub modified_at: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub details: Option<OllamaModelDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaTags {
    pub models: Vec<OllamaModel>,
}

pub type OllamaStream = Pin<Box<dyn Stream<Item = Result<OllamaDelta, PlaygroundError>> + Send>>;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: Client,
    config: OllamaConfig,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    pub async fn chat(
        &self,
        model: &str,
        messages: &[OllamaMessage],
        options: &ChatOptions,
    ) -> Result<OllamaReply, PlaygroundError> {
        let response = self.post_chat(model, messages, options, false).await?;
        let status = response.status().as_u16();
        let chunk: OllamaChatChunk = response.json().await.map_err(|err| PlaygroundError::Api {
            status: Some(status),
            message: format!("invalid Ollama response: {err}"),
        })?;
        if let Some(error) = chunk.error {
            return Err(api_error(error));
        }
        let message = chunk.message.unwrap_or_else(|| OllamaMessage::new(Role::Assistant, ""));
        Ok(OllamaReply {
            content: message.content,
            thinking: message.thinking.filter(|text| !text.is_empty()),
        })
    }

    pub async fn stream_chat(
        &self,
        model: &str,
        messages: &[OllamaMessage],
        options: &ChatOptions,
    ) -> Result<OllamaStream, PlaygroundError> {
        let response = self.post_chat(model, messages, options, true).await?;
        Ok(chunk_stream(response.bytes_stream()))
    }

    /// Streams with thinking enabled and marks the end with [`OllamaDelta::Done`]
    /// when the model produced both thinking and content.
    pub async fn thinking_stream(
        &self,
        model: &str,
        messages: &[OllamaMessage],
        options: &ChatOptions,
    ) -> Result<OllamaStream, PlaygroundError> {
        let options = ChatOptions {
            think: Some(true),
            ..options.clone()
        };
        let inner = self.stream_chat(model, messages, &options).await?;
        Ok(with_done_marker(inner))
    }

    pub async fn generate(
        &self,
        prompt: &str,
        model: &str,
        options: &ChatOptions,
    ) -> Result<OllamaReply, PlaygroundError> {
        let messages = [OllamaMessage::new(Role::User, prompt)];
        self.chat(model, &messages, options).await
    }

    pub async fn generate_with_thinking(
        &self,
        prompt: &str,
        model: &str,
    ) -> Result<OllamaReply, PlaygroundError> {
        let options = ChatOptions {
            think: Some(true),
            ..ChatOptions::default()
        };
        let reply = self.generate(prompt, model, &options).await?;
        if reply.thinking.is_none() {
            return Err(PlaygroundError::Api {
                status: None,
                message: format!("model {model} did not return thinking content"),
            });
        }
        Ok(reply)
    }

    pub async fn tags(&self) -> Result<OllamaTags, PlaygroundError> {
        self.config.validate()?;
        let mut request = self.http.get(format!("{}/tags", self.config.base_url));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(transport_error)?;
        let response = ensure_success(response).await?;
        let status = response.status().as_u16();
        response.json().await.map_err(|err| PlaygroundError::Api {
            status: Some(status),
            message: format!("invalid Ollama tags response: {err}"),
        })
    }

    async fn post_chat(
        &self,
        model: &str,
        messages: &[OllamaMessage],
        options: &ChatOptions,
        stream: bool,
    ) -> Result<reqwest::Response, PlaygroundError> {
        self.config.validate()?;
        let body = OllamaChatRequest {
            model,
            messages,
            stream,
            think: options.think,
            format: options.format.as_deref(),
            system: options.system.as_deref(),
            options: &options.options,
        };
        let mut request = self
            .http
            .post(format!("{}/chat", self.config.base_url))
            .json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        tracing::debug!(model = %model, stream, "sending Ollama chat request");
        let response = request.send().await.map_err(transport_error)?;
        ensure_success(response).await
    }
}

fn transport_error(err: reqwest::Error) -> PlaygroundError {
    PlaygroundError::Api {
        status: err.status().map(|status| status.as_u16()),
        message: format!("Ollama API error: {err}"),
    }
}

fn api_error(message: String) -> PlaygroundError {
    PlaygroundError::Api {
        status: None,
        message: format!("Ollama API error: {message}"),
    }
}

struct ChunkState {
    bytes: Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>,
    lines: LineBuffer,
    pending: VecDeque<Result<OllamaDelta, PlaygroundError>>,
    finished: bool,
}

impl ChunkState {
    fn absorb(&mut self, lines: Vec<String>) {
        for line in lines {
            if self.finished {
                return;
            }
            if line.trim().is_empty() {
                continue;
            }
            let chunk = match serde_json::from_str::<OllamaChatChunk>(&line) {
                Ok(chunk) => chunk,
                Err(err) => {
                    tracing::debug!(error = %err, "skipping malformed Ollama chunk");
                    continue;
                }
            };
            if let Some(error) = chunk.error {
                self.pending.push_back(Err(api_error(error)));
                self.finished = true;
                return;
            }
            if let Some(message) = chunk.message {
                if let Some(thinking) = message.thinking.filter(|text| !text.is_empty()) {
                    self.pending.push_back(Ok(OllamaDelta::Thinking(thinking)));
                }
                if !message.content.is_empty() {
                    self.pending.push_back(Ok(OllamaDelta::Content(message.content)));
                }
            }
            if chunk.done {
                self.finished = true;
            }
        }
    }
}

/// Parses a newline-delimited JSON body into deltas.
pub fn chunk_stream<S, E>(bytes: S) -> OllamaStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display,
{
    let state = ChunkState {
        bytes: Box::pin(bytes.map(|chunk| chunk.map_err(|err| err.to_string()))),
        lines: LineBuffer::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let lines = state.lines.push(&chunk);
                    state.absorb(lines);
                }
                Some(Err(message)) => {
                    state.finished = true;
                    return Some((Err(PlaygroundError::Stream { message }), state));
                }
                None => {
                    let tail = state.lines.finish().into_iter().collect();
                    state.absorb(tail);
                    state.finished = true;
                }
            }
        }
    }))
}

fn with_done_marker(inner: OllamaStream) -> OllamaStream {
    struct MarkerState {
        inner: OllamaStream,
        saw_thinking: bool,
        saw_content: bool,
        ended: bool,
    }

    let state = MarkerState {
        inner,
        saw_thinking: false,
        saw_content: false,
        ended: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        if state.ended {
            return None;
        }
        match state.inner.next().await {
            Some(item) => {
                match &item {
                    Ok(OllamaDelta::Thinking(_)) => state.saw_thinking = true,
                    Ok(OllamaDelta::Content(_)) => state.saw_content = true,
                    _ => {}
                }
                Some((item, state))
            }
            None => {
                state.ended = true;
                if state.saw_thinking && state.saw_content {
                    Some((Ok(OllamaDelta::Done), state))
                } else {
                    None
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(lines: &[&str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let joined = lines.join("\n");
        stream::iter(vec![Ok(Bytes::from(joined))])
    }

    #[tokio::test]
    async fn splits_thinking_and_content() {
        let deltas: Vec<_> = chunk_stream(body(&[
            r#"{"message":{"role":"assistant","content":"","thinking":"count"},"done":false}"#,
            r#"{"message":{"role":"assistant","content":"3"},"done":false}"#,
            r#"{"message":{"role":"assistant","content":""},"done":true}"#,
            r#"{"message":{"role":"assistant","content":"ignored"},"done":false}"#,
        ]))
        .map(|item| item.unwrap())
        .collect()
        .await;
        assert_eq!(
            deltas,
            vec![
                OllamaDelta::Thinking("count".to_string()),
                OllamaDelta::Content("3".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn error_line_ends_stream() {
        let items: Vec<_> = chunk_stream(body(&[r#"{"error":"model not found"}"#]))
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(
            &items[0],
            Err(PlaygroundError::Api { message, .. }) if message.contains("model not found")
        ));
    }

    #[tokio::test]
    async fn done_marker_requires_both_kinds() {
        let with_both = with_done_marker(chunk_stream(body(&[
            r#"{"message":{"role":"assistant","content":"a","thinking":"t"},"done":true}"#,
        ])));
        let deltas: Vec<_> = with_both.map(|item| item.unwrap()).collect().await;
        assert_eq!(deltas.last(), Some(&OllamaDelta::Done));

        let content_only = with_done_marker(chunk_stream(body(&[
            r#"{"message":{"role":"assistant","content":"a"},"done":true}"#,
        ])));
        let deltas: Vec<_> = content_only.map(|item| item.unwrap()).collect().await;
        assert_eq!(deltas, vec![OllamaDelta::Content("a".to_string())]);
    }

    #[test]
    fn request_omits_empty_options() {
        let messages = [OllamaMessage::new(Role::User, "hi")];
        let options = ModelOptions::default();
        let request = OllamaChatRequest {
            model: "llama3",
            messages: &messages,
            stream: true,
            think: None,
            format: None,
            system: None,
            options: &options,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "model": "llama3",
                "messages": [{ "role": "user", "content": "hi" }],
                "stream": true
            })
        );
    }

    #[test]
    fn request_carries_system_prompt_and_options() {
        let messages = [OllamaMessage::new(Role::User, "hi")];
        let options = ChatOptions {
            think: Some(true),
            system: Some("Answer tersely.".to_string()),
            options: ModelOptions {
                temperature: Some(0.5),
                ..ModelOptions::default()
            },
            ..ChatOptions::default()
        };
        let request = OllamaChatRequest {
            model: "llama3",
            messages: &messages,
            stream: false,
            think: options.think,
            format: options.format.as_deref(),
            system: options.system.as_deref(),
            options: &options.options,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["system"], "Answer tersely.");
        assert_eq!(value["think"], true);
        assert_eq!(value["options"], serde_json::json!({ "temperature": 0.5 }));
        assert!(value.get("format").is_none());
    }
}
