//! Chat backends: an OpenAI-compatible completion client, an Ollama-style
//! runner client, and the message shapes shared between them.

pub mod completions;
pub mod config;
pub mod convert;
pub mod ollama;
pub mod sse;
pub mod system_prompt;
pub mod types;

pub use completions::{request_with_system_prompt, ChatClient, ChatCompletions};
pub use config::{ChatConfig, OllamaConfig};
pub use sse::{text_deltas, TextStream};
pub use types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, CompletionMessage, ContentPart,
    MessageContent, Role,
};
