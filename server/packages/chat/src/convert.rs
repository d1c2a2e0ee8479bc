//! Mappings between [`ChatMessage`] and the backend-specific message shapes.
//!
//! Roles pass through unchanged and no validation happens beyond the types.

use crate::ollama::OllamaMessage;
use crate::types::{ChatMessage, CompletionMessage, MessageContent};

pub fn to_completion_messages(messages: &[ChatMessage]) -> Vec<CompletionMessage> {
    messages
        .iter()
        .map(|message| CompletionMessage {
            role: message.role,
            content: MessageContent::Text(message.content.clone()),
        })
        .collect()
}

pub fn from_completion_messages(messages: &[CompletionMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|message| ChatMessage::new(message.role, message.content.as_text()))
        .collect()
}

pub fn to_ollama_messages(messages: &[ChatMessage]) -> Vec<OllamaMessage> {
    messages
        .iter()
        .map(|message| OllamaMessage::new(message.role, message.content.clone()))
        .collect()
}

pub fn from_ollama_messages(messages: &[OllamaMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|message| ChatMessage::new(message.role, message.content.clone()))
        .collect()
}
