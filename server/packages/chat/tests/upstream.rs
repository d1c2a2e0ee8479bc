use std::net::SocketAddr;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use playground_chat::config::{OLLAMA_API_KEY_ENV, OPENCODE_API_KEY_ENV};
use playground_chat::convert::{to_completion_messages, to_ollama_messages};
use playground_chat::ollama::{ChatOptions, OllamaClient, OllamaDelta};
use playground_chat::{
    ChatClient, ChatCompletionRequest, ChatCompletions, ChatConfig, ChatMessage, OllamaConfig,
};
use playground_error::PlaygroundError;
use serde_json::{json, Value};

const API_KEY: &str = "sk-test";

const SSE_BODY: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\", world\"}}]}\n\n",
    "data: [DONE]\n\n",
);

const NDJSON_BODY: &str = concat!(
    "{\"message\":{\"role\":\"assistant\",\"content\":\"\",\"thinking\":\"hmm\"},\"done\":false}\n",
    "{\"message\":{\"role\":\"assistant\",\"content\":\"42\"},\"done\":false}\n",
    "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
);

async fn completions(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        == Some("Bearer sk-test");
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }
    if body["stream"] == json!(true) {
        return ([(CONTENT_TYPE, "text/event-stream")], SSE_BODY).into_response();
    }
    let prompt = body["messages"][0]["content"].as_str().unwrap_or("");
    let reply = format!("echo: {prompt}");
    Json(json!({
        "id": "cmpl-1",
        "object": "chat.completion",
        "created": 1,
        "model": body["model"],
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": reply },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5 }
    }))
    .into_response()
}

async fn ollama_chat(Json(body): Json<Value>) -> Response {
    if body["stream"] == json!(true) {
        return ([(CONTENT_TYPE, "application/x-ndjson")], NDJSON_BODY).into_response();
    }
    let thinking = if body["think"] == json!(true) {
        json!("let me think")
    } else {
        Value::Null
    };
    Json(json!({
        "model": body["model"],
        "message": { "role": "assistant", "content": "done", "thinking": thinking },
        "done": true
    }))
    .into_response()
}

async fn ollama_tags() -> Json<Value> {
    Json(json!({
        "models": [{
            "name": "llama3:8b",
            "model": "llama3:8b",
            "modified_at": "2025-01-01T00:00:00Z",
            "size": 4661224676u64,
            "digest": "abc",
            "details": { "format": "gguf", "family": "llama", "parameter_size": "8B", "quantization_level": "Q4_0" }
        }]
    }))
}

async fn spawn_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .route("/api/chat", post(ollama_chat))
        .route("/api/tags", get(ollama_tags));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve upstream");
    });
    addr
}

fn chat_client(addr: SocketAddr, key: Option<&str>) -> ChatClient {
    ChatClient::new(
        ChatConfig::new(format!("http://{addr}/v1"), key.map(str::to_string)),
        OPENCODE_API_KEY_ENV,
    )
}

fn request() -> ChatCompletionRequest {
    ChatCompletionRequest::new(
        "glm-4.7-free",
        to_completion_messages(&[ChatMessage::user("ping")]),
    )
}

#[tokio::test]
async fn streaming_completion_yields_text_deltas() {
    let addr = spawn_upstream().await;
    let client = chat_client(addr, Some(API_KEY));
    let stream = match client.stream_chat_completion(request()).await {
        Ok(stream) => stream,
        Err(err) => panic!("stream failed: {err}"),
    };
    let deltas: Vec<String> = stream.map(|item| item.expect("delta")).collect().await;
    assert_eq!(deltas, vec!["Hello".to_string(), ", world".to_string()]);
}

#[tokio::test]
async fn non_streaming_completion_parses_response() {
    let addr = spawn_upstream().await;
    let client = chat_client(addr, Some(API_KEY));
    let response = client
        .create_chat_completion(request())
        .await
        .expect("completion");
    assert_eq!(response.first_text().as_deref(), Some("echo: ping"));
    assert_eq!(response.usage.map(|usage| usage.total_tokens), Some(5));
}

#[tokio::test]
async fn rejected_request_surfaces_status() {
    let addr = spawn_upstream().await;
    let client = chat_client(addr, Some("sk-wrong"));
    let err = match client.stream_chat_completion(request()).await {
        Ok(_) => panic!("expected api error"),
        Err(err) => err,
    };
    match err {
        PlaygroundError::Api { status, message } => {
            assert_eq!(status, Some(401));
            assert!(message.contains("invalid api key"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn missing_key_never_reaches_upstream() {
    let addr = spawn_upstream().await;
    let client = chat_client(addr, None);
    let err = match client.stream_chat_completion(request()).await {
        Ok(_) => panic!("expected configuration error"),
        Err(err) => err,
    };
    assert!(matches!(err, PlaygroundError::Configuration { .. }));
}

#[tokio::test]
async fn ollama_stream_and_chat() {
    let addr = spawn_upstream().await;
    let client = OllamaClient::new(OllamaConfig::new(format!("http://{addr}/api"), None));
    let messages = to_ollama_messages(&[ChatMessage::user("meaning of life?")]);

    let stream = match client
        .thinking_stream("deepseek-r1", &messages, &ChatOptions::default())
        .await
    {
        Ok(stream) => stream,
        Err(err) => panic!("stream failed: {err}"),
    };
    let deltas: Vec<OllamaDelta> = stream.map(|item| item.expect("delta")).collect().await;
    assert_eq!(
        deltas,
        vec![
            OllamaDelta::Thinking("hmm".to_string()),
            OllamaDelta::Content("42".to_string()),
            OllamaDelta::Done,
        ]
    );

    let reply = client
        .generate_with_thinking("why?", "deepseek-r1")
        .await
        .expect("thinking reply");
    assert_eq!(reply.content, "done");
    assert_eq!(reply.thinking.as_deref(), Some("let me think"));

    let plain = client
        .generate("why?", "llama3", &ChatOptions::default())
        .await
        .expect("plain reply");
    assert_eq!(plain.thinking, None);
}

#[tokio::test]
async fn ollama_tags_lists_models() {
    let addr = spawn_upstream().await;
    let client = OllamaClient::new(OllamaConfig::new(format!("http://{addr}/api"), None));
    let tags = client.tags().await.expect("tags");
    assert_eq!(tags.models.len(), 1);
    assert_eq!(tags.models[0].name, "llama3:8b");
    assert_eq!(
        tags.models[0].details.as_ref().map(|d| d.family.as_str()),
        Some("llama")
    );
}

#[tokio::test]
async fn hosted_ollama_without_key_is_configuration_error() {
    let client = OllamaClient::new(OllamaConfig::new("https://ollama.com/api", None));
    let err = client.tags().await.unwrap_err();
    match err {
        PlaygroundError::Configuration { message } => {
            assert!(message.contains(OLLAMA_API_KEY_ENV));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
