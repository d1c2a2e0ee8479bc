use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::routing::post;
use axum::Router;
use http_body_util::BodyExt;
use playground::router::{build_router, AppState};
use playground_chat::config::OPENCODE_API_KEY_ENV;
use playground_chat::{ChatClient, ChatConfig};
use playground_sandbox::testing::FakeProvider;
use playground_sandbox::{RegistryConfig, SandboxRegistry};
use serde_json::{json, Value};
use tower::util::ServiceExt;

struct TestApp {
    app: Router,
    provider: Arc<FakeProvider>,
}

impl TestApp {
    fn new(chat: ChatClient) -> Self {
        let provider = Arc::new(FakeProvider::new());
        let registry = Arc::new(SandboxRegistry::new(
            provider.clone(),
            RegistryConfig {
                max_sessions: 2,
                ..RegistryConfig::default()
            },
        ));
        let app = build_router(AppState::new(registry, chat));
        Self { app, provider }
    }

    fn without_chat() -> Self {
        Self::new(ChatClient::new(
            ChatConfig::new("http://127.0.0.1:9/v1", None),
            OPENCODE_API_KEY_ENV,
        ))
    }
}

async fn send_request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    let request_body = if let Some(body) = body {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(body.to_string())
    } else {
        Body::empty()
    };
    let request = builder.body(request_body).expect("build request");
    let response = app.clone().oneshot(request).await.expect("request handled");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send_request(app, method, uri, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

#[tokio::test]
async fn health_and_models() {
    let test = TestApp::without_chat();
    let (status, body) = send_json(&test.app, Method::GET, "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));

    let (status, body) = send_json(&test.app, Method::GET, "/v1/models", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["defaultModel"], "glm-4.7-free");
    assert_eq!(body["models"].as_array().map(Vec::len), Some(4));
}

#[tokio::test]
async fn sandbox_session_lifecycle() {
    let test = TestApp::without_chat();

    let (status, created) = send_json(
        &test.app,
        Method::POST,
        "/v1/sandbox/sessions",
        Some(json!({ "runtime": "python3.13" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["runtime"], "python3.13");
    let session_id = created["sessionId"].as_str().expect("session id").to_string();
    assert!(session_id.starts_with("sandbox-"));

    let (status, result) = send_json(
        &test.app,
        Method::POST,
        &format!("/v1/sandbox/sessions/{session_id}/exec"),
        Some(json!({ "code": "print(1)" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["exitCode"], 0);
    assert_eq!(result["stdout"], "python3 -c print(1)\n");

    let (status, listed) = send_json(&test.app, Method::GET, "/v1/sandbox/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["sessions"][0]["id"], session_id.as_str());

    let (status, _) = send_request(
        &test.app,
        Method::DELETE,
        &format!("/v1/sandbox/sessions/{session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, problem) = send_json(
        &test.app,
        Method::GET,
        &format!("/v1/sandbox/sessions/{session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(problem["type"], "urn:playground:error:session_not_found");
    assert_eq!(problem["sessionId"], session_id.as_str());
}

#[tokio::test]
async fn exec_against_unknown_session_is_not_found() {
    let test = TestApp::without_chat();
    let (status, problem) = send_json(
        &test.app,
        Method::POST,
        "/v1/sandbox/sessions/unknown-id/exec",
        Some(json!({ "code": "print(1)" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(problem["status"], 404);
    assert!(test.provider.calls().is_empty());
}

#[tokio::test]
async fn malformed_exec_request_is_rejected() {
    let test = TestApp::without_chat();
    let (_, created) = send_json(&test.app, Method::POST, "/v1/sandbox/sessions", Some(json!({}))).await;
    let session_id = created["sessionId"].as_str().expect("session id").to_string();

    let (status, problem) = send_json(
        &test.app,
        Method::POST,
        &format!("/v1/sandbox/sessions/{session_id}/exec"),
        Some(json!({ "code": "1", "command": "ls" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(problem["type"], "urn:playground:error:invalid_request");
}

#[tokio::test]
async fn quick_execute_rejects_unknown_runtime() {
    let test = TestApp::without_chat();
    let (status, problem) = send_json(
        &test.app,
        Method::POST,
        "/v1/sandbox/execute",
        Some(json!({ "code": "puts 1", "runtime": "ruby" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(problem["type"], "urn:playground:error:invalid_request");
    assert!(problem["detail"]
        .as_str()
        .unwrap_or_default()
        .ends_with("unsupported runtime: ruby"));
    assert!(test.provider.create_options().is_empty());

    let (status, _) = send_json(
        &test.app,
        Method::POST,
        "/v1/sandbox/sessions",
        Some(json!({ "runtime": "ruby" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(test.provider.create_options().is_empty());

    let (status, result) = send_json(
        &test.app,
        Method::POST,
        "/v1/sandbox/execute",
        Some(json!({ "code": "console.log(1)" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["stdout"], "node -e console.log(1)\n");
    assert_eq!(test.provider.live_sandboxes(), 0);
}

#[tokio::test]
async fn chat_without_key_is_configuration_error() {
    let test = TestApp::without_chat();
    let (status, problem) = send_json(
        &test.app,
        Method::POST,
        "/v1/chat",
        Some(json!({ "messages": [{ "role": "user", "content": "hi" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(problem["detail"]
        .as_str()
        .unwrap_or_default()
        .contains(OPENCODE_API_KEY_ENV));
}

async fn spawn_upstream() -> SocketAddr {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n",
            )
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve upstream");
    });
    addr
}

#[tokio::test]
async fn chat_relays_deltas_as_sse() {
    let addr = spawn_upstream().await;
    let test = TestApp::new(ChatClient::new(
        ChatConfig::new(format!("http://{addr}/v1"), Some("sk-test".to_string())),
        OPENCODE_API_KEY_ENV,
    ));

    let (status, body) = send_request(
        &test.app,
        Method::POST,
        "/v1/chat",
        Some(json!({
            "messages": [{ "role": "user", "content": "hello" }],
            "systemPrompt": false
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).expect("utf8 body");
    assert!(text.contains("event: delta\ndata: {\"text\":\"Hi\"}"), "{text}");
    assert!(text.contains("event: done\ndata: [DONE]"), "{text}");
    assert_eq!(text.matches("event: delta").count(), 1);
}

#[tokio::test]
async fn openapi_lists_sandbox_routes() {
    let test = TestApp::without_chat();
    let (status, doc) = send_json(&test.app, Method::GET, "/v1/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    let paths = doc["paths"].as_object().expect("paths");
    for path in [
        "/v1/health",
        "/v1/chat",
        "/v1/sandbox/sessions",
        "/v1/sandbox/sessions/{session_id}",
        "/v1/sandbox/sessions/{session_id}/exec",
        "/v1/sandbox/execute",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }
}
