use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{stream, Stream, StreamExt};
use playground_chat::convert::to_completion_messages;
use playground_chat::sse::DONE_MARKER;
use playground_chat::system_prompt::SystemPromptConfig;
use playground_chat::types::OPENCODE_MODELS;
use playground_chat::{
    request_with_system_prompt, ChatClient, ChatCompletionRequest, ChatMessage, Role,
};
use playground_error::{ErrorType, PlaygroundError, ProblemDetails};
use playground_sandbox::{
    ExecutionRequest, ExecutionResult, Runtime, SandboxRegistry, SessionInfo,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::Span;
use utoipa::{Modify, OpenApi, ToSchema};

const SERVER_INFO: &str = "This is a playground server. API routes are under /v1.";

#[derive(Debug)]
pub struct AppState {
    registry: Arc<SandboxRegistry>,
    chat: ChatClient,
}

impl AppState {
    pub fn new(registry: Arc<SandboxRegistry>, chat: ChatClient) -> Self {
        Self { registry, chat }
    }

    pub fn registry(&self) -> Arc<SandboxRegistry> {
        self.registry.clone()
    }
}

pub fn build_router(state: AppState) -> Router {
    build_router_with_state(Arc::new(state)).0
}

pub fn build_router_with_state(shared: Arc<AppState>) -> (Router, Arc<AppState>) {
    let v1_router = Router::new()
        .route("/health", get(get_health))
        .route("/models", get(list_models))
        .route("/chat", post(post_chat))
        .route(
            "/sandbox/sessions",
            get(list_sandbox_sessions).post(create_sandbox_session),
        )
        .route(
            "/sandbox/sessions/:session_id",
            get(get_sandbox_session).delete(delete_sandbox_session),
        )
        .route("/sandbox/sessions/:session_id/exec", post(exec_in_session))
        .route("/sandbox/execute", post(quick_execute))
        .route("/openapi.json", get(get_openapi))
        .with_state(shared.clone());

    let router = Router::new()
        .route("/", get(get_root))
        .nest("/v1", v1_router)
        .fallback(not_found)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<_>| {
                    tracing::info_span!("http.request", method = %req.method(), uri = %req.uri())
                })
                .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
                    tracing::info!(
                        parent: span,
                        status = %res.status(),
                        latency_ms = latency.as_millis()
                    );
                }),
        );

    (router, shared)
}

/// Periodically destroys sandbox sessions that have been idle too long.
pub fn spawn_idle_sweeper(registry: Arc<SandboxRegistry>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = registry.sweep_idle_sessions(registry.now_ms()).await;
            tracing::debug!(removed = removed.len(), "idle sweep finished");
        }
    })
}

pub async fn shutdown_sessions(state: &Arc<AppState>) {
    state.registry.shutdown().await;
}

#[derive(OpenApi)]
#[openapi(
    paths(
        get_health,
        list_models,
        post_chat,
        list_sandbox_sessions,
        create_sandbox_session,
        get_sandbox_session,
        delete_sandbox_session,
        exec_in_session,
        quick_execute
    ),
    components(
        schemas(
            HealthResponse,
            ModelSummary,
            ModelListResponse,
            ChatRequest,
            ChatMessage,
            Role,
            ChatDelta,
            Runtime,
            SessionInfo,
            SessionListResponse,
            CreateSandboxSessionRequest,
            CreateSandboxSessionResponse,
            ExecRequest,
            QuickExecuteRequest,
            ExecutionResult,
            ProblemDetails,
            ErrorType
        )
    ),
    tags(
        (name = "meta", description = "Service metadata"),
        (name = "chat", description = "Chat completions"),
        (name = "sandbox", description = "Code sandbox sessions")
    ),
    modifiers(&ServerAddon)
)]
pub struct ApiDoc;

struct ServerAddon;

impl Modify for ServerAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        openapi.servers = Some(vec![utoipa::openapi::Server::new("http://localhost:3030")]);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Playground(#[from] PlaygroundError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem: ProblemDetails = match &self {
            ApiError::Playground(err) => err.to_problem_details(),
        };
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(problem)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ModelSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelListResponse {
    pub default_model: String,
    pub models: Vec<ModelSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Prepend the generated system prompt.
    #[serde(default = "default_true")]
    pub system_prompt: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Payload of a `delta` event on the chat stream.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ChatDelta {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct CreateSandboxSessionRequest {
    /// Runtime selector such as `node24` or `python3.13`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSandboxSessionResponse {
    pub session_id: String,
    pub runtime: Runtime,
}

/// Either `code` (optionally with `runtime`) or `command` with `args`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ExecRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl ExecRequest {
    fn into_execution_request(self) -> Result<ExecutionRequest, PlaygroundError> {
        match (self.code, self.command) {
            (Some(code), None) => {
                let runtime = self
                    .runtime
                    .as_deref()
                    .map(parse_runtime)
                    .transpose()?;
                Ok(ExecutionRequest::Code { code, runtime })
            }
            (None, Some(command)) => Ok(ExecutionRequest::Command {
                command,
                args: self.args,
            }),
            _ => Err(PlaygroundError::InvalidRequest {
                message: "exactly one of code or command is required".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct QuickExecuteRequest {
    pub code: String,
    #[serde(default = "default_runtime")]
    pub runtime: String,
}

fn default_runtime() -> String {
    Runtime::default().as_str().to_string()
}

/// Runtime selectors arrive from the caller, so an unknown one is a bad
/// request rather than a server misconfiguration.
fn parse_runtime(selector: &str) -> Result<Runtime, PlaygroundError> {
    selector.parse().map_err(|err| match err {
        PlaygroundError::Configuration { message } => PlaygroundError::InvalidRequest { message },
        other => other,
    })
}

async fn get_root() -> &'static str {
    SERVER_INFO
}

async fn not_found() -> (StatusCode, String) {
    (
        StatusCode::NOT_FOUND,
        format!("404 Not Found\n\n{SERVER_INFO}"),
    )
}

async fn get_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    get,
    path = "/v1/health",
    responses((status = 200, body = HealthResponse)),
    tag = "meta"
)]
async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/v1/models",
    responses((status = 200, body = ModelListResponse)),
    tag = "chat"
)]
async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelListResponse> {
    let models = OPENCODE_MODELS
        .iter()
        .map(|model| ModelSummary {
            id: model.id.to_string(),
            name: model.name.to_string(),
            description: model.description.to_string(),
            provider: model.provider.to_string(),
        })
        .collect();
    Json(ModelListResponse {
        default_model: state.chat.config().default_model.clone(),
        models,
    })
}

#[utoipa::path(
    post,
    path = "/v1/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "SSE stream of `delta` events ending with `done`", content_type = "text/event-stream", body = ChatDelta),
        (status = 400, body = ProblemDetails),
        (status = 500, body = ProblemDetails),
        (status = 502, body = ProblemDetails)
    ),
    tag = "chat"
)]
async fn post_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if request.messages.is_empty() {
        return Err(PlaygroundError::InvalidRequest {
            message: "messages must not be empty".to_string(),
        }
        .into());
    }
    let model = request
        .model
        .unwrap_or_else(|| state.chat.config().default_model.clone());
    let messages = to_completion_messages(&request.messages);
    let completion = if request.system_prompt {
        let prompt = SystemPromptConfig {
            custom_instructions: request.custom_instructions,
            ..SystemPromptConfig::for_model(model.clone())
        };
        request_with_system_prompt(messages, &model, Some(prompt))
    } else {
        ChatCompletionRequest::new(model, messages)
    };

    let deltas = state.chat.stream_chat_completion(completion).await?;
    let events = deltas
        .map(|item| {
            let event = match item {
                Ok(text) => Event::default().event("delta").json_data(ChatDelta { text }),
                Err(err) => Event::default()
                    .event("error")
                    .json_data(err.to_problem_details()),
            };
            Ok(event.unwrap_or_else(|_| Event::default().event("error")))
        })
        .chain(stream::once(async {
            Ok(Event::default().event("done").data(DONE_MARKER))
        }));
    Ok(Sse::new(events))
}

#[utoipa::path(
    get,
    path = "/v1/sandbox/sessions",
    responses((status = 200, body = SessionListResponse)),
    tag = "sandbox"
)]
async fn list_sandbox_sessions(State(state): State<Arc<AppState>>) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: state.registry.sessions().await,
    })
}

#[utoipa::path(
    post,
    path = "/v1/sandbox/sessions",
    request_body = CreateSandboxSessionRequest,
    responses(
        (status = 201, body = CreateSandboxSessionResponse),
        (status = 400, body = ProblemDetails),
        (status = 503, body = ProblemDetails)
    ),
    tag = "sandbox"
)]
async fn create_sandbox_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSandboxSessionRequest>,
) -> Result<(StatusCode, Json<CreateSandboxSessionResponse>), ApiError> {
    let runtime = match request.runtime.as_deref() {
        Some(selector) => parse_runtime(selector)?,
        None => Runtime::default(),
    };
    let session_id = state.registry.create_session(runtime).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateSandboxSessionResponse {
            session_id,
            runtime,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/sandbox/sessions/{session_id}",
    params(("session_id" = String, Path, description = "Sandbox session id")),
    responses(
        (status = 200, body = SessionInfo),
        (status = 404, body = ProblemDetails)
    ),
    tag = "sandbox"
)]
async fn get_sandbox_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    state
        .registry
        .session_info(&session_id)
        .await
        .map(Json)
        .ok_or_else(|| PlaygroundError::session_not_found(session_id).into())
}

#[utoipa::path(
    delete,
    path = "/v1/sandbox/sessions/{session_id}",
    params(("session_id" = String, Path, description = "Sandbox session id")),
    responses((status = 204, description = "Session destroyed or already gone")),
    tag = "sandbox"
)]
async fn delete_sandbox_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> StatusCode {
    state.registry.destroy_session(&session_id).await;
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    post,
    path = "/v1/sandbox/sessions/{session_id}/exec",
    params(("session_id" = String, Path, description = "Sandbox session id")),
    request_body = ExecRequest,
    responses(
        (status = 200, body = ExecutionResult),
        (status = 400, body = ProblemDetails),
        (status = 404, body = ProblemDetails)
    ),
    tag = "sandbox"
)]
async fn exec_in_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<ExecRequest>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let request = request.into_execution_request()?;
    let result = state
        .registry
        .execute_in_session(&session_id, request)
        .await?;
    Ok(Json(result))
}

#[utoipa::path(
    post,
    path = "/v1/sandbox/execute",
    request_body = QuickExecuteRequest,
    responses(
        (status = 200, body = ExecutionResult),
        (status = 400, body = ProblemDetails),
        (status = 503, body = ProblemDetails)
    ),
    tag = "sandbox"
)]
async fn quick_execute(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QuickExecuteRequest>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let runtime = parse_runtime(&request.runtime)?;
    let result = state
        .registry
        .quick_execute(&request.code, runtime.as_str())
        .await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_request_requires_exactly_one_target() {
        let both = ExecRequest {
            code: Some("1".to_string()),
            command: Some("ls".to_string()),
            ..ExecRequest::default()
        };
        assert!(matches!(
            both.into_execution_request(),
            Err(PlaygroundError::InvalidRequest { .. })
        ));
        assert!(ExecRequest::default().into_execution_request().is_err());
    }

    #[test]
    fn exec_request_parses_runtime() {
        let request = ExecRequest {
            code: Some("print(1)".to_string()),
            runtime: Some("python3.13".to_string()),
            ..ExecRequest::default()
        };
        assert_eq!(
            request.into_execution_request().unwrap(),
            ExecutionRequest::Code {
                code: "print(1)".to_string(),
                runtime: Some(Runtime::Python313),
            }
        );

        let unsupported = ExecRequest {
            code: Some("puts 1".to_string()),
            runtime: Some("ruby".to_string()),
            ..ExecRequest::default()
        };
        assert!(matches!(
            unsupported.into_execution_request(),
            Err(PlaygroundError::InvalidRequest { message }) if message == "unsupported runtime: ruby"
        ));
    }

    #[test]
    fn chat_request_defaults_to_system_prompt() {
        let request: ChatRequest =
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"hi"}]}"#).unwrap();
        assert!(request.system_prompt);
        assert_eq!(request.model, None);
    }
}
