use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use playground_chat::config::OPENCODE_API_KEY_ENV;
use playground_chat::convert::{to_completion_messages, to_ollama_messages};
use playground_chat::ollama::{
    ChatOptions, OllamaClient, OllamaDelta, DEFAULT_GENERATE_MODEL, DEFAULT_THINKING_MODEL,
};
use playground_chat::system_prompt::SystemPromptConfig;
use playground_chat::types::OPENCODE_MODELS;
use playground_chat::{
    request_with_system_prompt, ChatClient, ChatCompletionRequest, ChatConfig, ChatMessage,
    OllamaConfig,
};
use playground_error::PlaygroundError;
use playground_sandbox::registry::{DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_SESSIONS};
use playground_sandbox::{quick_execute, LocalProcessProvider, RegistryConfig, SandboxRegistry};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::router::{build_router_with_state, shutdown_sessions, spawn_idle_sweeper, AppState};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3030;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Parser, Debug)]
#[command(name = "playground", bin_name = "playground", version)]
#[command(about = "Chat models, code sandboxes and their HTTP API")]
#[command(arg_required_else_help = true)]
pub struct PlaygroundCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server.
    Server(ServerArgs),
    /// Stream a chat completion to stdout.
    Chat(ChatArgs),
    /// Stream a reply from an Ollama-compatible runner.
    Ollama(OllamaArgs),
    /// Run a snippet once in a throwaway local sandbox.
    Exec(ExecArgs),
    /// List the chat model catalog.
    Models,
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    #[arg(long, short = 'H', default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value_t = DEFAULT_MAX_SESSIONS)]
    max_sessions: usize,

    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
    idle_timeout_secs: u64,

    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL_SECS)]
    sweep_interval_secs: u64,

    /// Per-command time limit handed to new sandboxes.
    #[arg(long)]
    provision_timeout_secs: Option<u64>,

    #[arg(long = "cors-allow-origin", short = 'O')]
    cors_allow_origin: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Defaults to DEFAULT_MODEL from the environment.
    #[arg(long, short = 'm')]
    model: Option<String>,

    #[arg(long)]
    no_system_prompt: bool,

    #[arg(long)]
    custom_instructions: Option<String>,

    message: String,
}

#[derive(Args, Debug)]
pub struct OllamaArgs {
    /// Defaults to a reasoning model with --think, a general one otherwise.
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// Ask the model to stream its reasoning as well.
    #[arg(long)]
    think: bool,

    #[arg(long, short = 's')]
    system: Option<String>,

    prompt: String,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    #[arg(long, short = 'r', default_value = "node24")]
    runtime: String,

    #[arg(long)]
    timeout_secs: Option<u64>,

    code: String,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid cors origin: {0}")]
    InvalidCorsOrigin(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server error: {0}")]
    Server(String),
    #[error(transparent)]
    Playground(#[from] PlaygroundError),
}

pub fn run_playground() -> Result<(), CliError> {
    let cli = PlaygroundCli::parse();
    if let Err(err) = init_logging() {
        eprintln!("failed to init logging: {err}");
        return Err(err);
    }
    run_command(&cli.command)
}

pub fn init_logging() -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_logfmt::builder()
                .layer()
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|err| CliError::Server(err.to_string()))
}

pub fn run_command(command: &Command) -> Result<(), CliError> {
    match command {
        Command::Server(args) => run_server(args),
        Command::Chat(args) => block_on(run_chat(args)),
        Command::Ollama(args) => block_on(run_ollama(args)),
        Command::Exec(args) => block_on(run_exec(args)),
        Command::Models => print_models(),
    }
}

fn block_on<F>(future: F) -> Result<(), CliError>
where
    F: Future<Output = Result<(), CliError>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::Server(err.to_string()))?;
    runtime.block_on(future)
}

fn run_server(server: &ServerArgs) -> Result<(), CliError> {
    let registry = Arc::new(SandboxRegistry::new(
        Arc::new(LocalProcessProvider::new()),
        RegistryConfig {
            max_sessions: server.max_sessions,
            idle_timeout: Duration::from_secs(server.idle_timeout_secs),
            provision_timeout: server.provision_timeout_secs.map(Duration::from_secs),
        },
    ));
    let chat = ChatClient::new(ChatConfig::opencode_from_env(), OPENCODE_API_KEY_ENV);
    if !chat.is_configured() {
        tracing::warn!(
            variable = OPENCODE_API_KEY_ENV,
            "chat API key not configured; /v1/chat will fail"
        );
    }

    let state = Arc::new(AppState::new(registry.clone(), chat));
    let (mut router, state) = build_router_with_state(state);
    router = router.layer(build_cors_layer(server)?);

    let addr = format!("{}:{}", server.host, server.port);
    let sweep_every = Duration::from_secs(server.sweep_interval_secs.max(1));

    block_on(async move {
        let sweeper = spawn_idle_sweeper(registry, sweep_every);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, "server listening");
        let shutdown_state = state.clone();
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutting down");
            })
            .await
            .map_err(|err| CliError::Server(err.to_string()));
        sweeper.abort();
        shutdown_sessions(&shutdown_state).await;
        served
    })
}

fn build_cors_layer(server: &ServerArgs) -> Result<CorsLayer, CliError> {
    let mut cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    let mut origins = Vec::new();
    for origin in &server.cors_allow_origin {
        let value: HeaderValue = origin
            .parse()
            .map_err(|_| CliError::InvalidCorsOrigin(origin.clone()))?;
        origins.push(value);
    }
    if origins.is_empty() {
        cors = cors.allow_origin(tower_http::cors::AllowOrigin::predicate(|_, _| false));
    } else {
        cors = cors.allow_origin(origins);
    }
    Ok(cors)
}

async fn run_chat(args: &ChatArgs) -> Result<(), CliError> {
    let client = ChatClient::new(ChatConfig::opencode_from_env(), OPENCODE_API_KEY_ENV);
    let model = args
        .model
        .clone()
        .unwrap_or_else(|| client.config().default_model.clone());
    let messages = to_completion_messages(&[ChatMessage::user(args.message.clone())]);
    let request = if args.no_system_prompt {
        ChatCompletionRequest::new(model, messages)
    } else {
        let prompt = SystemPromptConfig {
            custom_instructions: args.custom_instructions.clone(),
            ..SystemPromptConfig::for_model(model.clone())
        };
        request_with_system_prompt(messages, &model, Some(prompt))
    };

    let mut deltas = client.stream_chat_completion(request).await?;
    let mut stdout = std::io::stdout().lock();
    while let Some(delta) = deltas.next().await {
        write!(stdout, "{}", delta?)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

impl OllamaArgs {
    fn model(&self) -> &str {
        match &self.model {
            Some(model) => model,
            None if self.think => DEFAULT_THINKING_MODEL,
            None => DEFAULT_GENERATE_MODEL,
        }
    }
}

async fn run_ollama(args: &OllamaArgs) -> Result<(), CliError> {
    let client = OllamaClient::new(OllamaConfig::from_env());
    let messages = to_ollama_messages(&[ChatMessage::user(args.prompt.clone())]);
    let options = ChatOptions {
        system: args.system.clone(),
        ..ChatOptions::default()
    };
    let mut deltas = if args.think {
        client.thinking_stream(args.model(), &messages, &options).await?
    } else {
        client.stream_chat(args.model(), &messages, &options).await?
    };

    let mut stdout = std::io::stdout().lock();
    let mut stderr = std::io::stderr().lock();
    while let Some(delta) = deltas.next().await {
        match delta? {
            OllamaDelta::Thinking(text) => write!(stderr, "{text}")?,
            OllamaDelta::Content(text) => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            OllamaDelta::Done => writeln!(stderr)?,
        }
    }
    writeln!(stdout)?;
    Ok(())
}

async fn run_exec(args: &ExecArgs) -> Result<(), CliError> {
    let provider = LocalProcessProvider::new();
    let result = quick_execute(
        &provider,
        &args.code,
        &args.runtime,
        args.timeout_secs.map(Duration::from_secs),
    )
    .await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn print_models() -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(OPENCODE_MODELS)?);
    Ok(())
}
