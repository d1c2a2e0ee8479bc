//! Bounded registry of long-lived code-execution sandboxes.
//!
//! Sessions are keyed by a client-generated id and evicted least recently
//! used first once the registry is full. Idle sessions are only removed when
//! a caller runs [`SandboxRegistry::sweep_idle_sessions`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use playground_error::PlaygroundError;
use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use utoipa::ToSchema;

use crate::backend::{CodeSandbox, CreateSandboxOptions, SandboxProvider};
use crate::clock::{Clock, SystemClock};
use crate::runtime::Runtime;

pub const DEFAULT_MAX_SESSIONS: usize = 5;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 9;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub max_sessions: usize,
    pub idle_timeout: Duration,
    /// Forwarded to the provider when a sandbox is created.
    pub provision_timeout: Option<Duration>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            provision_timeout: None,
        }
    }
}

/// Outcome of one command. Failures of the command itself, including
/// transport faults while running it, are reported here with exit code 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn fault(message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_code: 1,
            duration_ms,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionRequest {
    Command { command: String, args: Vec<String> },
    /// Runs source text; `runtime` defaults to the session's runtime.
    Code {
        code: String,
        runtime: Option<Runtime>,
    },
}

impl ExecutionRequest {
    pub fn command(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::Command {
            command: command.into(),
            args,
        }
    }

    pub fn code(code: impl Into<String>) -> Self {
        Self::Code {
            code: code.into(),
            runtime: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub runtime: Runtime,
    pub created_at: u64,
    pub last_used_at: u64,
}

struct Session {
    id: String,
    handle: Arc<dyn CodeSandbox>,
    runtime: Runtime,
    created_at: u64,
    last_used_at: u64,
}

impl Session {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            runtime: self.runtime,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
    }
}

pub struct SandboxRegistry {
    provider: Arc<dyn SandboxProvider>,
    clock: Arc<dyn Clock>,
    config: RegistryConfig,
    sessions: Mutex<IndexMap<String, Session>>,
}

impl std::fmt::Debug for SandboxRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SandboxRegistry {
    pub fn new(provider: Arc<dyn SandboxProvider>, config: RegistryConfig) -> Self {
        Self::with_clock(provider, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        provider: Arc<dyn SandboxProvider>,
        mut config: RegistryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        config.max_sessions = config.max_sessions.max(1);
        Self {
            provider,
            clock,
            config,
            sessions: Mutex::new(IndexMap::new()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Provisions a sandbox and registers it, evicting the least recently
    /// used session when the registry is full.
    pub async fn create_session(&self, runtime: Runtime) -> Result<String, PlaygroundError> {
        let sandbox = provision(
            self.provider.as_ref(),
            runtime,
            self.config.provision_timeout,
        )
        .await?;
        let handle: Arc<dyn CodeSandbox> = Arc::from(sandbox);
        let now = self.clock.now_ms();

        let (session_id, evicted) = {
            let mut sessions = self.sessions.lock().await;
            let mut evicted = Vec::new();
            while sessions.len() >= self.config.max_sessions {
                let Some(oldest) = least_recently_used(&sessions) else {
                    break;
                };
                if let Some(session) = sessions.shift_remove(&oldest) {
                    evicted.push(session);
                }
            }

            let session_id = loop {
                let candidate = generate_session_id(now);
                if !sessions.contains_key(&candidate) {
                    break candidate;
                }
            };
            sessions.insert(
                session_id.clone(),
                Session {
                    id: session_id.clone(),
                    handle,
                    runtime,
                    created_at: now,
                    last_used_at: now,
                },
            );
            (session_id, evicted)
        };

        for session in evicted {
            tracing::info!(
                session_id = %session.id,
                last_used_at = session.last_used_at,
                "evicting least recently used sandbox session"
            );
            teardown(session).await;
        }

        tracing::info!(session_id = %session_id, runtime = %runtime, "sandbox session created");
        Ok(session_id)
    }

    pub async fn execute_in_session(
        &self,
        session_id: &str,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, PlaygroundError> {
        let (handle, session_runtime) = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| PlaygroundError::session_not_found(session_id))?;
            session.last_used_at = self.clock.now_ms();
            (session.handle.clone(), session.runtime)
        };

        let result = match request {
            ExecutionRequest::Command { command, args } => {
                run_once(handle.as_ref(), &command, &args).await
            }
            ExecutionRequest::Code { code, runtime } => {
                let invocation = runtime.unwrap_or(session_runtime).invocation(&code);
                run_once(handle.as_ref(), invocation.command, &invocation.args).await
            }
        };
        tracing::debug!(
            session_id = %session_id,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            "sandbox execution finished"
        );
        Ok(result)
    }

    /// Removes a session. Unknown ids are ignored.
    pub async fn destroy_session(&self, session_id: &str) {
        let removed = self.sessions.lock().await.shift_remove(session_id);
        if let Some(session) = removed {
            tracing::info!(session_id = %session_id, "sandbox session destroyed");
            teardown(session).await;
        }
    }

    /// Destroys every session idle for longer than the idle timeout and
    /// returns their ids.
    pub async fn sweep_idle_sessions(&self, now_ms: u64) -> Vec<String> {
        let idle_ms = u64::try_from(self.config.idle_timeout.as_millis()).unwrap_or(u64::MAX);
        let removed: Vec<Session> = {
            let mut sessions = self.sessions.lock().await;
            let expired: Vec<String> = sessions
                .values()
                .filter(|session| now_ms.saturating_sub(session.last_used_at) > idle_ms)
                .map(|session| session.id.clone())
                .collect();
            expired
                .iter()
                .filter_map(|id| sessions.shift_remove(id))
                .collect()
        };

        let ids: Vec<String> = removed.iter().map(|session| session.id.clone()).collect();
        for session in removed {
            teardown(session).await;
        }
        if !ids.is_empty() {
            tracing::info!(removed = ids.len(), "swept idle sandbox sessions");
        }
        ids
    }

    /// Runs `code` once in a throwaway sandbox. The registry's sessions are
    /// not touched.
    pub async fn quick_execute(
        &self,
        code: &str,
        runtime: &str,
    ) -> Result<ExecutionResult, PlaygroundError> {
        quick_execute(
            self.provider.as_ref(),
            code,
            runtime,
            self.config.provision_timeout,
        )
        .await
    }

    pub async fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.lock().await.get(session_id).map(Session::info)
    }

    /// Session ids in creation order.
    pub async fn list_sessions(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.lock().await.values().map(Session::info).collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Destroys every session.
    pub async fn shutdown(&self) {
        let drained: Vec<Session> = self
            .sessions
            .lock()
            .await
            .drain(..)
            .map(|(_, session)| session)
            .collect();
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "destroying sandbox sessions");
        }
        for session in drained {
            teardown(session).await;
        }
    }
}

/// Provisions an ephemeral sandbox, runs `code` once and stops it again.
/// An unknown runtime selector fails before anything is provisioned.
pub async fn quick_execute(
    provider: &dyn SandboxProvider,
    code: &str,
    runtime: &str,
    timeout: Option<Duration>,
) -> Result<ExecutionResult, PlaygroundError> {
    let runtime: Runtime = runtime.parse()?;
    let invocation = runtime.invocation(code);
    let sandbox = provision(provider, runtime, timeout).await?;
    let result = run_once(sandbox.as_ref(), invocation.command, &invocation.args).await;
    if let Err(err) = sandbox.stop().await {
        tracing::warn!(error = %err, "failed to stop ephemeral sandbox");
    }
    Ok(result)
}

async fn provision(
    provider: &dyn SandboxProvider,
    runtime: Runtime,
    timeout: Option<Duration>,
) -> Result<Box<dyn CodeSandbox>, PlaygroundError> {
    provider
        .create(CreateSandboxOptions { runtime, timeout })
        .await
        .map_err(|err| {
            tracing::warn!(runtime = %runtime, error = %err, "sandbox provisioning failed");
            PlaygroundError::Provisioning {
                message: err.to_string(),
            }
        })
}

async fn run_once(sandbox: &dyn CodeSandbox, command: &str, args: &[String]) -> ExecutionResult {
    let started = Instant::now();
    let outcome = sandbox.run_command(command, args).await;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match outcome {
        Ok(output) => ExecutionResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            duration_ms,
        },
        Err(err) => ExecutionResult::fault(err.to_string(), duration_ms),
    }
}

async fn teardown(session: Session) {
    if let Err(err) = session.handle.stop().await {
        tracing::warn!(session_id = %session.id, error = %err, "failed to stop sandbox");
    }
}

/// Minimum `last_used_at`; the earliest inserted session wins a tie.
fn least_recently_used(sessions: &IndexMap<String, Session>) -> Option<String> {
    let mut oldest: Option<&Session> = None;
    for session in sessions.values() {
        if oldest.map_or(true, |current| session.last_used_at < current.last_used_at) {
            oldest = Some(session);
        }
    }
    oldest.map(|session| session.id.clone())
}

/// `sandbox-{ms}-{9 base36}`. Only live ids are checked for collisions;
/// ids of destroyed sessions are not remembered, so distinctness from them
/// rests on the timestamp plus roughly 46 bits of randomness.
fn generate_session_id(now_ms: u64) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("sandbox-{now_ms}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::FakeProvider;

    fn registry(max_sessions: usize) -> (SandboxRegistry, Arc<FakeProvider>, Arc<ManualClock>) {
        let provider = Arc::new(FakeProvider::new());
        let clock = Arc::new(ManualClock::new(0));
        let registry = SandboxRegistry::with_clock(
            provider.clone(),
            RegistryConfig {
                max_sessions,
                ..RegistryConfig::default()
            },
            clock.clone(),
        );
        (registry, provider, clock)
    }

    #[test]
    fn session_ids_have_time_and_suffix() {
        let id = generate_session_id(1_700_000_000_000);
        let suffix = id.strip_prefix("sandbox-1700000000000-").expect("prefix");
        assert_eq!(suffix.len(), ID_SUFFIX_LEN);
        assert!(suffix.bytes().all(|byte| ID_ALPHABET.contains(&byte)));
    }

    #[tokio::test]
    async fn tie_goes_to_first_inserted() {
        let (registry, _, _) = registry(2);
        let first = registry.create_session(Runtime::Node24).await.unwrap();
        let second = registry.create_session(Runtime::Node24).await.unwrap();
        let third = registry.create_session(Runtime::Node24).await.unwrap();
        assert_eq!(registry.list_sessions().await, vec![second, third]);
        assert!(registry.session_info(&first).await.is_none());
    }

    #[tokio::test]
    async fn zero_capacity_is_treated_as_one() {
        let (registry, _, _) = registry(0);
        registry.create_session(Runtime::Node24).await.unwrap();
        registry.create_session(Runtime::Node24).await.unwrap();
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn execution_uses_session_runtime_by_default() {
        let (registry, provider, _) = registry(5);
        let id = registry.create_session(Runtime::Python313).await.unwrap();
        registry
            .execute_in_session(&id, ExecutionRequest::code("print(1)"))
            .await
            .unwrap();
        registry
            .execute_in_session(
                &id,
                ExecutionRequest::Code {
                    code: "1".to_string(),
                    runtime: Some(Runtime::Node22),
                },
            )
            .await
            .unwrap();
        let calls = provider.calls();
        assert_eq!(calls[0].0, "python3");
        assert_eq!(calls[0].1, vec!["-c".to_string(), "print(1)".to_string()]);
        assert_eq!(calls[1].0, "node");
    }

    #[tokio::test]
    async fn shutdown_stops_every_sandbox() {
        let (registry, provider, _) = registry(5);
        for _ in 0..3 {
            registry.create_session(Runtime::Node24).await.unwrap();
        }
        registry.shutdown().await;
        assert!(registry.is_empty().await);
        assert_eq!(provider.live_sandboxes(), 0);
    }
}
