//! Narrow interface over a code-execution sandbox service.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::runtime::Runtime;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("sandbox allocation failed: {0}")]
    Allocation(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateSandboxOptions {
    pub runtime: Runtime,
    /// Handed to the service unchanged; nothing above this layer enforces it.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(
        &self,
        options: CreateSandboxOptions,
    ) -> Result<Box<dyn CodeSandbox>, BackendError>;
}

#[async_trait]
pub trait CodeSandbox: Send + Sync {
    async fn run_command(&self, command: &str, args: &[String])
        -> Result<CommandOutput, BackendError>;

    /// Releases the remote sandbox. Services that expire sandboxes on their
    /// own can leave this as a no-op.
    async fn stop(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
