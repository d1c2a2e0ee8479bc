//! Sandbox provider backed by local child processes, one scratch directory
//! per sandbox. Useful for development when no hosted service is configured.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::backend::{
    BackendError, CodeSandbox, CommandOutput, CreateSandboxOptions, SandboxProvider,
};
use crate::runtime::Runtime;

#[derive(Debug, Clone, Default)]
pub struct LocalProcessProvider {
    /// Parent for scratch directories; the system temp dir when unset.
    root: Option<PathBuf>,
}

impl LocalProcessProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

#[async_trait]
impl SandboxProvider for LocalProcessProvider {
    async fn create(
        &self,
        options: CreateSandboxOptions,
    ) -> Result<Box<dyn CodeSandbox>, BackendError> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("playground-sandbox-");
            builder
        };
        let workdir = match &self.root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|err| BackendError::Allocation(format!("scratch directory: {err}")))?;

        tracing::debug!(
            runtime = %options.runtime,
            workdir = %workdir.path().display(),
            "local sandbox created"
        );
        Ok(Box::new(LocalSandbox {
            runtime: options.runtime,
            timeout: options.timeout,
            workdir: Mutex::new(Some(workdir)),
        }))
    }
}

#[derive(Debug)]
pub struct LocalSandbox {
    runtime: Runtime,
    timeout: Option<Duration>,
    workdir: Mutex<Option<TempDir>>,
}

impl LocalSandbox {
    pub fn runtime(&self) -> Runtime {
        self.runtime
    }
}

#[async_trait]
impl CodeSandbox for LocalSandbox {
    async fn run_command(
        &self,
        command: &str,
        args: &[String],
    ) -> Result<CommandOutput, BackendError> {
        let cwd = {
            let guard = self.workdir.lock().await;
            match guard.as_ref() {
                Some(dir) => dir.path().to_path_buf(),
                None => return Err(BackendError::Command("sandbox is stopped".to_string())),
            }
        };

        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn()?;
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| BackendError::Timeout(limit))??,
            None => child.wait_with_output().await?,
        };

        Ok(CommandOutput {
            // Killed by a signal: no exit code.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn stop(&self) -> Result<(), BackendError> {
        if let Some(dir) = self.workdir.lock().await.take() {
            dir.close()?;
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    async fn sandbox(timeout: Option<Duration>) -> (TempDir, Box<dyn CodeSandbox>) {
        let root = TempDir::new().expect("root");
        let provider = LocalProcessProvider::with_root(root.path());
        let sandbox = provider
            .create(CreateSandboxOptions {
                runtime: Runtime::Node24,
                timeout,
            })
            .await
            .expect("create");
        (root, sandbox)
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let (_root, sandbox) = sandbox(None).await;
        let output = sandbox
            .run_command("sh", &["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()])
            .await
            .expect("run");
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn runs_inside_scratch_directory() {
        let (root, sandbox) = sandbox(None).await;
        let output = sandbox.run_command("pwd", &[]).await.expect("run");
        let canonical_root = root.path().canonicalize().expect("canonical");
        let cwd = PathBuf::from(output.stdout.trim()).canonicalize().expect("cwd");
        assert!(cwd.starts_with(&canonical_root), "{cwd:?}");
    }

    #[tokio::test]
    async fn stop_removes_scratch_directory() {
        let (root, sandbox) = sandbox(None).await;
        sandbox.stop().await.expect("stop");
        assert_eq!(std::fs::read_dir(root.path()).expect("read").count(), 0);
        assert!(sandbox.run_command("true", &[]).await.is_err());
        sandbox.stop().await.expect("second stop");
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let (_root, sandbox) = sandbox(Some(Duration::from_millis(100))).await;
        let err = sandbox
            .run_command("sleep", &["5".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_io_error() {
        let (_root, sandbox) = sandbox(None).await;
        let err = sandbox
            .run_command("definitely-not-a-real-binary", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Io(_)));
    }
}
