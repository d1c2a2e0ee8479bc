//! In-memory sandbox provider for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::backend::{
    BackendError, CodeSandbox, CommandOutput, CreateSandboxOptions, SandboxProvider,
};

/// Argument that makes a fake sandbox fail the command at the transport level.
pub const FAULT_ARG: &str = "__fault__";

type CallLog = Arc<Mutex<Vec<(String, Vec<String>)>>>;

#[derive(Debug, Default)]
pub struct FakeProvider {
    created: AtomicUsize,
    stopped: Arc<AtomicUsize>,
    fail_create: AtomicBool,
    fail_stop: Arc<AtomicBool>,
    calls: CallLog,
    options: Mutex<Vec<CreateSandboxOptions>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// Number of successful provisioning calls.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn live_sandboxes(&self) -> usize {
        self.created() - self.stopped()
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn create_options(&self) -> Vec<CreateSandboxOptions> {
        self.options
            .lock()
            .map(|options| options.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SandboxProvider for FakeProvider {
    async fn create(
        &self,
        options: CreateSandboxOptions,
    ) -> Result<Box<dyn CodeSandbox>, BackendError> {
        if let Ok(mut recorded) = self.options.lock() {
            recorded.push(options);
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(BackendError::Allocation("quota exceeded".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSandbox {
            calls: self.calls.clone(),
            stopped: self.stopped.clone(),
            fail_stop: self.fail_stop.clone(),
        }))
    }
}

/// Echoes its command line on stdout. `exit <n>` exits with `n`.
struct FakeSandbox {
    calls: CallLog,
    stopped: Arc<AtomicUsize>,
    fail_stop: Arc<AtomicBool>,
}

#[async_trait]
impl CodeSandbox for FakeSandbox {
    async fn run_command(
        &self,
        command: &str,
        args: &[String],
    ) -> Result<CommandOutput, BackendError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((command.to_string(), args.to_vec()));
        }
        if args.iter().any(|arg| arg == FAULT_ARG) {
            return Err(BackendError::Command("connection reset".to_string()));
        }
        if command == "exit" {
            let code = args.first().and_then(|arg| arg.parse().ok()).unwrap_or(1);
            return Ok(CommandOutput {
                exit_code: code,
                stdout: String::new(),
                stderr: format!("exited with {code}"),
            });
        }
        let mut line = command.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        Ok(CommandOutput {
            exit_code: 0,
            stdout: format!("{line}\n"),
            stderr: String::new(),
        })
    }

    async fn stop(&self) -> Result<(), BackendError> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(BackendError::Command("already gone".to_string()));
        }
        Ok(())
    }
}
