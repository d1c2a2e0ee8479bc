//! In-memory desktop provider for tests.
//!
//! Input and stream calls are recorded per sandbox; queries and file access
//! are answered from local state and not recorded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{
    CreateDesktopOptions, DesktopError, DesktopProvider, DesktopSandbox, MouseButton, Position,
    TypingOptions,
};

pub const FAKE_SCREENSHOT: &[u8] = b"\x89PNG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesktopCall {
    Launch(String),
    Open(String),
    Wait(Duration),
    DoubleClick,
    LeftClick(Option<Position>),
    RightClick(Option<Position>),
    MiddleClick(Option<Position>),
    Scroll(i32),
    MoveMouse(Position),
    Drag { from: Position, to: Position },
    MousePress(MouseButton),
    MouseRelease(MouseButton),
    Write { text: String, options: TypingOptions },
    Press(Vec<String>),
    StartStream { window_id: String, require_auth: bool },
    StopStream,
}

type CallLog = Arc<Mutex<HashMap<String, Vec<DesktopCall>>>>;

#[derive(Debug, Default)]
pub struct FakeDesktopProvider {
    next_id: AtomicUsize,
    fail_create: AtomicBool,
    killed: Arc<AtomicUsize>,
    calls: CallLog,
    timeouts: Mutex<Vec<Option<Duration>>>,
}

impl FakeDesktopProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self, sandbox_id: &str) -> Vec<DesktopCall> {
        self.calls
            .lock()
            .ok()
            .and_then(|calls| calls.get(sandbox_id).cloned())
            .unwrap_or_default()
    }

    pub fn killed(&self) -> usize {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn create_timeouts(&self) -> Vec<Option<Duration>> {
        self.timeouts
            .lock()
            .map(|timeouts| timeouts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DesktopProvider for FakeDesktopProvider {
    async fn create(
        &self,
        options: CreateDesktopOptions,
    ) -> Result<Box<dyn DesktopSandbox>, DesktopError> {
        if let Ok(mut timeouts) = self.timeouts.lock() {
            timeouts.push(options.timeout);
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(DesktopError::Allocation("no capacity".to_string()));
        }
        let id = format!("desk-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        Ok(Box::new(FakeDesktop {
            id,
            calls: self.calls.clone(),
            killed: self.killed.clone(),
            files: Mutex::new(HashMap::new()),
            streaming: AtomicBool::new(false),
        }))
    }
}

struct FakeDesktop {
    id: String,
    calls: CallLog,
    killed: Arc<AtomicUsize>,
    files: Mutex<HashMap<String, String>>,
    streaming: AtomicBool,
}

impl FakeDesktop {
    fn record(&self, call: DesktopCall) -> Result<(), DesktopError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.entry(self.id.clone()).or_default().push(call);
        }
        Ok(())
    }
}

#[async_trait]
impl DesktopSandbox for FakeDesktop {
    fn sandbox_id(&self) -> &str {
        &self.id
    }

    async fn launch(&self, app: &str) -> Result<(), DesktopError> {
        self.record(DesktopCall::Launch(app.to_string()))
    }

    async fn open(&self, path: &str) -> Result<(), DesktopError> {
        self.record(DesktopCall::Open(path.to_string()))
    }

    async fn run_command(&self, command: &str) -> Result<String, DesktopError> {
        Ok(format!("{command}\n"))
    }

    async fn wait(&self, duration: Duration) -> Result<(), DesktopError> {
        self.record(DesktopCall::Wait(duration))
    }

    async fn double_click(&self) -> Result<(), DesktopError> {
        self.record(DesktopCall::DoubleClick)
    }

    async fn left_click(&self, at: Option<Position>) -> Result<(), DesktopError> {
        self.record(DesktopCall::LeftClick(at))
    }

    async fn right_click(&self, at: Option<Position>) -> Result<(), DesktopError> {
        self.record(DesktopCall::RightClick(at))
    }

    async fn middle_click(&self, at: Option<Position>) -> Result<(), DesktopError> {
        self.record(DesktopCall::MiddleClick(at))
    }

    async fn scroll(&self, amount: i32) -> Result<(), DesktopError> {
        self.record(DesktopCall::Scroll(amount))
    }

    async fn move_mouse(&self, to: Position) -> Result<(), DesktopError> {
        self.record(DesktopCall::MoveMouse(to))
    }

    async fn drag(&self, from: Position, to: Position) -> Result<(), DesktopError> {
        self.record(DesktopCall::Drag { from, to })
    }

    async fn mouse_press(&self, button: MouseButton) -> Result<(), DesktopError> {
        self.record(DesktopCall::MousePress(button))
    }

    async fn mouse_release(&self, button: MouseButton) -> Result<(), DesktopError> {
        self.record(DesktopCall::MouseRelease(button))
    }

    async fn write(&self, text: &str, options: TypingOptions) -> Result<(), DesktopError> {
        self.record(DesktopCall::Write {
            text: text.to_string(),
            options,
        })
    }

    async fn press(&self, keys: &[String]) -> Result<(), DesktopError> {
        self.record(DesktopCall::Press(keys.to_vec()))
    }

    async fn current_window_id(&self) -> Result<String, DesktopError> {
        Ok("window-1".to_string())
    }

    async fn application_windows(&self, app: &str) -> Result<Vec<String>, DesktopError> {
        Ok(vec![format!("{app}-window-1")])
    }

    async fn window_title(&self, window_id: &str) -> Result<String, DesktopError> {
        Ok(format!("Title of {window_id}"))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DesktopError> {
        Ok(FAKE_SCREENSHOT.to_vec())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), DesktopError> {
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.to_string(), content.to_string());
        }
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String, DesktopError> {
        self.files
            .lock()
            .ok()
            .and_then(|files| files.get(path).cloned())
            .ok_or_else(|| DesktopError::Call(format!("no such file: {path}")))
    }

    async fn start_stream(&self, window_id: &str, require_auth: bool) -> Result<(), DesktopError> {
        self.streaming.store(true, Ordering::SeqCst);
        self.record(DesktopCall::StartStream {
            window_id: window_id.to_string(),
            require_auth,
        })
    }

    async fn stop_stream(&self) -> Result<(), DesktopError> {
        if !self.streaming.swap(false, Ordering::SeqCst) {
            return Err(DesktopError::StreamNotStarted);
        }
        self.record(DesktopCall::StopStream)
    }

    fn stream_auth_key(&self) -> Result<Option<String>, DesktopError> {
        if !self.streaming.load(Ordering::SeqCst) {
            return Err(DesktopError::StreamNotStarted);
        }
        Ok(Some("auth-key".to_string()))
    }

    fn stream_url(&self, auth_key: Option<&str>, view_only: bool) -> Result<String, DesktopError> {
        let base = format!("https://stream.test/{}", self.id);
        Ok(match auth_key {
            Some(key) => format!("{base}?auth={key}&view_only={view_only}"),
            None => format!("{base}?view_only={view_only}"),
        })
    }

    async fn kill(&self) -> Result<(), DesktopError> {
        self.killed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
