//! Typed adapter over a remote desktop sandbox service.

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error)]
pub enum DesktopError {
    #[error("desktop allocation failed: {0}")]
    Allocation(String),
    #[error("desktop call failed: {0}")]
    Call(String),
    #[error("stream is not running")]
    StreamNotStarted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateDesktopOptions {
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TypingOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_in_ms: Option<u64>,
}

#[async_trait]
pub trait DesktopProvider: Send + Sync {
    async fn create(
        &self,
        options: CreateDesktopOptions,
    ) -> Result<Box<dyn DesktopSandbox>, DesktopError>;
}

/// One remote desktop. Every call is forwarded to the service as is.
#[async_trait]
pub trait DesktopSandbox: Send + Sync {
    /// Identifier assigned by the service.
    fn sandbox_id(&self) -> &str;

    async fn launch(&self, app: &str) -> Result<(), DesktopError>;
    async fn open(&self, path: &str) -> Result<(), DesktopError>;
    /// Runs a shell command and returns its stdout.
    async fn run_command(&self, command: &str) -> Result<String, DesktopError>;
    async fn wait(&self, duration: Duration) -> Result<(), DesktopError>;

    async fn double_click(&self) -> Result<(), DesktopError>;
    async fn left_click(&self, at: Option<Position>) -> Result<(), DesktopError>;
    async fn right_click(&self, at: Option<Position>) -> Result<(), DesktopError>;
    async fn middle_click(&self, at: Option<Position>) -> Result<(), DesktopError>;
    async fn scroll(&self, amount: i32) -> Result<(), DesktopError>;
    async fn move_mouse(&self, to: Position) -> Result<(), DesktopError>;
    async fn drag(&self, from: Position, to: Position) -> Result<(), DesktopError>;
    async fn mouse_press(&self, button: MouseButton) -> Result<(), DesktopError>;
    async fn mouse_release(&self, button: MouseButton) -> Result<(), DesktopError>;

    async fn write(&self, text: &str, options: TypingOptions) -> Result<(), DesktopError>;
    async fn press(&self, keys: &[String]) -> Result<(), DesktopError>;

    async fn current_window_id(&self) -> Result<String, DesktopError>;
    async fn application_windows(&self, app: &str) -> Result<Vec<String>, DesktopError>;
    async fn window_title(&self, window_id: &str) -> Result<String, DesktopError>;

    /// PNG-encoded capture of the screen.
    async fn screenshot(&self) -> Result<Vec<u8>, DesktopError>;
    async fn write_file(&self, path: &str, content: &str) -> Result<(), DesktopError>;
    async fn read_file(&self, path: &str) -> Result<String, DesktopError>;

    async fn start_stream(&self, window_id: &str, require_auth: bool)
        -> Result<(), DesktopError>;
    async fn stop_stream(&self) -> Result<(), DesktopError>;
    fn stream_auth_key(&self) -> Result<Option<String>, DesktopError>;
    fn stream_url(&self, auth_key: Option<&str>, view_only: bool) -> Result<String, DesktopError>;

    async fn kill(&self) -> Result<(), DesktopError>;
}
