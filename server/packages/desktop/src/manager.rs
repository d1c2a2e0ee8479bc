use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use playground_error::PlaygroundError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use utoipa::ToSchema;

use crate::backend::{
    CreateDesktopOptions, DesktopError, DesktopProvider, DesktopSandbox, MouseButton, Position,
    TypingOptions,
};

/// Pause after launching an application so its window can appear.
pub const DEFAULT_LAUNCH_WAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_QUICK_START_APP: &str = "google-chrome";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesktopSandboxConfig {
    pub app: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<String>,
    #[serde(default = "default_require_auth")]
    pub require_auth: bool,
    #[serde(default)]
    pub view_only: bool,
}

fn default_require_auth() -> bool {
    true
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            window_id: None,
            require_auth: true,
            view_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DesktopSandboxInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_key: Option<String>,
    pub is_streaming: bool,
}

/// Registry of live desktops. Lookups of unknown ids fail with
/// [`PlaygroundError::SessionNotFound`].
pub struct DesktopSandboxManager {
    provider: Arc<dyn DesktopProvider>,
    launch_wait: Duration,
    sandboxes: Mutex<IndexMap<String, Arc<dyn DesktopSandbox>>>,
}

impl std::fmt::Debug for DesktopSandboxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DesktopSandboxManager")
            .field("launch_wait", &self.launch_wait)
            .finish_non_exhaustive()
    }
}

impl DesktopSandboxManager {
    pub fn new(provider: Arc<dyn DesktopProvider>) -> Self {
        Self {
            provider,
            launch_wait: DEFAULT_LAUNCH_WAIT,
            sandboxes: Mutex::new(IndexMap::new()),
        }
    }

    pub fn with_launch_wait(mut self, launch_wait: Duration) -> Self {
        self.launch_wait = launch_wait;
        self
    }

    pub async fn create_sandbox(
        &self,
        config: DesktopSandboxConfig,
    ) -> Result<DesktopSandboxInfo, PlaygroundError> {
        let desktop: Arc<dyn DesktopSandbox> = Arc::from(
            self.provider
                .create(CreateDesktopOptions {
                    timeout: config.timeout,
                })
                .await
                .map_err(remote)?,
        );
        let id = desktop.sandbox_id().to_string();
        self.sandboxes
            .lock()
            .await
            .insert(id.clone(), desktop.clone());
        tracing::info!(sandbox_id = %id, "desktop sandbox created");

        if let Some(app) = config.app.as_deref() {
            desktop.launch(app).await.map_err(remote)?;
            desktop.wait(self.launch_wait).await.map_err(remote)?;
        }

        Ok(DesktopSandboxInfo {
            id,
            stream_url: None,
            auth_key: None,
            is_streaming: false,
        })
    }

    /// Creates a desktop, launches `app` in it and starts streaming its window.
    pub async fn quick_start_desktop(
        &self,
        app: &str,
        require_auth: bool,
        view_only: bool,
    ) -> Result<DesktopSandboxInfo, PlaygroundError> {
        let created = self
            .create_sandbox(DesktopSandboxConfig {
                app: Some(app.to_string()),
                timeout: None,
            })
            .await?;
        self.start_stream(
            &created.id,
            StreamConfig {
                window_id: None,
                require_auth,
                view_only,
            },
        )
        .await
    }

    pub async fn start_stream(
        &self,
        sandbox_id: &str,
        config: StreamConfig,
    ) -> Result<DesktopSandboxInfo, PlaygroundError> {
        let desktop = self.sandbox(sandbox_id).await?;
        let window_id = match config.window_id {
            Some(window_id) => window_id,
            None => desktop.current_window_id().await.map_err(remote)?,
        };
        desktop
            .start_stream(&window_id, config.require_auth)
            .await
            .map_err(remote)?;
        let auth_key = desktop.stream_auth_key().map_err(remote)?;
        let stream_url = desktop
            .stream_url(auth_key.as_deref(), config.view_only)
            .map_err(remote)?;
        tracing::info!(sandbox_id = %sandbox_id, window_id = %window_id, "desktop stream started");

        Ok(DesktopSandboxInfo {
            id: sandbox_id.to_string(),
            stream_url: Some(stream_url),
            auth_key,
            is_streaming: true,
        })
    }

    pub async fn stop_stream(&self, sandbox_id: &str) -> Result<(), PlaygroundError> {
        let desktop = self.sandbox(sandbox_id).await?;
        desktop.stop_stream().await.map_err(remote)
    }

    pub async fn launch_app(&self, sandbox_id: &str, app: &str) -> Result<(), PlaygroundError> {
        let desktop = self.sandbox(sandbox_id).await?;
        desktop.launch(app).await.map_err(remote)?;
        desktop.wait(self.launch_wait).await.map_err(remote)
    }

    pub async fn open_file(&self, sandbox_id: &str, path: &str) -> Result<(), PlaygroundError> {
        self.sandbox(sandbox_id).await?.open(path).await.map_err(remote)
    }

    pub async fn execute_command(
        &self,
        sandbox_id: &str,
        command: &str,
    ) -> Result<String, PlaygroundError> {
        self.sandbox(sandbox_id)
            .await?
            .run_command(command)
            .await
            .map_err(remote)
    }

    pub async fn double_click(&self, sandbox_id: &str) -> Result<(), PlaygroundError> {
        self.sandbox(sandbox_id).await?.double_click().await.map_err(remote)
    }

    pub async fn left_click(
        &self,
        sandbox_id: &str,
        at: Option<Position>,
    ) -> Result<(), PlaygroundError> {
        self.sandbox(sandbox_id).await?.left_click(at).await.map_err(remote)
    }

    pub async fn right_click(
        &self,
        sandbox_id: &str,
        at: Option<Position>,
    ) -> Result<(), PlaygroundError> {
        self.sandbox(sandbox_id).await?.right_click(at).await.map_err(remote)
    }

    pub async fn middle_click(
        &self,
        sandbox_id: &str,
        at: Option<Position>,
    ) -> Result<(), PlaygroundError> {
        self.sandbox(sandbox_id).await?.middle_click(at).await.map_err(remote)
    }

    pub async fn scroll(&self, sandbox_id: &str, amount: i32) -> Result<(), PlaygroundError> {
        self.sandbox(sandbox_id).await?.scroll(amount).await.map_err(remote)
    }

    pub async fn move_mouse(&self, sandbox_id: &str, to: Position) -> Result<(), PlaygroundError> {
        self.sandbox(sandbox_id).await?.move_mouse(to).await.map_err(remote)
    }

    pub async fn drag(
        &self,
        sandbox_id: &str,
        from: Position,
        to: Position,
    ) -> Result<(), PlaygroundError> {
        self.sandbox(sandbox_id).await?.drag(from, to).await.map_err(remote)
    }

    pub async fn mouse_press(
        &self,
        sandbox_id: &str,
        button: MouseButton,
    ) -> Result<(), PlaygroundError> {
        self.sandbox(sandbox_id).await?.mouse_press(button).await.map_err(remote)
    }

    pub async fn mouse_release(
        &self,
        sandbox_id: &str,
        button: MouseButton,
    ) -> Result<(), PlaygroundError> {
        self.sandbox(sandbox_id)
            .await?
            .mouse_release(button)
            .await
            .map_err(remote)
    }

    pub async fn write(
        &self,
        sandbox_id: &str,
        text: &str,
        options: TypingOptions,
    ) -> Result<(), PlaygroundError> {
        self.sandbox(sandbox_id)
            .await?
            .write(text, options)
            .await
            .map_err(remote)
    }

    pub async fn press(&self, sandbox_id: &str, keys: &[String]) -> Result<(), PlaygroundError> {
        self.sandbox(sandbox_id).await?.press(keys).await.map_err(remote)
    }

    pub async fn current_window_id(&self, sandbox_id: &str) -> Result<String, PlaygroundError> {
        self.sandbox(sandbox_id)
            .await?
            .current_window_id()
            .await
            .map_err(remote)
    }

    pub async fn application_windows(
        &self,
        sandbox_id: &str,
        app: &str,
    ) -> Result<Vec<String>, PlaygroundError> {
        self.sandbox(sandbox_id)
            .await?
            .application_windows(app)
            .await
            .map_err(remote)
    }

    pub async fn window_title(
        &self,
        sandbox_id: &str,
        window_id: &str,
    ) -> Result<String, PlaygroundError> {
        self.sandbox(sandbox_id)
            .await?
            .window_title(window_id)
            .await
            .map_err(remote)
    }

    pub async fn screenshot(&self, sandbox_id: &str) -> Result<Vec<u8>, PlaygroundError> {
        self.sandbox(sandbox_id).await?.screenshot().await.map_err(remote)
    }

    pub async fn write_file(
        &self,
        sandbox_id: &str,
        path: &str,
        content: &str,
    ) -> Result<(), PlaygroundError> {
        self.sandbox(sandbox_id)
            .await?
            .write_file(path, content)
            .await
            .map_err(remote)
    }

    pub async fn read_file(&self, sandbox_id: &str, path: &str) -> Result<String, PlaygroundError> {
        self.sandbox(sandbox_id)
            .await?
            .read_file(path)
            .await
            .map_err(remote)
    }

    pub async fn wait(&self, sandbox_id: &str, duration: Duration) -> Result<(), PlaygroundError> {
        self.sandbox(sandbox_id).await?.wait(duration).await.map_err(remote)
    }

    /// Kills and forgets a desktop. Unknown ids are ignored.
    pub async fn kill_sandbox(&self, sandbox_id: &str) -> Result<(), PlaygroundError> {
        let removed = self.sandboxes.lock().await.shift_remove(sandbox_id);
        let Some(desktop) = removed else {
            return Ok(());
        };
        tracing::info!(sandbox_id = %sandbox_id, "killing desktop sandbox");
        desktop.kill().await.map_err(remote)
    }

    pub async fn list_sandboxes(&self) -> Vec<String> {
        self.sandboxes.lock().await.keys().cloned().collect()
    }

    async fn sandbox(&self, sandbox_id: &str) -> Result<Arc<dyn DesktopSandbox>, PlaygroundError> {
        self.sandboxes
            .lock()
            .await
            .get(sandbox_id)
            .cloned()
            .ok_or_else(|| PlaygroundError::session_not_found(sandbox_id))
    }
}

fn remote(err: DesktopError) -> PlaygroundError {
    match err {
        DesktopError::Allocation(message) => PlaygroundError::Provisioning { message },
        other => PlaygroundError::Api {
            status: None,
            message: other.to_string(),
        },
    }
}
