//! Drives a desktop sandbox from a vision chat model.
//!
//! Each step sends the instruction and a fresh screenshot, expects a JSON
//! plan back and replays its actions against the desktop. Steps repeat until
//! the model reports completion, the caller stops the agent, or the step
//! budget runs out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use playground_chat::config::OPENAI_API_KEY_ENV;
use playground_chat::types::ResponseFormat;
use playground_chat::{
    ChatClient, ChatCompletionRequest, ChatCompletions, ChatConfig, CompletionMessage,
    ContentPart, MessageContent, Role,
};
use playground_error::PlaygroundError;
use serde::{Deserialize, Serialize};

use crate::backend::{Position, TypingOptions};
use crate::manager::DesktopSandboxManager;

pub const DEFAULT_AGENT_MODEL: &str = "gpt-4o";
pub const DEFAULT_MAX_ITERATIONS: usize = 10;
pub const CONTINUE_INSTRUCTION: &str = "Continue from where you left off";

const AGENT_SYSTEM_PROMPT: &str = r#"You are a Computer Use Agent that can interact with a virtual desktop environment.

You have access to the following actions:
1. click - Click at specific coordinates (x, y)
2. type - Type text at the current cursor position
3. keypress - Press keyboard keys (e.g., ['enter'], ['ctrl', 'c'], ['alt', 'f4'])
4. scroll - Scroll up or down (positive = up, negative = down)
5. wait - Wait for a specified duration in milliseconds
6. screenshot - Take a screenshot to see the current state
7. launch - Launch an application by name (e.g., 'google-chrome', 'vscode', 'firefox')

When given an instruction, you should:
1. Analyze the current screenshot
2. Think step-by-step about what needs to be done
3. Provide clear reasoning for your actions
4. Execute actions one at a time
5. Wait for applications to load before interacting
6. Take screenshots after important actions to verify state

Respond in JSON format with the following structure:
{
  "reasoning": "Your detailed reasoning about what to do",
  "actions": [
    {"type": "click", "x": 100, "y": 200},
    {"type": "type", "text": "Hello World"},
    {"type": "keypress", "keys": ["enter"]},
    {"type": "wait", "duration": 2000}
  ],
  "isComplete": false
}

Set isComplete to true when the task is finished."#;

pub const EXAMPLE_PROMPTS: &[&str] = &[
    "Open Chrome and search for \"TypeScript tutorials\"",
    "Open VS Code and create a new file called \"hello.txt\"",
    "Take a screenshot of the current desktop",
    "Open the terminal and run \"ls -la\"",
    "Open Firefox and navigate to github.com",
    "Create a folder called \"Projects\" on the desktop",
    "Type \"Hello World\" in the currently focused text field",
    "Close the currently open window",
];

const TYPING: TypingOptions = TypingOptions {
    chunk_size: Some(50),
    delay_in_ms: Some(25),
};
const SCREENSHOT_SETTLE: Duration = Duration::from_millis(500);
const LAUNCH_SETTLE: Duration = Duration::from_millis(5000);

/// One step of a plan. Unrecognised action types are kept as `Unknown` and
/// skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ComputerAction {
    Click {
        #[serde(default)]
        x: Option<i32>,
        #[serde(default)]
        y: Option<i32>,
    },
    Type {
        #[serde(default)]
        text: Option<String>,
    },
    Keypress {
        #[serde(default)]
        keys: Vec<String>,
    },
    Scroll {
        #[serde(default)]
        amount: Option<i32>,
    },
    Wait {
        /// Milliseconds.
        #[serde(default)]
        duration: Option<u64>,
    },
    Screenshot,
    Launch {
        #[serde(default)]
        app: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPlan {
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub actions: Vec<ComputerAction>,
    #[serde(default)]
    pub is_complete: bool,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    Completed,
    Stopped,
    IterationLimit,
    Failed(String),
}

/// Progress callbacks. All methods default to doing nothing.
pub trait AgentObserver: Send + Sync {
    fn on_message(&self, _message: &str) {}
    fn on_action(&self, _action: &ComputerAction) {}
    fn on_complete(&self) {}
}

/// Observer that forwards progress to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl AgentObserver for LogObserver {
    fn on_message(&self, message: &str) {
        tracing::info!(message = %message, "agent message");
    }

    fn on_action(&self, action: &ComputerAction) {
        tracing::info!(action = ?action, "agent action");
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub max_iterations: usize,
    pub max_tokens: u32,
    /// Pause after every action except `wait`.
    pub action_pause: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_AGENT_MODEL.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: 2000,
            action_pause: Duration::from_millis(500),
        }
    }
}

pub struct ComputerUseAgent {
    chat: Arc<dyn ChatCompletions>,
    desktop: Arc<DesktopSandboxManager>,
    config: AgentConfig,
    sandbox_id: Mutex<Option<String>>,
    running: AtomicBool,
}

impl ComputerUseAgent {
    pub fn new(
        chat: Arc<dyn ChatCompletions>,
        desktop: Arc<DesktopSandboxManager>,
        config: AgentConfig,
    ) -> Self {
        Self {
            chat,
            desktop,
            config,
            sandbox_id: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Builds an agent backed by the OpenAI endpoint from the environment.
    pub fn from_env(
        desktop: Arc<DesktopSandboxManager>,
        config: AgentConfig,
    ) -> Result<Self, PlaygroundError> {
        let chat_config = ChatConfig::openai_from_env();
        chat_config.require_api_key(OPENAI_API_KEY_ENV)?;
        let client = ChatClient::new(chat_config, OPENAI_API_KEY_ENV);
        Ok(Self::new(Arc::new(client), desktop, config))
    }

    pub fn initialize(&self, sandbox_id: impl Into<String>) {
        if let Ok(mut current) = self.sandbox_id.lock() {
            *current = Some(sandbox_id.into());
        }
        self.running.store(true, Ordering::SeqCst);
    }

    /// Requests cancellation; the run ends before its next action.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn sandbox_id(&self) -> Option<String> {
        self.sandbox_id.lock().ok().and_then(|current| current.clone())
    }

    /// Works on `instruction` until the model reports completion. Failures
    /// after start-up are reported to the observer and end the run.
    pub async fn process_instruction(
        &self,
        instruction: &str,
        observer: &dyn AgentObserver,
    ) -> Result<AgentOutcome, PlaygroundError> {
        let sandbox_id = match self.sandbox_id() {
            Some(id) if self.is_active() => id,
            _ => {
                return Err(PlaygroundError::InvalidRequest {
                    message: "agent not initialized".to_string(),
                })
            }
        };

        let outcome = match self.run(&sandbox_id, instruction, observer).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(sandbox_id = %sandbox_id, error = %err, "computer-use agent failed");
                observer.on_message(&format!("Error: {err}"));
                AgentOutcome::Failed(err.to_string())
            }
        };
        if outcome == AgentOutcome::IterationLimit {
            observer.on_message(&format!(
                "Stopped after {} steps without finishing the task.",
                self.config.max_iterations
            ));
        }
        observer.on_complete();
        Ok(outcome)
    }

    async fn run(
        &self,
        sandbox_id: &str,
        instruction: &str,
        observer: &dyn AgentObserver,
    ) -> Result<AgentOutcome, PlaygroundError> {
        let mut instruction = instruction.to_string();
        for iteration in 0..self.config.max_iterations {
            if !self.is_active() {
                return Ok(AgentOutcome::Stopped);
            }
            tracing::debug!(sandbox_id = %sandbox_id, iteration, "agent step");

            let plan = self.plan(sandbox_id, &instruction).await?;
            observer.on_message(&plan.reasoning);

            for action in &plan.actions {
                if !self.is_active() {
                    return Ok(AgentOutcome::Stopped);
                }
                observer.on_action(action);
                self.execute(sandbox_id, action).await?;
                if !matches!(action, ComputerAction::Wait { .. })
                    && !self.config.action_pause.is_zero()
                {
                    tokio::time::sleep(self.config.action_pause).await;
                }
            }

            if plan.is_complete {
                return Ok(AgentOutcome::Completed);
            }
            observer.on_message("Taking another screenshot to continue...");
            instruction = CONTINUE_INSTRUCTION.to_string();
        }
        Ok(AgentOutcome::IterationLimit)
    }

    async fn plan(&self, sandbox_id: &str, instruction: &str) -> Result<AgentPlan, PlaygroundError> {
        let screenshot = self.desktop.screenshot(sandbox_id).await?;
        let encoded = STANDARD.encode(screenshot);

        let mut request = ChatCompletionRequest::new(
            self.config.model.clone(),
            vec![
                CompletionMessage {
                    role: Role::System,
                    content: MessageContent::Text(AGENT_SYSTEM_PROMPT.to_string()),
                },
                CompletionMessage {
                    role: Role::User,
                    content: MessageContent::Parts(vec![
                        ContentPart::text(format!(
                            "Instruction: {instruction}\n\nCurrent screenshot is provided. Analyze it and take appropriate actions."
                        )),
                        ContentPart::png_base64(&encoded),
                    ]),
                },
            ],
        );
        request.response_format = Some(ResponseFormat::json_object());
        request.max_tokens = Some(self.config.max_tokens);

        let response = self.chat.create_chat_completion(request).await?;
        let content = response
            .first_text()
            .filter(|text| !text.is_empty())
            .ok_or_else(|| PlaygroundError::Api {
                status: None,
                message: "model returned no content".to_string(),
            })?;
        serde_json::from_str(&content).map_err(|err| PlaygroundError::Api {
            status: None,
            message: format!("model returned an invalid plan: {err}"),
        })
    }

    async fn execute(&self, sandbox_id: &str, action: &ComputerAction) -> Result<(), PlaygroundError> {
        let desktop = &self.desktop;
        match action {
            ComputerAction::Click {
                x: Some(x),
                y: Some(y),
            } => desktop.left_click(sandbox_id, Some(Position::new(*x, *y))).await,
            ComputerAction::Type { text: Some(text) } if !text.is_empty() => {
                desktop.write(sandbox_id, text, TYPING).await
            }
            ComputerAction::Keypress { keys } if !keys.is_empty() => {
                desktop.press(sandbox_id, keys).await
            }
            ComputerAction::Scroll {
                amount: Some(amount),
            } => desktop.scroll(sandbox_id, *amount).await,
            ComputerAction::Wait {
                duration: Some(ms),
            } if *ms > 0 => desktop.wait(sandbox_id, Duration::from_millis(*ms)).await,
            ComputerAction::Screenshot => desktop.wait(sandbox_id, SCREENSHOT_SETTLE).await,
            ComputerAction::Launch { app: Some(app) } if !app.is_empty() => {
                desktop.launch_app(sandbox_id, app).await?;
                desktop.wait(sandbox_id, LAUNCH_SETTLE).await
            }
            ComputerAction::Unknown => {
                tracing::warn!("skipping unknown agent action");
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_parses_known_and_unknown_actions() {
        let plan: AgentPlan = serde_json::from_str(
            r#"{
                "reasoning": "open the browser",
                "actions": [
                    {"type": "click", "x": 100, "y": 200, "reasoning": "focus"},
                    {"type": "keypress", "keys": ["ctrl", "l"]},
                    {"type": "screenshot"},
                    {"type": "teleport", "where": "mars"}
                ],
                "isComplete": true
            }"#,
        )
        .unwrap();
        assert!(plan.is_complete);
        assert_eq!(
            plan.actions,
            vec![
                ComputerAction::Click {
                    x: Some(100),
                    y: Some(200)
                },
                ComputerAction::Keypress {
                    keys: vec!["ctrl".to_string(), "l".to_string()]
                },
                ComputerAction::Screenshot,
                ComputerAction::Unknown,
            ]
        );
    }

    #[test]
    fn missing_fields_default() {
        let plan: AgentPlan = serde_json::from_str(r#"{"reasoning": "thinking"}"#).unwrap();
        assert!(plan.actions.is_empty());
        assert!(!plan.is_complete);
    }
}
