use std::env;

use playground_error::PlaygroundError;

pub const OPENCODE_BASE_URL_ENV: &str = "OPENCODE_BASE_URL";
pub const OPENCODE_API_KEY_ENV: &str = "OPENCODE_API_KEY";
pub const DEFAULT_MODEL_ENV: &str = "DEFAULT_MODEL";
pub const OLLAMA_BASE_URL_ENV: &str = "OLLAMA_BASE_URL";
pub const OLLAMA_API_KEY_ENV: &str = "OLLAMA_API_KEY";
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

pub const DEFAULT_OPENCODE_BASE_URL: &str = "https://opencode.ai/zen/v1";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "https://ollama.com/api";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "glm-4.7-free";

/// Connection settings for an OpenAI-compatible chat-completion endpoint.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub default_model: String,
}

impl ChatConfig {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: trim_base_url(base_url.into()),
            api_key: api_key.filter(|key| is_real_key(key)),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// The OpenCode Zen endpoint used for the chat pages.
    pub fn opencode_from_env() -> Self {
        let mut config = Self::new(
            env_or(OPENCODE_BASE_URL_ENV, DEFAULT_OPENCODE_BASE_URL),
            read_env(OPENCODE_API_KEY_ENV),
        );
        if let Some(model) = read_env(DEFAULT_MODEL_ENV) {
            config.default_model = model;
        }
        config
    }

    /// The OpenAI endpoint used by the computer-use agent.
    pub fn openai_from_env() -> Self {
        let mut config = Self::new(
            env_or(OPENAI_BASE_URL_ENV, DEFAULT_OPENAI_BASE_URL),
            read_env(OPENAI_API_KEY_ENV),
        );
        config.default_model = "gpt-4o".to_string();
        config
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn require_api_key(&self, variable: &str) -> Result<&str, PlaygroundError> {
        self.api_key.as_deref().ok_or_else(|| {
            PlaygroundError::configuration(format!(
                "API key not configured; set {variable} in the environment"
            ))
        })
    }
}

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl OllamaConfig {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: trim_base_url(base_url.into()),
            api_key: api_key.filter(|key| is_real_key(key)),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            env_or(OLLAMA_BASE_URL_ENV, DEFAULT_OLLAMA_BASE_URL),
            read_env(OLLAMA_API_KEY_ENV),
        )
    }

    /// The hosted service needs a key; a self-hosted runner does not.
    pub fn requires_api_key(&self) -> bool {
        self.base_url.contains("ollama.com")
    }

    pub fn validate(&self) -> Result<(), PlaygroundError> {
        if self.requires_api_key() && self.api_key.is_none() {
            return Err(PlaygroundError::configuration(format!(
                "Ollama API key not configured; set {OLLAMA_API_KEY_ENV} in the environment"
            )));
        }
        Ok(())
    }
}

fn read_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    read_env(name).unwrap_or_else(|| default.to_string())
}

fn trim_base_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

/// Placeholder values copied from `.env.example` count as unset.
fn is_real_key(key: &str) -> bool {
    let key = key.trim();
    !key.is_empty() && !(key.starts_with("your-") && key.ends_with("-here"))
}
