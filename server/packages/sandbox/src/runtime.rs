use std::fmt;
use std::str::FromStr;

use playground_error::PlaygroundError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Execution environment of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, ToSchema)]
pub enum Runtime {
    #[serde(rename = "node24")]
    Node24,
    #[serde(rename = "node22")]
    Node22,
    #[serde(rename = "python3.13")]
    Python313,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFamily {
    Node,
    Python,
}

/// Interpreter call that evaluates a snippet of source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: &'static str,
    pub args: Vec<String>,
}

impl Runtime {
    pub const ALL: [Runtime; 3] = [Runtime::Node24, Runtime::Node22, Runtime::Python313];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node24 => "node24",
            Self::Node22 => "node22",
            Self::Python313 => "python3.13",
        }
    }

    pub fn family(&self) -> RuntimeFamily {
        match self {
            Self::Node24 | Self::Node22 => RuntimeFamily::Node,
            Self::Python313 => RuntimeFamily::Python,
        }
    }

    pub fn invocation(&self, code: &str) -> Invocation {
        match self.family() {
            RuntimeFamily::Node => Invocation {
                command: "node",
                args: vec!["-e".to_string(), code.to_string()],
            },
            RuntimeFamily::Python => Invocation {
                command: "python3",
                args: vec!["-c".to_string(), code.to_string()],
            },
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::Node24
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Runtime {
    type Err = PlaygroundError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|runtime| runtime.as_str() == value)
            .ok_or_else(|| PlaygroundError::configuration(format!("unsupported runtime: {value}")))
    }
}
