use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Configuration,
    SessionNotFound,
    Provisioning,
    Api,
    StreamError,
    InvalidRequest,
}

impl ErrorType {
    pub fn as_urn(&self) -> &'static str {
        match self {
            Self::Configuration => "urn:playground:error:configuration",
            Self::SessionNotFound => "urn:playground:error:session_not_found",
            Self::Provisioning => "urn:playground:error:provisioning",
            Self::Api => "urn:playground:error:api",
            Self::StreamError => "urn:playground:error:stream_error",
            Self::InvalidRequest => "urn:playground:error:invalid_request",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Configuration => "Configuration Error",
            Self::SessionNotFound => "Session Not Found",
            Self::Provisioning => "Provisioning Failed",
            Self::Api => "Upstream API Error",
            Self::StreamError => "Stream Error",
            Self::InvalidRequest => "Invalid Request",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Configuration => 500,
            Self::SessionNotFound => 404,
            Self::Provisioning => 503,
            Self::Api => 502,
            Self::StreamError => 502,
            Self::InvalidRequest => 400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ProblemDetails {
    pub fn new(error_type: ErrorType, detail: Option<String>) -> Self {
        Self {
            type_: error_type.as_urn().to_string(),
            title: error_type.title().to_string(),
            status: error_type.status_code(),
            detail,
            instance: None,
            extensions: Map::new(),
        }
    }
}

/// Infrastructure-level failures. Failures of the program under test are
/// never represented here; the sandbox registry returns them as
/// `ExecutionResult`s with a nonzero exit code.
#[derive(Debug, Error)]
pub enum PlaygroundError {
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },
    #[error("provisioning failed: {message}")]
    Provisioning { message: String },
    #[error("api error: {message}")]
    Api {
        status: Option<u16>,
        message: String,
    },
    #[error("stream error: {message}")]
    Stream { message: String },
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl PlaygroundError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::Configuration { .. } => ErrorType::Configuration,
            Self::SessionNotFound { .. } => ErrorType::SessionNotFound,
            Self::Provisioning { .. } => ErrorType::Provisioning,
            Self::Api { .. } => ErrorType::Api,
            Self::Stream { .. } => ErrorType::StreamError,
            Self::InvalidRequest { .. } => ErrorType::InvalidRequest,
        }
    }

    /// HTTP status reported by the upstream service, when there was one.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => *status,
            _ => None,
        }
    }

    pub fn to_problem_details(&self) -> ProblemDetails {
        let mut problem = ProblemDetails::new(self.error_type(), Some(self.to_string()));

        let mut extensions = Map::new();
        match self {
            Self::SessionNotFound { session_id } => {
                extensions.insert("sessionId".to_string(), Value::String(session_id.clone()));
            }
            Self::Api {
                status: Some(status),
                ..
            } => {
                extensions.insert(
                    "upstreamStatus".to_string(),
                    Value::Number(serde_json::Number::from(*status)),
                );
            }
            _ => {}
        }
        problem.extensions = extensions;
        problem
    }
}

impl From<PlaygroundError> for ProblemDetails {
    fn from(value: PlaygroundError) -> Self {
        value.to_problem_details()
    }
}

impl From<&PlaygroundError> for ProblemDetails {
    fn from(value: &PlaygroundError) -> Self {
        value.to_problem_details()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_not_found_carries_id_extension() {
        let problem = PlaygroundError::session_not_found("sandbox-1").to_problem_details();
        assert_eq!(problem.status, 404);
        assert_eq!(problem.type_, "urn:playground:error:session_not_found");
        assert_eq!(problem.extensions["sessionId"], "sandbox-1");
    }

    #[test]
    fn api_error_reports_upstream_status() {
        let err = PlaygroundError::Api {
            status: Some(429),
            message: "rate limited".to_string(),
        };
        assert_eq!(err.upstream_status(), Some(429));
        let problem = ProblemDetails::from(&err);
        assert_eq!(problem.status, 502);
        assert_eq!(problem.extensions["upstreamStatus"], 429);
        assert_eq!(problem.detail.as_deref(), Some("api error: rate limited"));
    }

    #[test]
    fn problem_details_omit_empty_extensions() {
        let problem = PlaygroundError::configuration("missing key").to_problem_details();
        let value = serde_json::to_value(&problem).unwrap();
        assert_eq!(value["type"], "urn:playground:error:configuration");
        assert!(value.get("instance").is_none());
        assert_eq!(value.as_object().unwrap().len(), 4);
    }
}
