//! Provider-agnostic error value and the normalizer that produces it.
//!
//! Every failure that reaches a caller, whether it came from a non-2xx response, a
//! broken connection or a preflight rejection, is expressed as one [`ClientError`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LLMError;

/// Code attached to failures that carry no provider or HTTP code.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Error taxonomy shared by every provider.
///
/// Unclassified failures keep the name of their failure class in
/// [`ErrorType::Other`], e.g. `DecodeError`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorType {
    /// Non-2xx provider response.
    Api,
    /// Preflight rejected the caller (HTTP 401 equivalent).
    Authentication,
    /// Provider throttled the request (HTTP 429 equivalent).
    RateLimit,
    /// Connection refused or dropped (HTTP 503 equivalent).
    Connection,
    /// Deadline elapsed (HTTP 504 equivalent).
    Timeout,
    /// Opaque internal failure.
    Internal,
    Other(String),
}

impl ErrorType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Api => "ApiError",
            Self::Authentication => "AuthenticationError",
            Self::RateLimit => "RateLimitError",
            Self::Connection => "ConnectionError",
            Self::Timeout => "TimeoutError",
            Self::Internal => "InternalError",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ErrorType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ApiError" => Self::Api,
            "AuthenticationError" => Self::Authentication,
            "RateLimitError" => Self::RateLimit,
            "ConnectionError" => Self::Connection,
            "TimeoutError" => Self::Timeout,
            "InternalError" => Self::Internal,
            _ => Self::Other(value),
        }
    }
}

impl From<ErrorType> for String {
    fn from(value: ErrorType) -> Self {
        match value {
            ErrorType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized error carried by [`crate::types::Output`] and
/// [`crate::types::OutputChunk`].
///
/// `code` is a provider-supplied identifier such as `context_length_exceeded`, a
/// synthesized `HTTP_<status>`, or [`INTERNAL_ERROR`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientError {
    /// Human-readable description, usually the raw provider body.
    #[serde(default)]
    pub message: String,
    /// Taxonomy tag.
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    #[serde(default = "internal_code")]
    pub code: String,
    /// Failure this error was built from, if any. Never serialized.
    #[serde(skip)]
    pub cause: Option<Arc<LLMError>>,
}

fn internal_code() -> String {
    INTERNAL_ERROR.to_string()
}

fn http_code(status: u16) -> String {
    format!("HTTP_{status}")
}

impl ClientError {
    pub fn new(message: impl Into<String>, error_type: ErrorType, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type,
            code: code.into(),
            cause: None,
        }
    }

    /// Builds the error for a non-2xx response.
    ///
    /// The provider code wins when present, otherwise `HTTP_<status>` is synthesized.
    /// Throttling responses (429) are tagged [`ErrorType::RateLimit`], everything else
    /// [`ErrorType::Api`].
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_gate::types::{ClientError, ErrorType};
    ///
    /// let err = ClientError::from_response(404, "Not Found", None);
    /// assert_eq!(err.code, "HTTP_404");
    /// assert_eq!(err.error_type, ErrorType::Api);
    ///
    /// let code = Some("context_length_exceeded".to_string());
    /// let err = ClientError::from_response(400, "too long", code);
    /// assert_eq!(err.code, "context_length_exceeded");
    /// ```
    pub fn from_response(
        status: u16,
        body: impl Into<String>,
        provider_code: Option<String>,
    ) -> Self {
        let error_type = if status == 429 {
            ErrorType::RateLimit
        } else {
            ErrorType::Api
        };
        Self::new(
            body,
            error_type,
            provider_code.unwrap_or_else(|| http_code(status)),
        )
    }

    /// Extracts the provider code from `body` and builds the response error.
    pub fn from_status(status: u16, body: &str) -> Self {
        Self::from_response(status, body, extract_error_code(body))
    }

    /// Standard error for callers rejected during preflight.
    pub fn unauthorized() -> Self {
        Self::new("Unauthorized access", ErrorType::Authentication, http_code(401))
    }

    /// HTTP status equivalent of this error.
    ///
    /// `HTTP_<n>` codes map back to `n`; other codes fall back to the taxonomy.
    pub fn status_code(&self) -> u16 {
        if let Some(status) = self
            .code
            .strip_prefix("HTTP_")
            .and_then(|value| value.parse::<u16>().ok())
        {
            return status;
        }
        match self.error_type {
            ErrorType::Authentication => 401,
            ErrorType::RateLimit => 429,
            ErrorType::Connection => 503,
            ErrorType::Timeout => 504,
            _ => 500,
        }
    }
}

impl PartialEq for ClientError {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
            && self.error_type == other.error_type
            && self.code == other.code
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.error_type, self.code, self.message)
    }
}

impl From<LLMError> for ClientError {
    fn from(err: LLMError) -> Self {
        let (error_type, code) = match err {
            LLMError::Rejected { output, .. } => {
                return output.error.unwrap_or_else(Self::unauthorized);
            }
            LLMError::Connection { .. } => (ErrorType::Connection, http_code(503)),
            LLMError::Timeout { .. } => (ErrorType::Timeout, http_code(504)),
            LLMError::RateLimit { .. } => (ErrorType::RateLimit, http_code(429)),
            ref other => (
                ErrorType::from(other.kind_name().to_string()),
                internal_code(),
            ),
        };
        Self {
            message: err.detail(),
            error_type,
            code,
            cause: Some(Arc::new(err)),
        }
    }
}

/// Pulls a provider error code out of an error body.
///
/// Looks at a top-level `code`, then `error.code` (OpenAI style), then `error.type`
/// (Anthropic style). Empty, non-JSON and non-object bodies yield `None`.
///
/// # Examples
///
/// ```
/// use llm_gate::types::extract_error_code;
///
/// let body = r#"{"error":{"type":"overloaded_error","message":"busy"}}"#;
/// assert_eq!(extract_error_code(body).as_deref(), Some("overloaded_error"));
/// assert_eq!(extract_error_code("Internal Server Error"), None);
/// ```
pub fn extract_error_code(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
        return None;
    };
    if let Some(Value::String(code)) = map.get("code") {
        return Some(code.clone());
    }
    let Some(Value::Object(error)) = map.get("error") else {
        return None;
    };
    ["code", "type"]
        .iter()
        .find_map(|key| match error.get(*key) {
            Some(Value::String(value)) => Some(value.clone()),
            _ => None,
        })
}
