use thiserror::Error;

use crate::types::Output;

/// Aggregates every failure mode raised inside the request pipeline.
///
/// Only [`LLMError::InvalidConfig`] is ever handed back to callers as an `Err`.
/// Every other variant is folded into an error-shaped [`Output`] or terminal stream
/// unit by the normalizer in [`crate::types::ClientError`].
#[derive(Debug, Error)]
pub enum LLMError {
    /// Represents transport-layer failures that do not fit a narrower class.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// The remote endpoint refused or dropped the connection.
    #[error("connection error: {message}")]
    Connection { message: String },
    /// The exchange did not complete within the configured deadline.
    #[error("timeout: {message}")]
    Timeout { message: String },
    /// Indicates that the provider or transport throttled the request.
    #[error("rate limited: {message}")]
    RateLimit { message: String },
    /// A payload could not be decoded as UTF-8 or JSON.
    #[error("decode error: {message}")]
    Decode { message: String },
    /// Signals validation failures while building the request payload.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Raised when the client is wired incorrectly. This is a programming error and is
    /// never recovered into a terminal value.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the configuration field that failed validation.
        field: String,
        /// Additional context explaining why the field is invalid.
        reason: String,
    },
    /// Preflight rejection raised while the request input was being prepared.
    ///
    /// The carried [`Output`] is delivered to the caller unchanged.
    #[error("preflight rejected: {message}")]
    Rejected {
        /// Failure reason copied from the output for display.
        message: String,
        /// Error-shaped output describing the rejection.
        output: Box<Output>,
    },
    /// Signals that a streaming channel closed before delivering a terminal marker.
    #[error("stream closed unexpectedly: {message}")]
    StreamClosed { message: String },
    /// Catches opaque or unexpected failures.
    #[error("unknown error: {message}")]
    Unknown { message: String },
}

impl LLMError {
    /// Creates an [`LLMError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_gate::error::LLMError;
    ///
    /// let err = LLMError::transport("dns lookup failed");
    /// assert!(matches!(err, LLMError::Transport { .. }));
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Decode`] from a textual description.
    pub fn decode<T: Into<String>>(message: T) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::InvalidConfig`] for the named field.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Wraps an error-shaped [`Output`] as a preflight rejection.
    ///
    /// Input producers return this to stop a request before it reaches the network
    /// while still choosing the exact status and error the caller will observe.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_gate::error::LLMError;
    /// use llm_gate::types::Output;
    ///
    /// let err = LLMError::rejected(Output::for_error_401());
    /// assert_eq!(err.to_string(), "preflight rejected: Unauthorized access");
    /// ```
    pub fn rejected(output: Output) -> Self {
        let message = output
            .failure_reason()
            .unwrap_or("request rejected")
            .to_string();
        Self::Rejected {
            message,
            output: Box::new(output),
        }
    }

    /// Stable name of the failure class, used as the error type of unclassified
    /// failures once normalized.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "TransportError",
            Self::Connection { .. } => "ConnectionError",
            Self::Timeout { .. } => "TimeoutError",
            Self::RateLimit { .. } => "RateLimitError",
            Self::Decode { .. } => "DecodeError",
            Self::Validation { .. } => "ValidationError",
            Self::InvalidConfig { .. } => "ConfigurationError",
            Self::Rejected { .. } => "PreflightRejection",
            Self::StreamClosed { .. } => "StreamClosedError",
            Self::Unknown { .. } => "InternalError",
        }
    }

    /// Message without the display prefix.
    pub(crate) fn detail(&self) -> String {
        match self {
            Self::Transport { message }
            | Self::Connection { message }
            | Self::Timeout { message }
            | Self::RateLimit { message }
            | Self::Decode { message }
            | Self::Validation { message }
            | Self::Rejected { message, .. }
            | Self::StreamClosed { message }
            | Self::Unknown { message } => message.clone(),
            Self::InvalidConfig { .. } => self.to_string(),
        }
    }
}

impl From<serde_json::Error> for LLMError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(err.to_string())
    }
}
