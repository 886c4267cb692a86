//! Immutable values exchanged with the request pipeline.
//!
//! A call starts from an [`Input`] built by the caller and ends in either one
//! [`Output`] or a finite sequence of [`OutputChunk`]s / [`SseEvent`]s. Failures are
//! described by [`ClientError`] and never escape as a failed future or stream.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::json::{JsonCodec, SerdeJsonCodec, decode_as};
use crate::json_format::json_response_params;

mod error;

pub use error::{ClientError, ErrorType, INTERNAL_ERROR, extract_error_code};

/// Payload of the SSE event that terminates a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Chat role accepted by chat-completion endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    #[default]
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message of a conversation.
///
/// # Examples
///
/// ```
/// use llm_gate::types::{Message, Role};
///
/// let msg = Message::user("Hello");
/// assert_eq!(msg.role, Role::User);
/// assert_eq!(msg.content, "Hello");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// System instruction.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// User turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    fn to_value(&self) -> Value {
        json!({ "role": self.role.as_str(), "content": self.content })
    }
}

/// Parameters of a chat-completion request.
///
/// `additional_fields` are merged into the top level of the wire body after the
/// standard keys and therefore override `model`, `messages`, `stream` or
/// `temperature` when they collide.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputBody {
    /// Model identifier, or `None` to let the endpoint pick its default.
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub stream: bool,
    pub temperature: Option<f64>,
    /// Provider-specific fields, e.g. `response_format`.
    pub additional_fields: Map<String, Value>,
}

impl InputBody {
    /// Creates a chat-completion body.
    pub fn chat(
        model: Option<String>,
        messages: Vec<Message>,
        stream: bool,
        temperature: Option<f64>,
        additional_fields: Map<String, Value>,
    ) -> Self {
        Self {
            model,
            messages,
            stream,
            temperature,
            additional_fields,
        }
    }

    /// Creates a body for SSE streaming. Always sets `stream`.
    pub fn sse(model: Option<String>, messages: Vec<Message>, temperature: Option<f64>) -> Self {
        Self::chat(model, messages, true, temperature, Map::new())
    }

    /// Creates a body holding a single user message.
    pub fn chat_message(
        content: impl Into<String>,
        stream: bool,
        additional_fields: Map<String, Value>,
    ) -> Self {
        Self::chat(
            None,
            vec![Message::user(content)],
            stream,
            None,
            additional_fields,
        )
    }

    /// Adds or replaces one provider-specific field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.additional_fields.insert(key.into(), value);
        self
    }

    /// Adds the fields that make the body's model answer in JSON.
    ///
    /// Leaves the body untouched when no model is set or the model family has no
    /// such switch.
    pub fn with_json_response_format(mut self) -> Self {
        if let Some(model) = &self.model {
            self.additional_fields.extend(json_response_params(model));
        }
        self
    }

    /// Builds the wire object with `additional_fields` merged last.
    ///
    /// # Examples
    ///
    /// ```
    /// use serde_json::{Map, json};
    /// use llm_gate::types::{InputBody, Message};
    ///
    /// let body = InputBody::chat(
    ///     Some("gpt-4o".into()),
    ///     vec![Message::user("hi")],
    ///     false,
    ///     Some(0.7),
    ///     Map::new(),
    /// )
    /// .with_field("model", json!("gpt-4o-mini"));
    /// let object = body.to_json_object();
    /// assert_eq!(object["model"], json!("gpt-4o-mini"));
    /// assert_eq!(object["stream"], json!(false));
    /// ```
    pub fn to_json_object(&self) -> Map<String, Value> {
        let mut object = Map::new();
        object.insert(
            "messages".to_string(),
            Value::Array(self.messages.iter().map(Message::to_value).collect()),
        );
        object.insert("stream".to_string(), Value::Bool(self.stream));
        if let Some(model) = &self.model {
            object.insert("model".to_string(), Value::String(model.clone()));
        }
        if let Some(temperature) = self.temperature {
            object.insert("temperature".to_string(), Value::from(temperature));
        }
        for (key, value) in &self.additional_fields {
            object.insert(key.clone(), value.clone());
        }
        object
    }
}

/// Fully formed request: target URL, serialized body and headers.
///
/// Created once per call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Input {
    pub url: String,
    /// Canonical JSON of [`Input::input_body`].
    pub body: String,
    pub headers: HashMap<String, String>,
    pub input_body: InputBody,
}

impl Input {
    /// Serializes `input_body` and assembles the request.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Validation`] when the body cannot be serialized.
    pub fn chat(
        url: impl Into<String>,
        input_body: InputBody,
        headers: HashMap<String, String>,
    ) -> Result<Self, LLMError> {
        Self::chat_with_codec(&SerdeJsonCodec, url, input_body, headers)
    }

    /// Same as [`Input::chat`] with an explicit codec.
    pub fn chat_with_codec(
        codec: &dyn JsonCodec,
        url: impl Into<String>,
        input_body: InputBody,
        headers: HashMap<String, String>,
    ) -> Result<Self, LLMError> {
        let body = codec
            .encode(&Value::Object(input_body.to_json_object()))
            .map_err(|err| LLMError::Validation {
                message: format!("failed to serialize request: {err}"),
            })?;
        Ok(Self {
            url: url.into(),
            body,
            headers,
            input_body,
        })
    }
}

/// Completed single-response result.
///
/// `error.is_some()` exactly when the call failed. The HTTP strategy fills `body`, the
/// chat-backend strategy fills `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub status_code: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ClientError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

impl Output {
    /// Successful raw response.
    pub fn for_success(status_code: u16, headers: HashMap<String, String>, body: String) -> Self {
        Self {
            status_code,
            headers,
            body: Some(body),
            error: None,
            message: None,
        }
    }

    /// Result a verification producer returns to let the request through.
    pub fn for_success_verification() -> Self {
        Self {
            status_code: 200,
            headers: HashMap::new(),
            body: None,
            error: None,
            message: None,
        }
    }

    /// Successful response already decoded into a message.
    pub fn for_message(message: Message) -> Self {
        Self {
            message: Some(message),
            ..Self::for_success_verification()
        }
    }

    /// Error-shaped output whose status follows the error taxonomy.
    pub fn for_error(error: ClientError) -> Self {
        Self {
            status_code: error.status_code(),
            headers: HashMap::new(),
            body: None,
            error: Some(error),
            message: None,
        }
    }

    /// Standard preflight rejection.
    pub fn for_error_401() -> Self {
        Self::for_error(ClientError::unauthorized())
    }

    /// Classifies a raw HTTP response.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use llm_gate::types::Output;
    ///
    /// let output = Output::from_response(500, HashMap::new(), "Internal Server Error".into());
    /// assert!(!output.is_successful());
    /// assert_eq!(output.error.unwrap().code, "HTTP_500");
    /// ```
    pub fn from_response(status: u16, headers: HashMap<String, String>, body: String) -> Self {
        if (200..300).contains(&status) {
            return Self::for_success(status, headers, body);
        }
        Self {
            status_code: status,
            headers,
            body: None,
            error: Some(ClientError::from_status(status, &body)),
            message: None,
        }
    }

    /// Folds a pipeline failure into an output. Preflight rejections are returned
    /// exactly as the producer built them.
    pub fn from_failure(err: LLMError) -> Self {
        match err {
            LLMError::Rejected { output, .. } if output.error.is_some() => *output,
            other => Self::for_error(ClientError::from(other)),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.error.is_none()
    }

    /// Error message, if the call failed.
    pub fn failure_reason(&self) -> Option<&str> {
        self.error.as_ref().map(|error| error.message.as_str())
    }

    /// Looks a header up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Decodes the raw body into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Decode`] when there is no body or it does not match `T`.
    pub fn parse_json_body<T: DeserializeOwned>(&self) -> Result<T, LLMError> {
        let body = self
            .body
            .as_deref()
            .ok_or_else(|| LLMError::decode("response has no body"))?;
        decode_as(&SerdeJsonCodec, body)
    }

    pub(crate) fn into_error(self) -> ClientError {
        self.error.unwrap_or_else(ClientError::unauthorized)
    }
}

/// One unit of an NDJSON or SSE stream.
///
/// Error chunks are terminal: they carry `done = true` and the error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputChunk {
    #[serde(default)]
    pub message: Message,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ClientError>,
}

impl OutputChunk {
    pub fn new(message: Message, done: bool, index: i64) -> Self {
        Self {
            message,
            done,
            index,
            error: None,
        }
    }

    /// Parses one wire line.
    pub fn from_json(text: &str) -> Result<Self, LLMError> {
        decode_as(&SerdeJsonCodec, text)
    }

    /// Terminal chunk describing a failure.
    pub fn for_error(error: ClientError, index: i64) -> Self {
        Self {
            message: Message::assistant(error.message.clone()),
            done: true,
            index,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Event of an SSE stream: a parsed chunk or the `[DONE]` sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Chunk(OutputChunk),
    Done,
}

impl SseEvent {
    /// Whether this is the `[DONE]` sentinel.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Whether no event can follow this one.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Done => true,
            Self::Chunk(chunk) => chunk.is_error(),
        }
    }

    pub fn chunk(&self) -> Option<&OutputChunk> {
        match self {
            Self::Chunk(chunk) => Some(chunk),
            Self::Done => None,
        }
    }

    pub fn into_chunk(self) -> Option<OutputChunk> {
        match self {
            Self::Chunk(chunk) => Some(chunk),
            Self::Done => None,
        }
    }

    /// Payload as it appears after `data: ` on the wire.
    pub fn data(&self) -> Result<String, LLMError> {
        match self {
            Self::Chunk(chunk) => Ok(serde_json::to_string(chunk)?),
            Self::Done => Ok(DONE_SENTINEL.to_string()),
        }
    }

    /// Renders the event as an SSE frame for relaying downstream.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_gate::types::SseEvent;
    ///
    /// assert_eq!(SseEvent::Done.to_frame().unwrap(), "data: [DONE]\n\n");
    /// ```
    pub fn to_frame(&self) -> Result<String, LLMError> {
        Ok(format!("data: {}\n\n", self.data()?))
    }
}
