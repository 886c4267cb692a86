//! Stateless JSON encode/decode capability shared by every call.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::LLMError;

/// JSON codec used for request bodies and stream units.
///
/// Implementations hold no mutable state and are shared across concurrent calls
/// without synchronization.
pub trait JsonCodec: Send + Sync {
    /// Serializes a JSON value into its canonical text form.
    fn encode(&self, value: &Value) -> Result<String, LLMError>;

    /// Parses text into a JSON value.
    fn decode(&self, text: &str) -> Result<Value, LLMError>;
}

/// Thread-safe handle to a codec implementation.
pub type DynJsonCodec = Arc<dyn JsonCodec>;

/// Default codec backed by `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerdeJsonCodec;

impl JsonCodec for SerdeJsonCodec {
    fn encode(&self, value: &Value) -> Result<String, LLMError> {
        serde_json::to_string(value)
            .map_err(|err| LLMError::decode(format!("failed to encode JSON: {err}")))
    }

    fn decode(&self, text: &str) -> Result<Value, LLMError> {
        serde_json::from_str(text)
            .map_err(|err| LLMError::decode(format!("failed to parse JSON: {err}")))
    }
}

/// Shared instance of [`SerdeJsonCodec`].
pub fn default_codec() -> DynJsonCodec {
    Arc::new(SerdeJsonCodec)
}

/// Decodes `text` with `codec` and maps the value onto `T`.
pub(crate) fn decode_as<T: DeserializeOwned>(
    codec: &dyn JsonCodec,
    text: &str,
) -> Result<T, LLMError> {
    let value = codec.decode(text)?;
    serde_json::from_value(value)
        .map_err(|err| LLMError::decode(format!("unexpected payload shape: {err}")))
}
