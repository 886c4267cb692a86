//! 带预检的 LLM 调用库 统一 JSON NDJSON 与 SSE 三种响应形态

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod json;
pub mod json_format;
pub mod provider;
mod stream;
pub mod types;

pub use client::{Execution, LLMClient, PreflightRequest, ResponseMode, Verdict};
pub use config::{ClientConfig, Credential};
pub use error::LLMError;
pub use provider::{ChunkStream, EventStream, LLMProvider};
pub use types::*;
