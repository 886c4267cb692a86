use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::types::{Input, Output, OutputChunk, SseEvent};

pub mod chat_backend;
pub mod http;

pub use chat_backend::{ChatBackend, ChatBackendProvider, ChatPrompt, TextStream};
pub use http::HttpProvider;

/// NDJSON 流别名 终止单元之后不再产出
pub type ChunkStream = Pin<Box<dyn Stream<Item = OutputChunk> + Send>>;

/// SSE 流别名
pub type EventStream = Pin<Box<dyn Stream<Item = SseEvent> + Send>>;

/// 统一的传输策略 Trait 三种响应形态各对应一个操作
///
/// 失败不会以 `Err` 返回 而是折叠为错误形态的 [`Output`] 或终止单元
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// 发送请求并等待完整响应
    async fn send(&self, input: Input) -> Output;

    /// 以 NDJSON 方式返回增量块
    async fn stream(&self, input: Input) -> ChunkStream;

    /// 以 SSE 方式返回事件 以 `[DONE]` 结束
    async fn stream_sse(&self, input: Input) -> EventStream;

    /// 策略名称
    fn name(&self) -> &'static str;
}

/// 线程安全 Provider
pub type DynProvider = Arc<dyn LLMProvider>;
