use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;

use crate::error::LLMError;
use crate::provider::{ChunkStream, EventStream, LLMProvider};
use crate::stream::{StreamState, terminal_chunk, terminal_event};
use crate::types::{ClientError, Input, InputBody, Message, Output, OutputChunk, SseEvent};

/// 后端返回的增量文本流
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LLMError>> + Send>>;

/// 交给 ChatBackend 的对话内容 不包含 URL 与 headers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatPrompt {
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
}

impl From<&InputBody> for ChatPrompt {
    fn from(body: &InputBody) -> Self {
        Self {
            messages: body.messages.clone(),
            model: body.model.clone(),
            temperature: body.temperature,
        }
    }
}

/// 高层聊天后端 只返回文本 由调用方负责协议细节
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// 返回完整回复文本
    async fn call(&self, prompt: ChatPrompt) -> Result<String, LLMError>;

    /// 返回增量文本
    async fn stream(&self, prompt: ChatPrompt) -> Result<TextStream, LLMError>;
}

/// 将 ChatBackend 适配为 LLMProvider 的策略
#[derive(Clone)]
pub struct ChatBackendProvider {
    backend: Arc<dyn ChatBackend>,
}

impl ChatBackendProvider {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    async fn open(&self, input: &Input) -> Result<TextStream, ClientError> {
        let prompt = ChatPrompt::from(&input.input_body);
        self.backend.stream(prompt).await.map_err(ClientError::from)
    }
}

#[async_trait]
impl LLMProvider for ChatBackendProvider {
    async fn send(&self, input: Input) -> Output {
        let prompt = ChatPrompt::from(&input.input_body);
        match self.backend.call(prompt).await {
            Ok(content) => Output::for_message(Message::assistant(content)),
            Err(err) => {
                tracing::warn!(provider = self.name(), error = %err, "chat backend call failed");
                Output::from_failure(err)
            }
        }
    }

    async fn stream(&self, input: Input) -> ChunkStream {
        match self.open(&input).await {
            Ok(text) => Box::pin(TextChunkStream::new(text)),
            Err(error) => {
                tracing::warn!(
                    provider = self.name(),
                    code = %error.code,
                    "chat backend stream failed to start"
                );
                terminal_chunk(error)
            }
        }
    }

    async fn stream_sse(&self, input: Input) -> EventStream {
        match self.open(&input).await {
            Ok(text) => Box::pin(TextChunkStream::new(text).map(|chunk| {
                if chunk.done && !chunk.is_error() {
                    SseEvent::Done
                } else {
                    SseEvent::Chunk(chunk)
                }
            })),
            Err(error) => {
                tracing::warn!(
                    provider = self.name(),
                    code = %error.code,
                    "chat backend stream failed to start"
                );
                terminal_event(error)
            }
        }
    }

    fn name(&self) -> &'static str {
        "chat_backend"
    }
}

/// 文本增量转 OutputChunk 正常结束时追加空内容的 done 块
struct TextChunkStream {
    inner: TextStream,
    index: i64,
    state: StreamState,
}

impl TextChunkStream {
    fn new(inner: TextStream) -> Self {
        Self {
            inner,
            index: 0,
            state: StreamState::Streaming,
        }
    }
}

impl Stream for TextChunkStream {
    type Item = OutputChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.state != StreamState::Streaming {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(text))) => {
                let chunk = OutputChunk::new(Message::assistant(text), false, this.index);
                this.index += 1;
                Poll::Ready(Some(chunk))
            }
            Poll::Ready(Some(Err(err))) => {
                tracing::warn!(error = %err, "chat backend stream failed");
                this.state = StreamState::Error;
                Poll::Ready(Some(OutputChunk::for_error(ClientError::from(err), this.index)))
            }
            Poll::Ready(None) => {
                this.state = StreamState::Done;
                Poll::Ready(Some(OutputChunk::new(Message::assistant(""), true, this.index)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
