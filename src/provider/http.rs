use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LLMError;
use crate::http::{DynHttpTransport, HttpRequest, HttpStreamResponse, collect_body_text};
use crate::json::{DynJsonCodec, default_codec};
use crate::provider::{ChunkStream, EventStream, LLMProvider};
use crate::stream::{ndjson_stream, sse_stream, terminal_chunk, terminal_event};
use crate::types::{ClientError, Input, Output};

const ACCEPT_JSON: &str = "application/json";
const ACCEPT_NDJSON: &str = "application/x-ndjson";
const ACCEPT_SSE: &str = "text/event-stream";

/// 直接通过 HttpTransport 与 chat-completion 端点通信的策略
pub struct HttpProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) codec: DynJsonCodec,
    pub(crate) timeout: Option<Duration>,
}

impl HttpProvider {
    /// 使用默认 serde_json 编解码
    pub fn new(transport: DynHttpTransport) -> Self {
        Self {
            transport,
            codec: default_codec(),
            timeout: None,
        }
    }

    /// 替换 JSON 编解码实现
    pub fn with_codec(mut self, codec: DynJsonCodec) -> Self {
        self.codec = codec;
        self
    }

    /// 单次请求超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Input 的 headers 最后合并 可覆盖 Accept
    fn build_request(&self, input: Input, accept: &str) -> HttpRequest {
        let headers = HashMap::from([("Accept".to_string(), accept.to_string())]);
        HttpRequest::post_json(input.url, input.body.into_bytes())
            .with_headers(headers)
            .with_headers(input.headers)
            .with_timeout(self.timeout)
    }

    async fn try_send(&self, input: Input) -> Result<Output, LLMError> {
        let request = self.build_request(input, ACCEPT_JSON);
        let response = self.transport.send(request).await?;
        let status = response.status;
        let headers = response.headers.clone();
        let body = response.into_string()?;
        Ok(Output::from_response(status, headers, body))
    }

    /// 非 2xx 时读取完整 body 作为错误内容
    async fn open_stream(
        &self,
        input: Input,
        accept: &str,
    ) -> Result<HttpStreamResponse, ClientError> {
        let request = self.build_request(input, accept);
        let response = self.transport.send_stream(request).await?;
        if response.is_success() {
            return Ok(response);
        }
        let status = response.status;
        let text = collect_body_text(response.body).await?;
        Err(ClientError::from_status(status, &text))
    }
}

#[async_trait]
impl LLMProvider for HttpProvider {
    async fn send(&self, input: Input) -> Output {
        let url = input.url.clone();
        tracing::debug!(provider = self.name(), %url, "sending request");
        match self.try_send(input).await {
            Ok(output) => {
                if let Some(error) = &output.error {
                    tracing::warn!(
                        %url,
                        status = output.status_code,
                        code = %error.code,
                        "request failed"
                    );
                }
                output
            }
            Err(err) => {
                tracing::warn!(%url, error = %err, "request did not complete");
                Output::from_failure(err)
            }
        }
    }

    async fn stream(&self, input: Input) -> ChunkStream {
        tracing::debug!(provider = self.name(), url = %input.url, "opening ndjson stream");
        match self.open_stream(input, ACCEPT_NDJSON).await {
            Ok(response) => ndjson_stream(response.body, self.codec.clone()),
            Err(error) => {
                tracing::warn!(code = %error.code, "ndjson stream failed before the first chunk");
                terminal_chunk(error)
            }
        }
    }

    async fn stream_sse(&self, input: Input) -> EventStream {
        tracing::debug!(provider = self.name(), url = %input.url, "opening sse stream");
        match self.open_stream(input, ACCEPT_SSE).await {
            Ok(response) => sse_stream(response.body, self.codec.clone()),
            Err(error) => {
                tracing::warn!(code = %error.code, "sse stream failed before the first event");
                terminal_event(error)
            }
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
