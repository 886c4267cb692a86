use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::{StreamExt, stream};

use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::{
    ChatBackend, ChatBackendProvider, ChunkStream, DynProvider, EventStream, HttpProvider,
};
use crate::stream::{terminal_chunk, terminal_event};
use crate::types::{Input, Output};

/// 单次响应的惰性 Future
pub type OutputFuture = Pin<Box<dyn Future<Output = Output> + Send>>;

/// 校验回调 在阻塞线程池中执行
pub type VerificationProducer = Box<dyn FnOnce() -> Verdict + Send + 'static>;

/// 请求构造回调 在阻塞线程池中执行
pub type InputProducer = Box<dyn FnOnce() -> Result<Input, LLMError> + Send + 'static>;

/// 预检结论
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// 放行请求
    Proceed,
    /// 拒绝 调用方收到该 Output 对应的终止结果
    Reject(Output),
}

impl From<Output> for Verdict {
    fn from(output: Output) -> Self {
        if output.is_successful() {
            Self::Proceed
        } else {
            Self::Reject(output)
        }
    }
}

/// 响应形态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Single,
    Ndjson,
    Sse,
}

/// 按响应形态返回的惰性结果
pub enum Execution {
    Single(OutputFuture),
    Ndjson(ChunkStream),
    Sse(EventStream),
}

impl Execution {
    pub fn mode(&self) -> ResponseMode {
        match self {
            Self::Single(_) => ResponseMode::Single,
            Self::Ndjson(_) => ResponseMode::Ndjson,
            Self::Sse(_) => ResponseMode::Sse,
        }
    }

    pub fn into_output(self) -> Option<OutputFuture> {
        match self {
            Self::Single(future) => Some(future),
            _ => None,
        }
    }

    pub fn into_chunks(self) -> Option<ChunkStream> {
        match self {
            Self::Ndjson(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn into_events(self) -> Option<EventStream> {
        match self {
            Self::Sse(stream) => Some(stream),
            _ => None,
        }
    }
}

/// LLM 调用入口 在请求到达网络前执行预检
#[derive(Clone)]
pub struct LLMClient {
    provider: DynProvider,
}

impl LLMClient {
    /// 使用任意传输策略
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }

    /// 直接通过 HTTP 传输
    pub fn with_http(transport: DynHttpTransport) -> Self {
        Self::new(Arc::new(HttpProvider::new(transport)))
    }

    /// 通过高层聊天后端
    pub fn with_chat_backend(backend: Arc<dyn ChatBackend>) -> Self {
        Self::new(Arc::new(ChatBackendProvider::new(backend)))
    }

    /// 当前策略
    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    /// 开始构建带预检的请求
    pub fn preflight(&self) -> PreflightRequest {
        PreflightRequest {
            provider: self.provider.clone(),
            verification: None,
            input: None,
        }
    }

    /// 预检通过后发送请求
    pub fn verify_and_send<V, R, I>(&self, verification: V, input: I) -> OutputFuture
    where
        V: FnOnce() -> R + Send + 'static,
        R: Into<Verdict>,
        I: FnOnce() -> Result<Input, LLMError> + Send + 'static,
    {
        let verification = Some(boxed_verification(verification));
        gate_send(self.provider.clone(), verification, Box::new(input))
    }

    /// 预检通过后以 NDJSON 流式请求
    pub fn verify_and_stream<V, R, I>(&self, verification: V, input: I) -> ChunkStream
    where
        V: FnOnce() -> R + Send + 'static,
        R: Into<Verdict>,
        I: FnOnce() -> Result<Input, LLMError> + Send + 'static,
    {
        let verification = Some(boxed_verification(verification));
        gate_stream(self.provider.clone(), verification, Box::new(input))
    }

    /// 预检通过后以 SSE 流式请求
    pub fn verify_and_stream_sse<V, R, I>(&self, verification: V, input: I) -> EventStream
    where
        V: FnOnce() -> R + Send + 'static,
        R: Into<Verdict>,
        I: FnOnce() -> Result<Input, LLMError> + Send + 'static,
    {
        let verification = Some(boxed_verification(verification));
        gate_stream_sse(self.provider.clone(), verification, Box::new(input))
    }

    /// 不做预检 仅在阻塞线程池中构造请求后发送
    pub fn handle_send<I>(&self, input: I) -> OutputFuture
    where
        I: FnOnce() -> Result<Input, LLMError> + Send + 'static,
    {
        gate_send(self.provider.clone(), None, Box::new(input))
    }

    /// 不做预检的 NDJSON 流
    pub fn handle_stream<I>(&self, input: I) -> ChunkStream
    where
        I: FnOnce() -> Result<Input, LLMError> + Send + 'static,
    {
        gate_stream(self.provider.clone(), None, Box::new(input))
    }

    /// 不做预检的 SSE 流
    pub fn handle_stream_sse<I>(&self, input: I) -> EventStream
    where
        I: FnOnce() -> Result<Input, LLMError> + Send + 'static,
    {
        gate_stream_sse(self.provider.clone(), None, Box::new(input))
    }
}

/// 预检请求 Builder 两个回调都必须提供
pub struct PreflightRequest {
    provider: DynProvider,
    verification: Option<VerificationProducer>,
    input: Option<InputProducer>,
}

impl PreflightRequest {
    /// 设置校验回调 返回 [`Verdict`] 或 [`Output`]
    pub fn verify_with<V, R>(mut self, verification: V) -> Self
    where
        V: FnOnce() -> R + Send + 'static,
        R: Into<Verdict>,
    {
        self.verification = Some(boxed_verification(verification));
        self
    }

    /// 设置请求构造回调
    pub fn input_with<I>(mut self, input: I) -> Self
    where
        I: FnOnce() -> Result<Input, LLMError> + Send + 'static,
    {
        self.input = Some(Box::new(input));
        self
    }

    /// 按响应形态生成惰性结果
    ///
    /// 缺少回调时立即返回 [`LLMError::InvalidConfig`] 不会调度任何任务
    pub fn execute(self, mode: ResponseMode) -> Result<Execution, LLMError> {
        let verification = self.verification.ok_or_else(|| {
            LLMError::invalid_config("verification", "a verification producer is required")
        })?;
        let input = self
            .input
            .ok_or_else(|| LLMError::invalid_config("input", "an input producer is required"))?;

        let (provider, verification) = (self.provider, Some(verification));
        Ok(match mode {
            ResponseMode::Single => Execution::Single(gate_send(provider, verification, input)),
            ResponseMode::Ndjson => Execution::Ndjson(gate_stream(provider, verification, input)),
            ResponseMode::Sse => Execution::Sse(gate_stream_sse(provider, verification, input)),
        })
    }
}

fn boxed_verification<V, R>(verification: V) -> VerificationProducer
where
    V: FnOnce() -> R + Send + 'static,
    R: Into<Verdict>,
{
    Box::new(move || verification().into())
}

fn gate_send(
    provider: DynProvider,
    verification: Option<VerificationProducer>,
    input: InputProducer,
) -> OutputFuture {
    Box::pin(async move {
        match admit(verification, input).await {
            Ok(input) => provider.send(input).await,
            Err(output) => output,
        }
    })
}

fn gate_stream(
    provider: DynProvider,
    verification: Option<VerificationProducer>,
    input: InputProducer,
) -> ChunkStream {
    let opened = async move {
        match admit(verification, input).await {
            Ok(input) => provider.stream(input).await,
            Err(output) => terminal_chunk(output.into_error()),
        }
    };
    Box::pin(stream::once(opened).flatten())
}

fn gate_stream_sse(
    provider: DynProvider,
    verification: Option<VerificationProducer>,
    input: InputProducer,
) -> EventStream {
    let opened = async move {
        match admit(verification, input).await {
            Ok(input) => provider.stream_sse(input).await,
            Err(output) => terminal_event(output.into_error()),
        }
    };
    Box::pin(stream::once(opened).flatten())
}

/// 依次执行校验与构造 拒绝时返回调用方应收到的 Output
async fn admit(
    verification: Option<VerificationProducer>,
    input: InputProducer,
) -> Result<Input, Output> {
    if let Some(verification) = verification {
        match run_blocking(verification).await {
            Ok(Verdict::Proceed) => {}
            Ok(Verdict::Reject(output)) => {
                // 拒绝结果必须带错误 否则按 401 处理
                let output = if output.is_successful() {
                    Output::for_error(output.into_error())
                } else {
                    output
                };
                tracing::warn!(
                    status = output.status_code,
                    "preflight verification rejected the request"
                );
                return Err(output);
            }
            Err(err) => return Err(Output::from_failure(err)),
        }
    }

    match run_blocking(input).await {
        Ok(Ok(input)) => {
            tracing::debug!(url = %input.url, stream = input.input_body.stream, "preflight passed");
            Ok(input)
        }
        Ok(Err(err)) | Err(err) => {
            tracing::warn!(error = %err, "request input could not be built");
            Err(Output::from_failure(err))
        }
    }
}

async fn run_blocking<T, F>(task: F) -> Result<T, LLMError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| LLMError::Unknown {
            message: format!("preflight task failed: {err}"),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::Map;

    use super::*;
    use crate::provider::LLMProvider;
    use crate::types::{ClientError, ErrorType, InputBody, Message, OutputChunk, SseEvent};

    /// 记录收到的请求 并返回固定结果
    #[derive(Default)]
    struct RecordingProvider {
        calls: AtomicUsize,
        urls: Mutex<Vec<String>>,
    }

    impl RecordingProvider {
        fn record(&self, input: &Input) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().expect("lock").push(input.url.clone());
        }
    }

    #[async_trait]
    impl LLMProvider for RecordingProvider {
        async fn send(&self, input: Input) -> Output {
            self.record(&input);
            Output::for_success(200, HashMap::new(), "{}".into())
        }

        async fn stream(&self, input: Input) -> ChunkStream {
            self.record(&input);
            Box::pin(stream::iter([
                OutputChunk::new(Message::assistant("Hello"), false, 0),
                OutputChunk::new(Message::assistant(""), true, 1),
            ]))
        }

        async fn stream_sse(&self, input: Input) -> EventStream {
            self.record(&input);
            Box::pin(stream::iter([
                SseEvent::Chunk(OutputChunk::new(Message::assistant("Hello"), false, 0)),
                SseEvent::Done,
            ]))
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn setup() -> (LLMClient, Arc<RecordingProvider>) {
        let provider = Arc::new(RecordingProvider::default());
        (LLMClient::new(provider.clone()), provider)
    }

    fn build_input() -> Result<Input, LLMError> {
        Input::chat(
            "http://llm.local/v1/chat",
            InputBody::chat_message("Hello", false, Map::new()),
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn verified_send_reaches_provider() {
        let (client, provider) = setup();
        let output = client
            .verify_and_send(Output::for_success_verification, build_input)
            .await;
        assert!(output.is_successful());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            provider.urls.lock().expect("lock").as_slice(),
            ["http://llm.local/v1/chat".to_string()]
        );
    }

    #[tokio::test]
    async fn rejected_send_skips_input_and_provider() {
        let (client, provider) = setup();
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();

        let output = client
            .verify_and_send(Output::for_error_401, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                build_input()
            })
            .await;

        assert_eq!(output.status_code, 401);
        assert_eq!(output.failure_reason(), Some("Unauthorized access"));
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_stream_yields_single_error_chunk() {
        let (client, provider) = setup();
        let chunks: Vec<OutputChunk> = client
            .verify_and_stream(|| Verdict::Reject(Output::for_error_401()), build_input)
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].done);
        assert_eq!(chunks[0].error, Some(ClientError::unauthorized()));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_sse_yields_single_error_event() {
        let (client, provider) = setup();
        let events: Vec<SseEvent> = client
            .verify_and_stream_sse(Output::for_error_401, build_input)
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
        assert!(!events[0].is_done());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn input_rejection_output_is_returned_unchanged() {
        let (client, provider) = setup();
        let custom = Output::for_error(ClientError::new(
            "quota exhausted",
            ErrorType::RateLimit,
            "quota_exceeded",
        ));
        let expected = custom.clone();

        let output = client
            .handle_send(move || Err(LLMError::rejected(custom)))
            .await;
        assert_eq!(output, expected);
        assert_eq!(output.status_code, 429);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn custom_rejection_error_reaches_every_mode() {
        let (client, provider) = setup();
        let custom = ClientError::new("quota exhausted", ErrorType::RateLimit, "quota_exceeded");

        let rejection = Output::for_error(custom.clone());
        let chunks: Vec<OutputChunk> = client
            .handle_stream(move || Err(LLMError::rejected(rejection)))
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].done);
        assert_eq!(chunks[0].error.as_ref(), Some(&custom));

        let rejection = Output::for_error(custom.clone());
        let events: Vec<SseEvent> = client
            .handle_stream_sse(move || Err(LLMError::rejected(rejection)))
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].chunk().and_then(|c| c.error.as_ref()), Some(&custom));

        let rejection = Output::for_error(custom.clone());
        let chunks: Vec<OutputChunk> = client
            .verify_and_stream(move || Verdict::Reject(rejection), build_input)
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].error.as_ref(), Some(&custom));

        let rejection = Output::for_error(custom.clone());
        let events: Vec<SseEvent> = client
            .verify_and_stream_sse(move || Verdict::Reject(rejection), build_input)
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].chunk().and_then(|c| c.error.as_ref()), Some(&custom));

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejection_without_error_is_unauthorized_in_every_mode() {
        let (client, provider) = setup();
        let reject = || Verdict::Reject(Output::for_success_verification());

        let output = client.verify_and_send(reject, build_input).await;
        assert!(!output.is_successful());
        assert_eq!(output.status_code, 401);
        assert_eq!(output.error, Some(ClientError::unauthorized()));

        let chunks: Vec<OutputChunk> =
            client.verify_and_stream(reject, build_input).collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].error, Some(ClientError::unauthorized()));

        let events: Vec<SseEvent> = client
            .verify_and_stream_sse(reject, build_input)
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].chunk().and_then(|c| c.error.clone()),
            Some(ClientError::unauthorized())
        );

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn input_failure_is_normalized_into_chunk() {
        let (client, _provider) = setup();
        let chunks: Vec<OutputChunk> = client
            .handle_stream(|| Err(LLMError::Validation {
                message: "url missing".into(),
            }))
            .collect()
            .await;
        assert_eq!(chunks.len(), 1);
        let error = chunks[0].error.as_ref().expect("error");
        assert_eq!(error.error_type, ErrorType::Other("ValidationError".into()));
        assert_eq!(error.code, "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn panicking_producer_becomes_internal_error() {
        let (client, _provider) = setup();
        let output = client
            .handle_send(|| -> Result<Input, LLMError> { panic!("producer exploded") })
            .await;
        assert_eq!(output.status_code, 500);
        assert_eq!(
            output.error.map(|e| e.error_type),
            Some(ErrorType::Internal)
        );
    }

    #[tokio::test]
    async fn results_are_lazy_until_polled() {
        let (client, provider) = setup();
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();

        let pending = client.handle_stream(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            build_input()
        });
        tokio::task::yield_now().await;
        assert_eq!(built.load(Ordering::SeqCst), 0);

        let chunks: Vec<OutputChunk> = pending.collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn execute_dispatches_by_mode() {
        let (client, _provider) = setup();

        let execution = client
            .preflight()
            .verify_with(|| Verdict::Proceed)
            .input_with(build_input)
            .execute(ResponseMode::Sse)
            .expect("execution");
        assert_eq!(execution.mode(), ResponseMode::Sse);
        let events: Vec<SseEvent> = execution.into_events().expect("sse").collect().await;
        assert!(events.last().is_some_and(SseEvent::is_done));

        let execution = client
            .preflight()
            .verify_with(Output::for_success_verification)
            .input_with(build_input)
            .execute(ResponseMode::Single)
            .expect("execution");
        assert!(execution.into_output().expect("single").await.is_successful());
    }

    #[test]
    fn execute_without_producers_is_configuration_error() {
        let (client, provider) = setup();

        let err = client
            .preflight()
            .input_with(build_input)
            .execute(ResponseMode::Ndjson)
            .err()
            .expect("missing verification");
        match err {
            LLMError::InvalidConfig { field, .. } => assert_eq!(field, "verification"),
            other => panic!("unexpected error type: {other:?}"),
        }

        let err = client
            .preflight()
            .verify_with(|| Verdict::Proceed)
            .execute(ResponseMode::Single)
            .err()
            .expect("missing input");
        assert_eq!(err.kind_name(), "ConfigurationError");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn verdict_from_output() {
        assert_eq!(Verdict::from(Output::for_success_verification()), Verdict::Proceed);
        assert!(matches!(
            Verdict::from(Output::for_error_401()),
            Verdict::Reject(output) if output.status_code == 401
        ));
    }
}
