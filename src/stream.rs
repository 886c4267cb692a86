//! Line framing and the termination protocol shared by NDJSON and SSE streams.
//!
//! A streamed body is split into lines by [`LineDecoder`]. A [`Framing`] turns each
//! line into a unit and decides whether the unit ends the stream. [`TerminatingStream`]
//! drives the STREAMING → DONE / ERROR state machine: once a terminal state is reached
//! nothing else is yielded, and every fault becomes exactly one terminal unit.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::stream;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::json::{DynJsonCodec, decode_as};
use crate::provider::{ChunkStream, EventStream};
use crate::types::{ClientError, DONE_SENTINEL, OutputChunk, SseEvent};

/// Lifecycle of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamState {
    Streaming,
    Done,
    Error,
}

/// Splits a byte stream into non-blank UTF-8 lines.
///
/// Only the bytes of the most recent network read are buffered.
pub(crate) struct LineDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    body_closed: bool,
}

impl LineDecoder {
    pub(crate) fn new(body: HttpBodyStream) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            body_closed: false,
        }
    }

    fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        buffer.iter().position(|b| *b == b'\n').map(|pos| {
            let mut line: Vec<u8> = buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            line
        })
    }

    fn decode(line: Vec<u8>) -> Result<String, LLMError> {
        String::from_utf8(line)
            .map_err(|err| LLMError::decode(format!("invalid UTF-8 in stream line: {err}")))
    }
}

impl Stream for LineDecoder {
    type Item = Result<String, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            while let Some(line) = Self::drain_line(&mut this.buffer) {
                if !line.iter().all(u8::is_ascii_whitespace) {
                    return Poll::Ready(Some(Self::decode(line)));
                }
            }

            if this.body_closed {
                let rest = std::mem::take(&mut this.buffer);
                if rest.iter().all(u8::is_ascii_whitespace) {
                    return Poll::Ready(None);
                }
                return Poll::Ready(Some(Self::decode(rest)));
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => this.body_closed = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Outcome of framing one line.
pub(crate) enum Step<U> {
    /// Yield the unit and keep streaming.
    Emit(U),
    /// Yield the unit as the successful end of the stream.
    Finish(U),
    /// Yield the unit as the failed end of the stream.
    Fail(U),
    /// The line carries no unit.
    Skip,
}

/// Wire format of a stream.
pub(crate) trait Framing {
    type Unit;

    fn frame(&mut self, line: &str) -> Result<Step<Self::Unit>, LLMError>;

    /// Terminal unit describing a fault.
    fn fault(&self, error: ClientError) -> Self::Unit;
}

/// Applies a [`Framing`] to a line stream and enforces the termination protocol.
pub(crate) struct TerminatingStream<F> {
    lines: LineDecoder,
    framing: F,
    state: StreamState,
    mode: &'static str,
}

impl<F: Framing> TerminatingStream<F> {
    pub(crate) fn new(body: HttpBodyStream, framing: F, mode: &'static str) -> Self {
        Self {
            lines: LineDecoder::new(body),
            framing,
            state: StreamState::Streaming,
            mode,
        }
    }

    fn fail(&mut self, err: LLMError) -> F::Unit {
        tracing::warn!(mode = self.mode, error = %err, "stream terminated by fault");
        self.state = StreamState::Error;
        self.framing.fault(ClientError::from(err))
    }
}

impl<F: Framing + Unpin> Stream for TerminatingStream<F> {
    type Item = F::Unit;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.state != StreamState::Streaming {
                return Poll::Ready(None);
            }

            let line = match Pin::new(&mut this.lines).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => line,
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(this.fail(err))),
                Poll::Ready(None) => {
                    let err = LLMError::StreamClosed {
                        message: "response body ended before a terminal marker".to_string(),
                    };
                    return Poll::Ready(Some(this.fail(err)));
                }
                Poll::Pending => return Poll::Pending,
            };

            match this.framing.frame(&line) {
                Ok(Step::Emit(unit)) => return Poll::Ready(Some(unit)),
                Ok(Step::Finish(unit)) => {
                    tracing::debug!(mode = this.mode, "stream completed");
                    this.state = StreamState::Done;
                    return Poll::Ready(Some(unit));
                }
                Ok(Step::Fail(unit)) => {
                    tracing::warn!(mode = this.mode, "provider reported an error mid-stream");
                    this.state = StreamState::Error;
                    return Poll::Ready(Some(unit));
                }
                Ok(Step::Skip) => continue,
                Err(err) => return Poll::Ready(Some(this.fail(err))),
            }
        }
    }
}

/// One [`OutputChunk`] per line; ends at the first `done` chunk.
pub(crate) struct NdjsonFraming {
    codec: DynJsonCodec,
    next_index: i64,
}

impl NdjsonFraming {
    pub(crate) fn new(codec: DynJsonCodec) -> Self {
        Self {
            codec,
            next_index: 0,
        }
    }
}

impl Framing for NdjsonFraming {
    type Unit = OutputChunk;

    fn frame(&mut self, line: &str) -> Result<Step<OutputChunk>, LLMError> {
        let chunk: OutputChunk = decode_as(self.codec.as_ref(), line)?;
        self.next_index = self.next_index.max(chunk.index.saturating_add(1));
        Ok(if chunk.is_error() {
            Step::Fail(chunk)
        } else if chunk.done {
            Step::Finish(chunk)
        } else {
            Step::Emit(chunk)
        })
    }

    fn fault(&self, error: ClientError) -> OutputChunk {
        OutputChunk::for_error(error, self.next_index)
    }
}

/// `data:` lines carrying chunks; ends at the `[DONE]` sentinel.
pub(crate) struct SseFraming {
    codec: DynJsonCodec,
    next_index: i64,
}

impl SseFraming {
    pub(crate) fn new(codec: DynJsonCodec) -> Self {
        Self {
            codec,
            next_index: 0,
        }
    }

    fn payload(line: &str) -> Option<&str> {
        if let Some(rest) = line.strip_prefix("data:") {
            return Some(rest.strip_prefix(' ').unwrap_or(rest));
        }
        let is_field = line.starts_with(':')
            || line.starts_with("event:")
            || line.starts_with("id:")
            || line.starts_with("retry:");
        if is_field { None } else { Some(line) }
    }
}

impl Framing for SseFraming {
    type Unit = SseEvent;

    fn frame(&mut self, line: &str) -> Result<Step<SseEvent>, LLMError> {
        let Some(payload) = Self::payload(line) else {
            return Ok(Step::Skip);
        };
        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            return Ok(Step::Finish(SseEvent::Done));
        }
        if payload.is_empty() {
            return Ok(Step::Skip);
        }
        let chunk: OutputChunk = decode_as(self.codec.as_ref(), payload)?;
        self.next_index = self.next_index.max(chunk.index.saturating_add(1));
        Ok(if chunk.is_error() {
            Step::Fail(SseEvent::Chunk(chunk))
        } else {
            Step::Emit(SseEvent::Chunk(chunk))
        })
    }

    fn fault(&self, error: ClientError) -> SseEvent {
        SseEvent::Chunk(OutputChunk::for_error(error, self.next_index))
    }
}

/// NDJSON stream over a successful response body.
pub(crate) fn ndjson_stream(body: HttpBodyStream, codec: DynJsonCodec) -> ChunkStream {
    Box::pin(TerminatingStream::new(body, NdjsonFraming::new(codec), "ndjson"))
}

/// SSE stream over a successful response body.
pub(crate) fn sse_stream(body: HttpBodyStream, codec: DynJsonCodec) -> EventStream {
    Box::pin(TerminatingStream::new(body, SseFraming::new(codec), "sse"))
}

/// Stream holding only one terminal error chunk.
pub(crate) fn terminal_chunk(error: ClientError) -> ChunkStream {
    Box::pin(stream::iter([OutputChunk::for_error(error, 0)]))
}

/// Stream holding only one terminal error event.
pub(crate) fn terminal_event(error: ClientError) -> EventStream {
    Box::pin(stream::iter([SseEvent::Chunk(OutputChunk::for_error(error, 0))]))
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use futures_util::stream;

    use super::*;
    use crate::json::default_codec;
    use crate::types::{ErrorType, Message};

    fn build_body(chunks: Vec<Result<Vec<u8>, LLMError>>) -> HttpBodyStream {
        Box::pin(stream::iter(chunks))
    }

    fn text_body(chunks: &[&str]) -> HttpBodyStream {
        build_body(chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect())
    }

    fn chunk_line(content: &str, done: bool, index: i64) -> String {
        serde_json::json!({
            "message": {"role": "assistant", "content": content},
            "done": done,
            "index": index,
        })
        .to_string()
    }

    fn owned_body(lines: Vec<String>) -> HttpBodyStream {
        build_body(lines.into_iter().map(|line| Ok(line.into_bytes())).collect())
    }

    #[tokio::test]
    async fn line_decoder_joins_split_lines_and_skips_blanks() {
        let body = text_body(&["first li", "ne\r\n\r\n  \nsecond\n", "tail"]);
        let lines: Vec<String> = LineDecoder::new(body)
            .map(|line| line.expect("line"))
            .collect()
            .await;
        assert_eq!(lines, vec!["first line", "second", "tail"]);
    }

    #[tokio::test]
    async fn line_decoder_reports_utf8_errors() {
        let mut decoder = LineDecoder::new(build_body(vec![Ok(b"\xff\n".to_vec())]));
        let err = decoder.next().await.expect("item").expect_err("invalid utf-8");
        assert!(matches!(err, LLMError::Decode { .. }));
    }

    #[tokio::test]
    async fn ndjson_stops_after_done_chunk() {
        let body = owned_body(vec![
            format!("{}\n", chunk_line("Hello", false, 0)),
            format!("{}\n", chunk_line("World", true, 1)),
            format!("{}\n", chunk_line("late", false, 2)),
        ]);
        let chunks: Vec<OutputChunk> = ndjson_stream(body, default_codec()).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].message, Message::assistant("Hello"));
        assert!(!chunks[0].done);
        assert!(chunks[1].done);
        assert_eq!(chunks[1].index, 1);
    }

    #[tokio::test]
    async fn ndjson_fault_becomes_terminal_chunk() {
        let body = build_body(vec![
            Ok(format!("{}\n", chunk_line("a", false, 4)).into_bytes()),
            Err(LLMError::Connection {
                message: "connection reset".to_string(),
            }),
            Ok(format!("{}\n", chunk_line("b", true, 5)).into_bytes()),
        ]);
        let chunks: Vec<OutputChunk> = ndjson_stream(body, default_codec()).collect().await;
        assert_eq!(chunks.len(), 2);
        let last = &chunks[1];
        assert!(last.done);
        assert_eq!(last.index, 5);
        let error = last.error.as_ref().expect("error chunk");
        assert_eq!(error.error_type, ErrorType::Connection);
        assert_eq!(error.code, "HTTP_503");
    }

    #[tokio::test]
    async fn ndjson_invalid_line_is_decode_error() {
        let body = text_body(&["not json\n"]);
        let chunks: Vec<OutputChunk> = ndjson_stream(body, default_codec()).collect().await;
        assert_eq!(chunks.len(), 1);
        let error = chunks[0].error.as_ref().expect("error chunk");
        assert_eq!(error.error_type, ErrorType::Other("DecodeError".into()));
        assert_eq!(error.code, "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn ndjson_without_done_ends_with_stream_closed() {
        let body = owned_body(vec![chunk_line("Hello", false, 0)]);
        let chunks: Vec<OutputChunk> = ndjson_stream(body, default_codec()).collect().await;
        assert_eq!(chunks.len(), 2);
        let error = chunks[1].error.as_ref().expect("error chunk");
        assert_eq!(error.error_type, ErrorType::Other("StreamClosedError".into()));
        assert_eq!(chunks[1].index, 1);
    }

    #[tokio::test]
    async fn maximal_wire_index_still_terminates() {
        let body = owned_body(vec![format!("{}\n", chunk_line("edge", false, i64::MAX))]);
        let chunks: Vec<OutputChunk> = ndjson_stream(body, default_codec()).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].index, i64::MAX);
        assert!(chunks[1].is_error());
        assert_eq!(chunks[1].index, i64::MAX);

        let body = owned_body(vec![format!("data: {}\n\n", chunk_line("edge", false, i64::MAX))]);
        let events: Vec<SseEvent> = sse_stream(body, default_codec()).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());
        assert_eq!(events[1].chunk().map(|c| c.index), Some(i64::MAX));
    }

    #[tokio::test]
    async fn ndjson_provider_error_chunk_is_terminal() {
        let body = owned_body(vec![
            concat!(
                r#"{"message":{"role":"assistant","content":""},"#,
                r#""error":{"message":"overloaded","type":"ApiError","code":"overloaded_error"}}"#,
                "\n",
            )
            .to_string(),
            format!("{}\n", chunk_line("x", true, 1)),
        ]);
        let chunks: Vec<OutputChunk> = ndjson_stream(body, default_codec()).collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].error.as_ref().map(|e| e.code.as_str()),
            Some("overloaded_error")
        );
    }

    #[tokio::test]
    async fn sse_emits_chunks_then_sentinel() {
        let body = owned_body(vec![
            ": keep-alive\n\nevent: message\n".to_string(),
            format!("data: {}\n\n", chunk_line("Hello", false, 0)),
            "data: [DONE]\n\n".to_string(),
            format!("data: {}\n\n", chunk_line("late", false, 1)),
        ]);
        let events: Vec<SseEvent> = sse_stream(body, default_codec()).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].chunk().map(|c| c.message.content.as_str()),
            Some("Hello")
        );
        assert!(events[1].is_done());
    }

    #[tokio::test]
    async fn sse_accepts_prefix_without_space_and_bare_payloads() {
        let body = owned_body(vec![
            format!("data:{}\n", chunk_line("a", false, 0)),
            format!("{}\n", chunk_line("b", false, 1)),
            "data:[DONE]\n".to_string(),
        ]);
        let events: Vec<SseEvent> = sse_stream(body, default_codec()).collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].chunk().map(|c| c.index), Some(1));
        assert!(events[2].is_done());
    }

    #[tokio::test]
    async fn sse_fault_becomes_terminal_event() {
        let body = build_body(vec![
            Ok(format!("data: {}\n\n", chunk_line("a", false, 0)).into_bytes()),
            Err(LLMError::Timeout {
                message: "read timed out".to_string(),
            }),
        ]);
        let events: Vec<SseEvent> = sse_stream(body, default_codec()).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());
        let chunk = events[1].chunk().expect("error chunk");
        assert_eq!(chunk.index, 1);
        assert_eq!(
            chunk.error.as_ref().map(|e| e.code.as_str()),
            Some("HTTP_504")
        );
    }

    #[tokio::test]
    async fn terminal_helpers_yield_single_unit() {
        let chunks: Vec<OutputChunk> =
            terminal_chunk(ClientError::unauthorized()).collect().await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].done);

        let events: Vec<SseEvent> = terminal_event(ClientError::unauthorized()).collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }
}
