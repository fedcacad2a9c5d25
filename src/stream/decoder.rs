//! Upstream stream decoder: raw SSE bytes to [`StreamEvent`]s.
//!
//! [`DeltaDecoder`] is a synchronous pull decoder: callers `push` whatever
//! bytes arrived and drain decoded events with `next_event`. It owns all
//! cross-chunk buffering (partial lines, partial UTF-8 sequences, events whose
//! blank-line terminator has not arrived yet), so it can be driven by any I/O
//! source. [`decode_event_stream`] adapts it over an async byte stream.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use smallvec::SmallVec;

use super::sse::{is_done_event, SseEvent, SseParser};
use super::StreamEvent;

const REPLACEMENT_CHAR: &str = "\u{FFFD}";

struct PendingEvents {
    events: SmallVec<[SseEvent; 8]>,
    head: usize,
}

impl PendingEvents {
    #[inline]
    fn new() -> Self {
        Self {
            events: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<SseEvent> {
        if self.head >= self.events.len() {
            return None;
        }
        let event = std::mem::take(&mut self.events[self.head]);
        self.head += 1;
        if self.head == self.events.len() {
            self.clear();
        }
        Some(event)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<SseEvent>) {
        if parsed.is_empty() {
            return;
        }
        self.events.extend(parsed.drain(..));
    }

    #[inline]
    fn clear(&mut self) {
        self.events.clear();
        self.head = 0;
    }
}

/// Incremental decoder from upstream bytes to stream events.
pub struct DeltaDecoder {
    parser: SseParser,
    utf8_tail: Vec<u8>,
    parsed: Vec<SseEvent>,
    pending: PendingEvents,
    finished: bool,
    skipped_frames: u64,
}

impl DeltaDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            parser: SseParser::new(),
            utf8_tail: Vec::new(),
            parsed: Vec::with_capacity(8),
            pending: PendingEvents::new(),
            finished: false,
            skipped_frames: 0,
        }
    }

    /// Feed the next chunk of upstream bytes. Ignored once `[DONE]` was decoded.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.finished {
            return;
        }
        if self.utf8_tail.is_empty() {
            let consumed = feed_utf8(&mut self.parser, chunk, &mut self.parsed);
            self.utf8_tail.extend_from_slice(&chunk[consumed..]);
        } else {
            let mut joined = std::mem::take(&mut self.utf8_tail);
            joined.extend_from_slice(chunk);
            let consumed = feed_utf8(&mut self.parser, &joined, &mut self.parsed);
            joined.drain(..consumed);
            self.utf8_tail = joined;
        }
        self.pending.extend_from_vec(&mut self.parsed);
    }

    /// Pop the next decoded event, if a complete one is buffered.
    ///
    /// Frames whose payload is not valid JSON are dropped. After `Done` is
    /// returned nothing else is ever produced.
    pub fn next_event(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        while let Some(frame) = self.pending.pop_front() {
            if is_done_event(&frame) {
                self.finished = true;
                self.pending.clear();
                return Some(StreamEvent::Done);
            }
            match serde_json::from_str(&frame.data) {
                Ok(value) => return Some(StreamEvent::Delta(value)),
                Err(err) => {
                    self.skipped_frames += 1;
                    tracing::debug!(
                        error = %err,
                        frame_len = frame.data.len(),
                        "skipping unparseable stream frame"
                    );
                }
            }
        }
        None
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[must_use]
    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }
}

impl Default for DeltaDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Feed the longest decodable UTF-8 prefix of `bytes` into the parser and
/// return how many bytes were consumed. A truncated trailing sequence is left
/// for the next chunk; invalid sequences are replaced with U+FFFD.
fn feed_utf8(parser: &mut SseParser, bytes: &[u8], out: &mut Vec<SseEvent>) -> usize {
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                parser.feed_into(text, out);
                return bytes.len();
            }
            Err(err) => {
                let (valid, invalid) = rest.split_at(err.valid_up_to());
                if let Ok(text) = std::str::from_utf8(valid) {
                    parser.feed_into(text, out);
                }
                match err.error_len() {
                    Some(len) => {
                        parser.feed_into(REPLACEMENT_CHAR, out);
                        rest = &invalid[len..];
                    }
                    None => return bytes.len() - invalid.len(),
                }
            }
        }
    }
}

type BoxedSource<E> = Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>;

struct DecodeState<E> {
    source: Option<BoxedSource<E>>,
    decoder: DeltaDecoder,
    idle_timeout: Option<Duration>,
}

/// Decode an upstream SSE byte stream into [`StreamEvent`]s.
///
/// The returned stream is pull-driven: it reads from `byte_stream` only while
/// the consumer is polling and no decoded event is waiting. It ends after
/// `Done` (releasing the source immediately), at upstream EOF, on an upstream
/// read error, or when no chunk arrives within `idle_timeout`. Dropping it
/// drops the source.
pub fn decode_event_stream<S, E>(
    byte_stream: S,
    idle_timeout: Option<Duration>,
) -> impl Stream<Item = StreamEvent> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = DecodeState {
        source: Some(Box::pin(byte_stream) as BoxedSource<E>),
        decoder: DeltaDecoder::new(),
        idle_timeout,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.decoder.next_event() {
                if state.decoder.is_finished() {
                    state.source = None;
                }
                return Some((event, state));
            }
            if state.decoder.is_finished() {
                return None;
            }

            let source = state.source.as_mut()?;
            let next = match state.idle_timeout {
                Some(limit) => {
                    if let Ok(next) = tokio::time::timeout(limit, source.next()).await {
                        next
                    } else {
                        tracing::warn!(
                            idle_timeout_secs = limit.as_secs(),
                            "upstream stream idle, closing"
                        );
                        return None;
                    }
                }
                None => source.next().await,
            };

            match next {
                Some(Ok(bytes)) => state.decoder.push(&bytes),
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "upstream stream failed mid-response");
                    return None;
                }
                None => {
                    tracing::debug!(
                        skipped_frames = state.decoder.skipped_frames(),
                        "upstream stream ended without [DONE]"
                    );
                    return None;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::convert::Infallible;

    fn drain(decoder: &mut DeltaDecoder) -> Vec<StreamEvent> {
        std::iter::from_fn(|| decoder.next_event()).collect()
    }

    fn chunks(parts: &[&'static str]) -> Vec<Result<Bytes, Infallible>> {
        parts
            .iter()
            .map(|part| Ok(Bytes::from_static(part.as_bytes())))
            .collect()
    }

    #[test]
    fn test_decodes_delta_and_done() {
        let mut decoder = DeltaDecoder::new();
        decoder.push(b"data: {\"a\":1}\n\ndata: [DONE]\n\n");
        let events = drain(&mut decoder);
        assert_eq!(
            events,
            vec![StreamEvent::Delta(json!({"a": 1})), StreamEvent::Done]
        );
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_event_split_across_chunks_is_one_event() {
        let mut decoder = DeltaDecoder::new();
        decoder.push(b"data: {\"cho");
        assert!(decoder.next_event().is_none());
        decoder.push(b"ices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n");
        let events = drain(&mut decoder);
        assert_eq!(
            events,
            vec![StreamEvent::Delta(
                json!({"choices": [{"delta": {"content": "x"}}]})
            )]
        );
        assert_eq!(decoder.skipped_frames(), 0);
    }

    #[test]
    fn test_terminator_split_across_chunks() {
        let mut decoder = DeltaDecoder::new();
        decoder.push(b"data: {}\n");
        assert!(decoder.next_event().is_none());
        decoder.push(b"\n");
        assert_eq!(drain(&mut decoder), vec![StreamEvent::Delta(json!({}))]);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let payload = "data: {\"t\":\"héllo\"}\n\n".as_bytes();
        let split = payload.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut decoder = DeltaDecoder::new();
        decoder.push(&payload[..split]);
        decoder.push(&payload[split..]);
        assert_eq!(
            drain(&mut decoder),
            vec![StreamEvent::Delta(json!({"t": "héllo"}))]
        );
    }

    #[test]
    fn test_invalid_utf8_does_not_stall_decoder() {
        let mut decoder = DeltaDecoder::new();
        decoder.push(b"data: {\"t\":\"a\xFFb\"}\n\ndata: {\"n\":2}\n\n");
        assert_eq!(
            drain(&mut decoder),
            vec![
                StreamEvent::Delta(json!({"t": "a\u{FFFD}b"})),
                StreamEvent::Delta(json!({"n": 2}))
            ]
        );
    }

    #[test]
    fn test_malformed_frames_are_skipped() {
        let mut decoder = DeltaDecoder::new();
        decoder.push(b"data: {not json\n\n: keep-alive\n\ndata:\n\ndata: {\"ok\":true}\n\n");
        assert_eq!(
            drain(&mut decoder),
            vec![StreamEvent::Delta(json!({"ok": true}))]
        );
        assert_eq!(decoder.skipped_frames(), 2);
        assert!(!decoder.is_finished());
    }

    #[test]
    fn test_nothing_after_done() {
        let mut decoder = DeltaDecoder::new();
        decoder.push(b"data: [DONE]\n\ndata: {\"late\":1}\n\n");
        assert_eq!(drain(&mut decoder), vec![StreamEvent::Done]);
        decoder.push(b"data: {\"later\":2}\n\n");
        assert!(decoder.next_event().is_none());
    }

    #[test]
    fn test_named_event_frames_are_decoded() {
        let mut decoder = DeltaDecoder::new();
        decoder.push(b"event: completion\ndata: {\"x\":1}\n\n");
        assert_eq!(drain(&mut decoder), vec![StreamEvent::Delta(json!({"x": 1}))]);
    }

    #[tokio::test]
    async fn test_stream_ends_at_done_without_reading_further() {
        let source = futures_util::stream::iter(chunks(&["data: {\"a\":1}\n\ndata: [DONE]\n\n"]))
            .chain(futures_util::stream::pending());
        let events: Vec<StreamEvent> = decode_event_stream(source, None).collect().await;
        assert_eq!(
            events,
            vec![StreamEvent::Delta(json!({"a": 1})), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn test_stream_ends_at_upstream_eof() {
        let source = futures_util::stream::iter(chunks(&["data: {\"a\":1}\n", "\n"]));
        let events: Vec<StreamEvent> = decode_event_stream(source, None).collect().await;
        assert_eq!(events, vec![StreamEvent::Delta(json!({"a": 1}))]);
    }

    #[tokio::test]
    async fn test_stream_ends_on_upstream_error() {
        let source = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"a\":1}\n\n")),
            Err("connection reset".to_string()),
            Ok(Bytes::from_static(b"data: {\"b\":2}\n\n")),
        ]);
        let events: Vec<StreamEvent> = decode_event_stream(source, None).collect().await;
        assert_eq!(events, vec![StreamEvent::Delta(json!({"a": 1}))]);
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_silent_stream() {
        let source = futures_util::stream::iter(chunks(&["data: {\"a\":1}\n\n"]))
            .chain(futures_util::stream::pending());
        let events: Vec<StreamEvent> =
            decode_event_stream(source, Some(Duration::from_millis(20)))
                .collect()
                .await;
        assert_eq!(events, vec![StreamEvent::Delta(json!({"a": 1}))]);
    }
}
