pub mod accumulator;
pub mod decoder;
pub mod sse;

pub use accumulator::{extract_token, token_byte_stream};
pub use decoder::{decode_event_stream, DeltaDecoder};
pub use sse::{SseEvent, SseParser};

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;

use crate::observability::StreamUsage;

/// One decoded unit of an upstream completion stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A JSON fragment that may carry a text token.
    Delta(serde_json::Value),
    /// The `[DONE]` sentinel; nothing follows it.
    Done,
}

/// Full relay pipeline: upstream SSE bytes in, plain assistant text out.
pub fn relay_text_stream<S, E>(
    upstream: S,
    idle_timeout: Option<Duration>,
    usage: StreamUsage,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    token_byte_stream(decode_event_stream(upstream, idle_timeout), usage)
}
