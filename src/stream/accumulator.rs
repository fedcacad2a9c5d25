//! Token accumulator: decoded stream events to a plain-text byte stream.

use std::convert::Infallible;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::Value;

use super::StreamEvent;
use crate::observability::StreamUsage;

/// Text token carried by a delta fragment at `choices[0].delta.content`.
///
/// Returns `None` when any link of the path is missing or has the wrong type,
/// and for empty strings.
#[must_use]
pub fn extract_token(delta: &Value) -> Option<&str> {
    delta
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .filter(|token| !token.is_empty())
}

type BoxedEvents = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Re-encode stream events as raw UTF-8 text chunks, one chunk per token.
///
/// Pull-driven: events are read only while the consumer polls, and nothing is
/// queued. The stream closes at `Done` or at the end of `events` with no
/// trailing marker. `usage` is updated as tokens pass and is logged when the
/// returned stream is dropped.
pub fn token_byte_stream<S>(
    events: S,
    usage: StreamUsage,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send
where
    S: Stream<Item = StreamEvent> + Send + 'static,
{
    let events: BoxedEvents = Box::pin(events);
    futures_util::stream::unfold((events, usage), |(mut events, mut usage)| async move {
        loop {
            match events.next().await {
                Some(StreamEvent::Delta(delta)) => {
                    let Some(token) = extract_token(&delta) else {
                        continue;
                    };
                    usage.record_token(token);
                    let chunk = Bytes::copy_from_slice(token.as_bytes());
                    return Some((Ok(chunk), (events, usage)));
                }
                Some(StreamEvent::Done) => {
                    usage.finish(true);
                    return None;
                }
                None => {
                    usage.finish(false);
                    return None;
                }
            }
        }
    })
}
