use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Estimate the number of tokens in `text` for the given model.
///
/// Uses a lightweight heuristic (`bytes / 4`) to avoid loading model BPE tables.
#[must_use]
pub fn estimate_tokens(text: &str, _model: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// How a relayed stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The upstream sent `[DONE]`.
    Complete,
    /// The upstream ended (EOF, error, idle timeout) without `[DONE]`.
    Truncated,
    /// The client stopped reading before the stream ended.
    ClientGone,
}

impl StreamOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Truncated => "truncated",
            Self::ClientGone => "client_disconnected",
        }
    }
}

/// Per-stream usage counters, logged once when the stream is dropped.
#[derive(Debug)]
pub struct StreamUsage {
    model: String,
    request_id: String,
    started: Instant,
    emitted_bytes: u64,
    emitted_chunks: u64,
    estimated_tokens: u64,
    done_seen: bool,
    ended: bool,
}

impl StreamUsage {
    #[must_use]
    pub fn new(model: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            request_id: request_id.into(),
            started: Instant::now(),
            emitted_bytes: 0,
            emitted_chunks: 0,
            estimated_tokens: 0,
            done_seen: false,
            ended: false,
        }
    }

    /// Record one emitted text chunk.
    pub fn record_token(&mut self, token: &str) {
        self.emitted_bytes += token.len() as u64;
        self.emitted_chunks += 1;
        self.estimated_tokens += estimate_tokens(token, &self.model);
    }

    /// Mark the end of the event sequence.
    pub fn finish(&mut self, done_seen: bool) {
        self.done_seen = done_seen;
        self.ended = true;
    }

    #[must_use]
    pub fn emitted_bytes(&self) -> u64 {
        self.emitted_bytes
    }

    #[must_use]
    pub fn emitted_chunks(&self) -> u64 {
        self.emitted_chunks
    }

    #[must_use]
    pub fn outcome(&self) -> StreamOutcome {
        if !self.ended {
            StreamOutcome::ClientGone
        } else if self.done_seen {
            StreamOutcome::Complete
        } else {
            StreamOutcome::Truncated
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for StreamUsage {
    fn drop(&mut self) {
        log_stream_usage(self);
    }
}

/// Log the completion record for a relayed stream.
pub fn log_stream_usage(usage: &StreamUsage) {
    let outcome = usage.outcome();
    if outcome == StreamOutcome::ClientGone {
        debug!(
            request_id = %usage.request_id,
            model = %usage.model,
            emitted_bytes = usage.emitted_bytes,
            "client disconnected mid-stream"
        );
    }
    info!(
        request_id = %usage.request_id,
        model = %usage.model,
        outcome = outcome.as_str(),
        emitted_bytes = usage.emitted_bytes,
        emitted_chunks = usage.emitted_chunks,
        completion_tokens_estimate = usage.estimated_tokens,
        duration_seconds = usage.elapsed().as_secs_f64(),
        "stream completed"
    );
}
