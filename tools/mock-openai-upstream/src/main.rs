use std::convert::Infallible;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpListener;

const DEFAULT_UPSTREAM_PORT: u16 = 19_001;
const DEFAULT_TOKEN_DELAY_MS: u64 = 40;

type MockBody = BoxBody<Bytes, Infallible>;

#[derive(Copy, Clone)]
enum MockScenario {
    /// A short reply, sent in one write.
    Text,
    /// A fenced code block, sent one token per write with a delay.
    Slow,
    /// Good frames interleaved with unparseable ones and keep-alive comments.
    Malformed,
    /// Tokens without the closing `[DONE]`.
    Truncated,
    /// 401 with an OpenAI-style error body.
    Unauthorized,
    /// 503.
    Error,
}

impl MockScenario {
    fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Slow => "slow",
            Self::Malformed => "malformed",
            Self::Truncated => "truncated",
            Self::Unauthorized => "unauthorized",
            Self::Error => "error",
        }
    }
}

struct MockState {
    scenario: MockScenario,
    token_delay: Duration,
    completions: AtomicU64,
    bearer_missing: AtomicU64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let port = env_u64("UPSTREAM_PORT", u64::from(DEFAULT_UPSTREAM_PORT));
    let port = u16::try_from(port).unwrap_or(DEFAULT_UPSTREAM_PORT);
    let state = Arc::new(MockState {
        scenario: parse_scenario(),
        token_delay: Duration::from_millis(env_u64("MOCK_TOKEN_DELAY_MS", DEFAULT_TOKEN_DELAY_MS)),
        completions: AtomicU64::new(0),
        bearer_missing: AtomicU64::new(0),
    });

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap_or_else(|err| panic!("failed to bind mock upstream on 127.0.0.1:{port}: {err}"));
    eprintln!(
        "mock upstream listening on http://127.0.0.1:{port}/v1 (scenario={})",
        state.scenario.as_str()
    );

    let conn_builder = AutoBuilder::new(TokioExecutor::new());
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                eprintln!("accept error: {err}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let service_state = Arc::clone(&state);
        let service = service_fn(move |request: Request<Incoming>| {
            let state_ref = Arc::clone(&service_state);
            async move { Ok::<_, Infallible>(handle_request(request, &state_ref).await) }
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, service).await {
                eprintln!("mock upstream connection error from {remote_addr}: {err}");
            }
        });
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_scenario() -> MockScenario {
    match env::var("MOCK_SCENARIO").as_deref() {
        Ok("slow") => MockScenario::Slow,
        Ok("malformed") => MockScenario::Malformed,
        Ok("truncated") => MockScenario::Truncated,
        Ok("unauthorized") => MockScenario::Unauthorized,
        Ok("error") => MockScenario::Error,
        Ok("text") | Err(_) => MockScenario::Text,
        Ok(other) => {
            eprintln!("unknown MOCK_SCENARIO '{other}', fallback to text");
            MockScenario::Text
        }
    }
}

async fn handle_request(request: Request<Incoming>, state: &Arc<MockState>) -> Response<MockBody> {
    let (parts, body) = request.into_parts();
    drain_request_body(body).await;

    let path = parts.uri.path();
    if parts.method == Method::GET && path == "/_mock/stats" {
        return stats_response(state);
    }
    if path != "/v1/chat/completions" && path != "/chat/completions" {
        return json_response(StatusCode::NOT_FOUND, br#"{"error":"not_found"}"#);
    }
    if parts.method != Method::POST {
        return json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            br#"{"error":"method_not_allowed"}"#,
        );
    }

    state.completions.fetch_add(1, Ordering::Relaxed);
    let has_bearer = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("Bearer "));
    if !has_bearer {
        state.bearer_missing.fetch_add(1, Ordering::Relaxed);
    }

    match state.scenario {
        MockScenario::Text => sse_response(full_body(Bytes::from_static(CHAT_STREAM_TEXT))),
        MockScenario::Slow => sse_response(paced_body(CHAT_STREAM_CODE_TOKENS, state.token_delay)),
        MockScenario::Malformed => {
            sse_response(full_body(Bytes::from_static(CHAT_STREAM_MALFORMED)))
        }
        MockScenario::Truncated => {
            sse_response(full_body(Bytes::from_static(CHAT_STREAM_TRUNCATED)))
        }
        MockScenario::Unauthorized => json_response(
            StatusCode::UNAUTHORIZED,
            br#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","code":"invalid_api_key"}}"#,
        ),
        MockScenario::Error => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            br#"{"error":{"message":"mock injected error","type":"server_error"}}"#,
        ),
    }
}

async fn drain_request_body(mut body: Incoming) {
    while let Some(frame_result) = body.frame().await {
        if frame_result.is_err() {
            break;
        }
    }
}

fn full_body(bytes: Bytes) -> MockBody {
    Full::new(bytes).boxed()
}

/// One `data:` frame per token, `delay` apart, then `[DONE]`.
fn paced_body(tokens: &'static [&'static str], delay: Duration) -> MockBody {
    let frames = futures_util::stream::unfold(0usize, move |index| async move {
        if index > tokens.len() {
            return None;
        }
        tokio::time::sleep(delay).await;
        let frame = match tokens.get(index) {
            Some(token) => chunk_frame(token),
            None => Bytes::from_static(b"data: [DONE]\n\n"),
        };
        Some((Ok::<_, Infallible>(Frame::data(frame)), index + 1))
    });
    StreamBody::new(frames).boxed()
}

fn chunk_frame(token: &str) -> Bytes {
    let mut escaped = String::with_capacity(token.len() + 8);
    for ch in token.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    Bytes::from(format!(
        "data: {{\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-3.5-turbo\",\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"{escaped}\"}},\"finish_reason\":null}}]}}\n\n"
    ))
}

fn stats_response(state: &MockState) -> Response<MockBody> {
    let body = format!(
        "{{\"scenario\":\"{}\",\"completions\":{},\"bearer_missing\":{}}}",
        state.scenario.as_str(),
        state.completions.load(Ordering::Relaxed),
        state.bearer_missing.load(Ordering::Relaxed),
    );
    with_content_type(
        StatusCode::OK,
        "application/json",
        full_body(Bytes::from(body)),
    )
}

fn sse_response(body: MockBody) -> Response<MockBody> {
    let mut response = with_content_type(StatusCode::OK, "text/event-stream", body);
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn json_response(status: StatusCode, body: &'static [u8]) -> Response<MockBody> {
    with_content_type(status, "application/json", full_body(Bytes::from_static(body)))
}

fn with_content_type(
    status: StatusCode,
    content_type: &'static str,
    body: MockBody,
) -> Response<MockBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

const CHAT_STREAM_TEXT: &[u8] = b"data: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-3.5-turbo\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-3.5-turbo\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-3.5-turbo\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\" there\"},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-3.5-turbo\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n";
const CHAT_STREAM_MALFORMED: &[u8] = b": keep-alive\n\ndata: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"A\"}}]}\n\ndata: {\"choices\":[{\"index\"\n\ndata: not json at all\n\ndata: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"B\"}}]}\n\ndata: [DONE]\n\n";
const CHAT_STREAM_TRUNCATED: &[u8] = b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"partial\"}}]}\n\ndata: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" answer\"}}]}\n\n";
const CHAT_STREAM_CODE_TOKENS: &[&str] = &[
    "Here", " is", " a", " loop", ":\n\n", "```rust\n", "for i in 0..3 {\n", "    println!(\"{i}\");\n",
    "}\n", "```",
];
