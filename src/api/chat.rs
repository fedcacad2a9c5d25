//! `POST /api/chat`: the streaming relay endpoint.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::error::{upstream_status_text, RelayError};
use crate::observability::StreamUsage;
use crate::protocol::chat::{RelayRequest, UpstreamPayload};
use crate::state::AppState;
use crate::stream::relay_text_stream;

const UPSTREAM_ERROR_LOG_MAX_LEN: usize = 500;

pub async fn handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match handler_inner(&state, &headers, &body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handler_inner(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, RelayError> {
    let request_id = state.next_request_id();
    let request: RelayRequest = serde_json::from_slice(body)
        .map_err(|err| RelayError::InvalidRequest(format!("Invalid request body: {err}")))?;

    let session = state.sessions.session(headers);
    let Some(credential) = session.get() else {
        tracing::info!(
            request_id = %request_id,
            request_seq = request_id.seq,
            "chat request rejected: no credential"
        );
        return Err(RelayError::missing_credential());
    };

    let system_prompt = state.roles.resolve_system_prompt(request.role.as_deref());
    let payload = UpstreamPayload::build(
        &request,
        system_prompt,
        &state.config.upstream,
        state.config.features.history_limit,
        session.user_id(),
    );
    let upstream_body = serde_json::to_vec(&payload)
        .map_err(|err| RelayError::Internal(format!("Failed to encode upstream request: {err}")))?;
    let upstream_headers = state.upstream.request_headers(credential)?;

    tracing::debug!(
        request_id = %request_id,
        request_seq = request_id.seq,
        model = %payload.model,
        role = request.role.as_deref().unwrap_or("<default>"),
        messages = payload.messages.len(),
        "relaying chat request"
    );

    let response = state
        .transport
        .send_stream(
            state.upstream.chat_url(),
            &upstream_headers,
            Bytes::from(upstream_body),
        )
        .await
        .inspect_err(|err| {
            tracing::warn!(request_id = %request_id, error = %err, "upstream unreachable");
        })?;

    let status = response.status();
    if !status.is_success() {
        let error_body = response.bytes().await.unwrap_or_default();
        tracing::warn!(
            request_id = %request_id,
            status = status.as_u16(),
            upstream_error = %sanitize_upstream_error(&error_body),
            "upstream rejected chat request"
        );
        return Err(RelayError::Upstream {
            status: status.as_u16(),
            message: upstream_status_text(status),
        });
    }

    let usage = StreamUsage::new(payload.model, request_id.to_string());
    let text = relay_text_stream(response.bytes_stream(), state.stream_idle_timeout(), usage);
    Ok(text_stream_response(Body::from_stream(text)))
}

fn text_stream_response(body: Body) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    response
}

/// Upstream error detail suitable for logs: `error.message` when the body is
/// an API error object, otherwise the raw text, truncated.
pub(crate) fn sanitize_upstream_error(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(msg) = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(serde_json::Value::as_str)
        {
            return truncate_for_log(msg);
        }
    }
    truncate_for_log(&String::from_utf8_lossy(body))
}

fn truncate_for_log(text: &str) -> String {
    if text.len() <= UPSTREAM_ERROR_LOG_MAX_LEN {
        return text.to_string();
    }
    let mut end = UPSTREAM_ERROR_LOG_MAX_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
