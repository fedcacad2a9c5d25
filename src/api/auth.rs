//! `/api/auth`: store, inspect and remove the credential cookie.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use http::header::SET_COOKIE;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::session::Credential;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    org_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginStatus {
    login: bool,
}

/// `GET`: whether the caller's session holds a credential.
pub fn status_handler(State(state): State<Arc<AppState>>, headers: &HeaderMap) -> Response {
    let session = state.sessions.session(headers);
    Json(LoginStatus {
        login: session.get().is_some(),
    })
    .into_response()
}

/// `POST`: seal the submitted credential into the session cookie.
pub fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Response {
    match login_inner(&state, headers, body) {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

fn login_inner(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<Response, RelayError> {
    let request: LoginRequest = serde_json::from_slice(body)
        .map_err(|err| RelayError::InvalidRequest(format!("Invalid request body: {err}")))?;
    let api_key = request.api_key.trim();
    if api_key.is_empty() {
        return Err(RelayError::InvalidRequest("apiKey is required".to_string()));
    }
    let credential = Credential {
        api_key: api_key.to_string(),
        org_id: request
            .org_id
            .map(|org| org.trim().to_string())
            .filter(|org| !org.is_empty()),
    };

    let mut session = state.sessions.session(headers);
    let cookie = session.set(credential)?;
    tracing::info!(cookie = state.sessions.cookie_name(), "credential stored in session");
    Ok(([(SET_COOKIE, cookie)], ()).into_response())
}

/// `DELETE`: expire the session cookie.
pub fn logout_handler(State(state): State<Arc<AppState>>, headers: &HeaderMap) -> Response {
    let mut session = state.sessions.session(headers);
    match session.clear() {
        Ok(cookie) => {
            tracing::info!(cookie = state.sessions.cookie_name(), "credential removed from session");
            ([(SET_COOKIE, cookie)], ()).into_response()
        }
        Err(err) => err.into_response(),
    }
}
