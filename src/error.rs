use axum::response::{IntoResponse, Response};

/// Fixed body returned when the caller's session carries no credential.
pub const NO_CREDENTIAL_MESSAGE: &str = "No API key provided";

/// Error type used across the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Auth error: {0}")]
    Auth(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Session error: {0}")]
    Session(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// A missing-credential error carrying the fixed user-visible message.
    #[must_use]
    pub fn missing_credential() -> Self {
        RelayError::Auth(NO_CREDENTIAL_MESSAGE.to_string())
    }

    #[must_use]
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            RelayError::Auth(_) => http::StatusCode::UNAUTHORIZED,
            RelayError::InvalidRequest(_) => http::StatusCode::BAD_REQUEST,
            RelayError::Upstream { status, .. } => http::StatusCode::from_u16(*status)
                .unwrap_or(http::StatusCode::BAD_GATEWAY),
            RelayError::Transport(_) => http::StatusCode::BAD_GATEWAY,
            RelayError::Config(_) | RelayError::Session(_) | RelayError::Internal(_) => {
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Text shown to the browser. Upstream failures surface only the status
    /// text; auth failures surface the fixed no-credential message.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            RelayError::Auth(_) => NO_CREDENTIAL_MESSAGE.to_string(),
            RelayError::Upstream { message, .. } => message.clone(),
            RelayError::InvalidRequest(message) | RelayError::Transport(message) => {
                message.clone()
            }
            RelayError::Config(_) | RelayError::Session(_) | RelayError::Internal(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

/// Canonical reason phrase for an upstream status, used as the error body.
#[must_use]
pub fn upstream_status_text(status: http::StatusCode) -> String {
    status
        .canonical_reason()
        .map_or_else(|| status.as_u16().to_string(), str::to_string)
}

/// Plain-text response for an error, as consumed by the browser client.
#[must_use]
pub fn plain_text_response(status: http::StatusCode, body: String) -> Response {
    (
        status,
        [(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain; charset=utf-8"),
        )],
        body,
    )
        .into_response()
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        plain_text_response(status, self.public_message())
    }
}
