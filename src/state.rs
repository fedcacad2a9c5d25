mod request_id;

use std::time::Duration;

use crate::config::AppConfig;
use crate::error::RelayError;
use crate::roles::RolePresets;
use crate::session::SessionCodec;
use crate::transport::{HttpTransport, PreparedUpstream};

pub use request_id::RequestId;
use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
///
/// Immutable after startup apart from the request id counter.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    pub upstream: PreparedUpstream,
    pub roles: RolePresets,
    pub sessions: SessionCodec,
    request_ids: RequestIdGenerator,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: AppConfig,
        transport: HttpTransport,
        upstream: PreparedUpstream,
        sessions: SessionCodec,
    ) -> Self {
        let roles = RolePresets::new(&config.roles);
        Self {
            config,
            transport,
            upstream,
            roles,
            sessions,
            request_ids: RequestIdGenerator::new(),
        }
    }

    /// Build every runtime component from a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the session key, the upstream URL or
    /// the HTTP client cannot be set up.
    pub fn from_config(config: AppConfig) -> Result<Self, RelayError> {
        let sessions = SessionCodec::from_config(&config.session)?;
        let upstream = PreparedUpstream::new(&config.upstream)?;
        let transport = HttpTransport::new(&config.server, upstream.proxy())?;
        Ok(Self::new(config, transport, upstream, sessions))
    }

    pub fn next_request_id(&self) -> RequestId {
        self.request_ids.next()
    }

    #[must_use]
    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.config
            .server
            .stream_idle_timeout_secs
            .map(Duration::from_secs)
    }
}
