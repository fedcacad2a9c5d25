use http::header::{HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::HeaderMap;

use crate::config::UpstreamConfig;
use crate::error::RelayError;
use crate::session::Credential;

const OPENAI_ORGANIZATION: HeaderName = HeaderName::from_static("openai-organization");

/// Upstream endpoint and headers computed once at startup.
#[derive(Debug, Clone)]
pub struct PreparedUpstream {
    chat_url: url::Url,
    static_headers: HeaderMap,
    proxy: Option<String>,
}

impl PreparedUpstream {
    /// Build from config.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the completions URL cannot be parsed.
    pub fn new(upstream: &UpstreamConfig) -> Result<Self, RelayError> {
        let base = upstream.base_url.trim_end_matches('/');
        let chat_url = url::Url::parse(&format!("{base}/chat/completions")).map_err(|err| {
            RelayError::Config(format!("Invalid upstream.base_url '{base}': {err}"))
        })?;

        let mut static_headers = HeaderMap::with_capacity(4);
        static_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        static_headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let proxy = upstream
            .proxy
            .as_deref()
            .map(str::trim)
            .filter(|proxy| !proxy.is_empty())
            .map(str::to_string);

        Ok(Self {
            chat_url,
            static_headers,
            proxy,
        })
    }

    #[must_use]
    pub fn chat_url(&self) -> &url::Url {
        &self.chat_url
    }

    #[must_use]
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Static headers plus the caller's bearer token and organization.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] when the credential cannot be
    /// carried in an HTTP header.
    pub fn request_headers(&self, credential: &Credential) -> Result<HeaderMap, RelayError> {
        let mut headers = self.static_headers.clone();

        let mut bearer = HeaderValue::try_from(format!("Bearer {}", credential.api_key.trim()))
            .map_err(|_| {
                RelayError::InvalidRequest("API key contains invalid characters".to_string())
            })?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        if let Some(org_id) = credential
            .org_id
            .as_deref()
            .map(str::trim)
            .filter(|org| !org.is_empty())
        {
            let value = HeaderValue::try_from(org_id).map_err(|_| {
                RelayError::InvalidRequest(
                    "Organization id contains invalid characters".to_string(),
                )
            })?;
            headers.insert(OPENAI_ORGANIZATION, value);
        }

        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(org_id: Option<&str>) -> Credential {
        Credential {
            api_key: "sk-abc".to_string(),
            org_id: org_id.map(str::to_string),
        }
    }

    #[test]
    fn test_chat_url_joins_base_without_double_slash() {
        let upstream = UpstreamConfig {
            base_url: "http://127.0.0.1:9000/v1/".to_string(),
            ..UpstreamConfig::default()
        };
        let prepared = PreparedUpstream::new(&upstream).unwrap();
        assert_eq!(
            prepared.chat_url().as_str(),
            "http://127.0.0.1:9000/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_headers_carry_credential() {
        let prepared = PreparedUpstream::new(&UpstreamConfig::default()).unwrap();
        let headers = prepared.request_headers(&credential(Some("org-9"))).unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer sk-abc");
        assert!(headers[AUTHORIZATION].is_sensitive());
        assert_eq!(headers[OPENAI_ORGANIZATION], "org-9");
        assert_eq!(headers[ACCEPT], "text/event-stream");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_request_headers_skip_blank_org() {
        let prepared = PreparedUpstream::new(&UpstreamConfig::default()).unwrap();
        let headers = prepared.request_headers(&credential(Some(" "))).unwrap();
        assert!(headers.get(OPENAI_ORGANIZATION).is_none());
        let headers = prepared.request_headers(&credential(None)).unwrap();
        assert!(headers.get(OPENAI_ORGANIZATION).is_none());
    }

    #[test]
    fn test_request_headers_reject_control_chars() {
        let prepared = PreparedUpstream::new(&UpstreamConfig::default()).unwrap();
        let bad = Credential {
            api_key: "sk\nabc".to_string(),
            org_id: None,
        };
        assert!(matches!(
            prepared.request_headers(&bad),
            Err(RelayError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_blank_proxy_is_none() {
        let upstream = UpstreamConfig {
            proxy: Some("  ".to_string()),
            ..UpstreamConfig::default()
        };
        assert!(PreparedUpstream::new(&upstream).unwrap().proxy().is_none());
    }
}
