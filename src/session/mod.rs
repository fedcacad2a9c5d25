//! Credential session held in an encrypted, authenticated cookie.
//!
//! The cookie value is `base64url(nonce || AES-256-GCM(json(credential)))`.
//! A cookie that fails to decode, authenticate or parse is treated as absent.

pub mod cookie;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::RelayError;
use cookie::CookieAttributes;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// The caller's upstream credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &"<redacted>")
            .field("org_id", &self.org_id)
            .finish()
    }
}

/// Seals and opens credential cookies.
pub struct SessionCodec {
    cipher: Aes256Gcm,
    cookie_name: String,
    user_id_cookie: String,
    attrs: CookieAttributes,
}

impl SessionCodec {
    /// Build the codec from config, resolving the key inline or from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] when the key is missing, not base64, or
    /// not 32 bytes long.
    pub fn from_config(config: &SessionConfig) -> Result<Self, RelayError> {
        let encoded = config.resolve_encryption_key().ok_or_else(|| {
            RelayError::Config(format!(
                "session encryption key missing: set session.encryption_key or ${}",
                config.encryption_key_env
            ))
        })?;
        let key = decode_key(&encoded)?;
        Ok(Self::new(&key, config))
    }

    #[must_use]
    pub fn new(key: &[u8; KEY_LEN], config: &SessionConfig) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
            cookie_name: config.cookie_name.clone(),
            user_id_cookie: config.user_id_cookie.clone(),
            attrs: CookieAttributes {
                secure: config.secure_cookie,
                max_age_secs: config.max_age_secs,
            },
        }
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Encrypt a credential into a cookie-safe string.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Session`] when serialization or encryption fails.
    pub fn seal(&self, credential: &Credential) -> Result<String, RelayError> {
        let plaintext = serde_json::to_vec(credential)
            .map_err(|e| RelayError::Session(format!("Failed to encode credential: {e}")))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|e| RelayError::Session(format!("Encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Decrypt a cookie value. Any failure yields `None`.
    #[must_use]
    pub fn open(&self, value: &str) -> Option<Credential> {
        let sealed = URL_SAFE_NO_PAD.decode(value).ok()?;
        if sealed.len() <= NONCE_LEN {
            return None;
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .ok()?;
        let credential: Credential = serde_json::from_slice(&plaintext).ok()?;
        (!credential.api_key.trim().is_empty()).then_some(credential)
    }

    /// Read the session carried by a request. The cookie is decrypted once here.
    #[must_use]
    pub fn session(&self, headers: &HeaderMap) -> Session<'_> {
        let sealed = cookie::cookie_value(headers, &self.cookie_name);
        let credential = sealed.and_then(|value| {
            let opened = self.open(value);
            if opened.is_none() {
                tracing::debug!(cookie = %self.cookie_name, "discarding unreadable session cookie");
            }
            opened
        });
        let user_id = cookie::cookie_value(headers, &self.user_id_cookie).map(str::to_string);
        Session {
            codec: self,
            credential,
            user_id,
        }
    }

    fn set_cookie_header(&self, credential: &Credential) -> Result<HeaderValue, RelayError> {
        let sealed = self.seal(credential)?;
        HeaderValue::try_from(cookie::set_cookie(&self.cookie_name, &sealed, &self.attrs))
            .map_err(|e| RelayError::Session(format!("Invalid Set-Cookie header: {e}")))
    }

    fn clear_cookie_header(&self) -> Result<HeaderValue, RelayError> {
        HeaderValue::try_from(cookie::expire_cookie(&self.cookie_name, &self.attrs))
            .map_err(|e| RelayError::Session(format!("Invalid Set-Cookie header: {e}")))
    }
}

fn decode_key(encoded: &str) -> Result<[u8; KEY_LEN], RelayError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| RelayError::Config(format!("session encryption key is not base64: {e}")))?;
    <[u8; KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
        RelayError::Config(format!(
            "session encryption key must decode to {KEY_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

/// One request's view of the credential session.
pub struct Session<'a> {
    codec: &'a SessionCodec,
    credential: Option<Credential>,
    user_id: Option<String>,
}

impl Session<'_> {
    /// The stored credential, if any. Repeated calls return the same value.
    #[must_use]
    pub fn get(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Stable per-browser id from the user-id cookie.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Store a credential, returning the `Set-Cookie` header to send.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Session`] when the credential cannot be sealed.
    pub fn set(&mut self, credential: Credential) -> Result<HeaderValue, RelayError> {
        let header = self.codec.set_cookie_header(&credential)?;
        self.credential = Some(credential);
        Ok(header)
    }

    /// Remove the credential, returning the expiring `Set-Cookie` header.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Session`] when the header cannot be built.
    pub fn clear(&mut self) -> Result<HeaderValue, RelayError> {
        let header = self.codec.clear_cookie_header()?;
        self.credential = None;
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::COOKIE;

    fn test_key() -> [u8; 32] {
        [0x42; 32]
    }

    fn codec() -> SessionCodec {
        SessionCodec::new(&test_key(), &SessionConfig::default())
    }

    fn credential() -> Credential {
        Credential {
            api_key: "sk-test".to_string(),
            org_id: Some("org-1".to_string()),
        }
    }

    fn cookie_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let codec = codec();
        let sealed = codec.seal(&credential()).unwrap();
        assert!(!sealed.contains("sk-test"));
        assert_eq!(codec.open(&sealed), Some(credential()));
    }

    #[test]
    fn test_seal_uses_fresh_nonce() {
        let codec = codec();
        assert_ne!(
            codec.seal(&credential()).unwrap(),
            codec.seal(&credential()).unwrap()
        );
    }

    #[test]
    fn test_open_rejects_tampered_value() {
        let codec = codec();
        let sealed = codec.seal(&credential()).unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(codec.open(&URL_SAFE_NO_PAD.encode(bytes)).is_none());
        assert!(codec.open("not base64 !").is_none());
        assert!(codec.open("").is_none());
    }

    #[test]
    fn test_open_rejects_other_key() {
        let sealed = codec().seal(&credential()).unwrap();
        let other = SessionCodec::new(&[0x7A; 32], &SessionConfig::default());
        assert!(other.open(&sealed).is_none());
    }

    #[test]
    fn test_session_get_is_idempotent() {
        let codec = codec();
        let sealed = codec.seal(&credential()).unwrap();
        let headers = cookie_headers(&format!("chatgpt-api={sealed}; chatgpt-user-id=u-1"));
        let session = codec.session(&headers);
        assert_eq!(session.get(), Some(&credential()));
        assert_eq!(session.get(), session.get());
        assert_eq!(session.user_id(), Some("u-1"));
    }

    #[test]
    fn test_session_without_cookie_has_no_credential() {
        let codec = codec();
        let session = codec.session(&HeaderMap::new());
        assert!(session.get().is_none());
        assert!(session.user_id().is_none());
    }

    #[test]
    fn test_session_with_garbage_cookie_has_no_credential() {
        let codec = codec();
        let session = codec.session(&cookie_headers("chatgpt-api=garbage"));
        assert!(session.get().is_none());
    }

    #[test]
    fn test_set_and_clear_update_session() {
        let codec = codec();
        let mut session = codec.session(&HeaderMap::new());
        let header = session.set(credential()).unwrap();
        let header = header.to_str().unwrap();
        assert!(header.starts_with("chatgpt-api="));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("Secure"));
        assert_eq!(session.get(), Some(&credential()));

        let sealed = header
            .trim_start_matches("chatgpt-api=")
            .split(';')
            .next()
            .unwrap();
        assert_eq!(codec.open(sealed), Some(credential()));

        let cleared = session.clear().unwrap();
        assert!(cleared.to_str().unwrap().contains("Max-Age=0"));
        assert!(session.get().is_none());
    }

    #[test]
    fn test_credential_debug_redacts_key() {
        let rendered = format!("{:?}", credential());
        assert!(!rendered.contains("sk-test"));
    }

    #[test]
    fn test_from_config_validates_key() {
        let mut config = SessionConfig {
            encryption_key: Some(STANDARD.encode(test_key())),
            ..SessionConfig::default()
        };
        assert!(SessionCodec::from_config(&config).is_ok());

        config.encryption_key = Some(STANDARD.encode([1u8; 16]));
        assert!(matches!(
            SessionCodec::from_config(&config),
            Err(RelayError::Config(_))
        ));

        config.encryption_key = Some("%%%".to_string());
        assert!(matches!(
            SessionCodec::from_config(&config),
            Err(RelayError::Config(_))
        ));
    }
}
