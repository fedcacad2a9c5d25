use http::header::COOKIE;
use http::HeaderMap;

/// Value of the first cookie named `name` across all `Cookie` headers.
#[must_use]
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|header| header.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            if key.trim() != name {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            (!value.is_empty()).then_some(value)
        })
}

/// Attributes shared by every cookie the relay writes.
#[derive(Debug, Clone)]
pub struct CookieAttributes {
    pub secure: bool,
    pub max_age_secs: u64,
}

/// `Set-Cookie` value storing `value` under `name`.
#[must_use]
pub fn set_cookie(name: &str, value: &str, attrs: &CookieAttributes) -> String {
    build(name, value, attrs.max_age_secs, attrs.secure)
}

/// `Set-Cookie` value expiring the cookie `name` immediately.
#[must_use]
pub fn expire_cookie(name: &str, attrs: &CookieAttributes) -> String {
    build(name, "", 0, attrs.secure)
}

fn build(name: &str, value: &str, max_age_secs: u64, secure: bool) -> String {
    let mut out = String::with_capacity(name.len() + value.len() + 64);
    out.push_str(name);
    out.push('=');
    out.push_str(value);
    out.push_str("; Path=/; HttpOnly; SameSite=Lax; Max-Age=");
    out.push_str(&max_age_secs.to_string());
    if secure {
        out.push_str("; Secure");
    }
    out
}
