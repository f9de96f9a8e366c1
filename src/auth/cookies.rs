//! Set-Cookie construction and Cookie header parsing.

use axum::http::header::COOKIE;
use axum::http::HeaderMap;

pub const SESSION_COOKIE: &str = "precinct_session";
pub const HANDSHAKE_MAX_AGE_SECS: i64 = 600;

/// Attributes shared by every cookie the service sets: `HttpOnly; SameSite=Lax; Path=/`,
/// plus `Secure` unless disabled for local development.
#[derive(Debug, Clone, Copy)]
pub struct CookieSettings {
    pub secure: bool,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self { secure: true }
    }
}

impl CookieSettings {
    pub fn build(&self, name: &str, value: &str, max_age_secs: i64) -> String {
        let mut parts = vec![
            format!("{name}={value}"),
            "Path=/".to_string(),
            format!("Max-Age={}", max_age_secs.max(0)),
            "HttpOnly".to_string(),
        ];
        if self.secure {
            parts.push("Secure".to_string());
        }
        parts.push("SameSite=Lax".to_string());
        parts.join("; ")
    }

    pub fn clear(&self, name: &str) -> String {
        self.build(name, "", 0)
    }
}

/// The three short-lived cookies that carry one provider's login handshake.
#[derive(Debug, Clone)]
pub struct HandshakeCookies {
    pub state: String,
    pub pkce: String,
    pub return_to: String,
}

impl HandshakeCookies {
    pub fn for_provider(provider: &str) -> Self {
        Self {
            state: format!("{provider}_oauth_state"),
            pkce: format!("{provider}_oauth_pkce"),
            return_to: format!("{provider}_oauth_return"),
        }
    }

    pub fn set_all(&self, settings: &CookieSettings, state: &str, verifier: &str, return_to: &str) -> Vec<String> {
        vec![
            settings.build(&self.state, state, HANDSHAKE_MAX_AGE_SECS),
            settings.build(&self.pkce, verifier, HANDSHAKE_MAX_AGE_SECS),
            settings.build(&self.return_to, &urlencoding::encode(return_to), HANDSHAKE_MAX_AGE_SECS),
        ]
    }

    pub fn clear_all(&self, settings: &CookieSettings) -> Vec<String> {
        vec![
            settings.clear(&self.state),
            settings.clear(&self.pkce),
            settings.clear(&self.return_to),
        ]
    }
}

/// Returns the first non-empty value of cookie `name` across all Cookie headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|cookie| {
            cookie
                .trim()
                .strip_prefix(prefix.as_str())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
}
