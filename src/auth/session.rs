use std::collections::HashSet;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::{ACCEPT_LANGUAGE, USER_AGENT};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::constant_time::constant_time_str_eq;
use super::cookies::{read_cookie, CookieSettings, SESSION_COOKIE};
use crate::app::AppState;
use crate::authz::{PagePermission, Principal, RoleResolution};
use crate::config::AuthConfig;
use crate::errors::{AppError, AppResult, SessionError};
use crate::providers::{Identity, ProviderKind};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub sub: String,
    pub name: String,
    pub provider: ProviderKind,
    pub role: String,
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_permissions: Option<Vec<PagePermission>>,
    pub iat: i64,
    pub exp: i64,
    pub fpr: String,
}

impl SessionClaims {
    fn into_principal(self) -> Principal {
        let mut principal = Principal::new(self.sub, self.role)
            .with_display_name(self.name)
            .with_provider(self.provider)
            .with_permissions(self.permissions)
            .with_page_permissions(self.page_permissions);
        principal.issued_at = timestamp(self.iat);
        principal.expires_at = timestamp(self.exp);
        principal
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    /// Ready-to-send `Set-Cookie` value.
    pub cookie: String,
    pub principal: Principal,
}

/// Issues and validates the signed session cookie.
#[derive(Clone)]
pub struct SessionManager {
    secret: Option<Arc<Vec<u8>>>,
    ttl: Duration,
    cookies: CookieSettings,
}

impl SessionManager {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            secret: config.session_secret.clone().map(Arc::new),
            ttl: Duration::hours(
                config
                    .session_ttl_hours
                    .clamp(crate::config::MIN_SESSION_TTL_HOURS, crate::config::MAX_SESSION_TTL_HOURS),
            ),
            cookies: CookieSettings { secure: config.cookie_secure },
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    pub fn cookie_settings(&self) -> &CookieSettings {
        &self.cookies
    }

    fn secret(&self) -> Result<&[u8], SessionError> {
        self.secret.as_deref().map(Vec::as_slice).ok_or(SessionError::NotConfigured)
    }

    /// Hex HMAC over the client's user agent and accept-language.
    pub fn fingerprint(&self, headers: &HeaderMap) -> Result<String, SessionError> {
        let mut mac = HmacSha256::new_from_slice(self.secret()?).map_err(|_| SessionError::NotConfigured)?;
        mac.update(header_str(headers, USER_AGENT.as_str()).as_bytes());
        mac.update(b"\n");
        mac.update(header_str(headers, ACCEPT_LANGUAGE.as_str()).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn issue(
        &self,
        identity: &Identity,
        resolution: &RoleResolution,
        headers: &HeaderMap,
    ) -> AppResult<IssuedSession> {
        let secret = self
            .secret()
            .map_err(|_| AppError::configuration("session secret not configured"))?;

        let now = Utc::now();
        let expires_at = now + self.ttl;
        let claims = SessionClaims {
            sub: identity.provider_user_id.clone(),
            name: identity.display_name.clone(),
            provider: identity.provider,
            role: resolution.role.clone(),
            permissions: resolution.permissions.clone(),
            page_permissions: resolution.page_permissions.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            fpr: self.fingerprint(headers)?,
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret))
            .map_err(|err| AppError::internal(format!("failed to sign session: {err}")))?;
        let cookie = self.cookies.build(SESSION_COOKIE, &token, self.ttl.num_seconds());

        Ok(IssuedSession { token, cookie, principal: claims.into_principal() })
    }

    /// Signature, then expiry, then fingerprint; the first failure wins.
    pub fn verify_token(&self, token: &str, headers: &HeaderMap) -> Result<Principal, SessionError> {
        let secret = self.secret()?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::new();

        let claims = jsonwebtoken::decode::<SessionClaims>(token, &DecodingKey::from_secret(secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::InvalidSignature => SessionError::InvalidSignature,
                _ => SessionError::Malformed,
            })?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(SessionError::Expired);
        }

        let expected = self.fingerprint(headers)?;
        if !constant_time_str_eq(&expected, &claims.fpr) {
            return Err(SessionError::FingerprintMismatch);
        }

        Ok(claims.into_principal())
    }

    pub fn verify(&self, headers: &HeaderMap) -> Result<Principal, SessionError> {
        let token = read_cookie(headers, SESSION_COOKIE).ok_or(SessionError::Malformed)?;
        self.verify_token(&token, headers)
    }

    /// Never fails: anything short of a valid session is "unauthenticated".
    pub fn validate(&self, headers: &HeaderMap) -> Option<Principal> {
        if read_cookie(headers, SESSION_COOKIE).is_none() {
            return None;
        }
        match self.verify(headers) {
            Ok(principal) => Some(principal),
            Err(err) => {
                tracing::debug!(reason = %err, "session rejected");
                None
            }
        }
    }

    pub fn clear_cookie(&self) -> String {
        self.cookies.clear(SESSION_COOKIE)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

/// Extractor for handlers that require a valid session.
#[derive(Debug, Clone)]
pub struct AuthSession(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state
            .sessions
            .validate(&parts.headers)
            .map(AuthSession)
            .ok_or_else(|| AppError::unauthorized("not authenticated"))
    }
}

/// Extractor for handlers that behave differently for anonymous callers.
#[derive(Debug, Clone)]
pub struct MaybeSession(pub Option<Principal>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeSession {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(MaybeSession(state.sessions.validate(&parts.headers)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::{static_resolution, roles};
    use axum::http::header::COOKIE;
    use axum::http::HeaderValue;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn manager() -> SessionManager {
        SessionManager::new(&AuthConfig::default().with_session_secret(SECRET))
    }

    fn identity() -> Identity {
        Identity {
            provider: ProviderKind::Discord,
            provider_user_id: "4242".into(),
            display_name: "Sgt. Vance".into(),
            email: None,
            email_verified: false,
            avatar_url: None,
            raw_profile: serde_json::Value::Null,
        }
    }

    fn client_headers(user_agent: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(user_agent));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US"));
        headers
    }

    fn with_cookie(mut headers: HeaderMap, token: &str) -> HeaderMap {
        let value = HeaderValue::from_str(&format!("{SESSION_COOKIE}={token}")).unwrap();
        headers.insert(COOKIE, value);
        headers
    }

    #[test]
    fn issued_session_validates_for_same_client() {
        let sessions = manager();
        let resolution = static_resolution(roles::MODERATOR).unwrap();
        let issued = sessions.issue(&identity(), &resolution, &client_headers("Firefox")).unwrap();

        assert!(issued.cookie.starts_with("precinct_session="));
        let principal = sessions.validate(&with_cookie(client_headers("Firefox"), &issued.token)).unwrap();
        assert_eq!(principal.user_id, "4242");
        assert_eq!(principal.role, roles::MODERATOR);
        assert!(principal.has_permission("view_reports"));
    }

    #[test]
    fn different_client_is_rejected() {
        let sessions = manager();
        let resolution = static_resolution(roles::ADMIN).unwrap();
        let issued = sessions.issue(&identity(), &resolution, &client_headers("Firefox")).unwrap();

        let headers = client_headers("curl/8.0");
        assert_eq!(
            sessions.verify_token(&issued.token, &headers).unwrap_err(),
            SessionError::FingerprintMismatch
        );
        assert!(sessions.validate(&with_cookie(headers, &issued.token)).is_none());
    }

    #[test]
    fn tampered_or_garbage_tokens_degrade_to_unauthenticated() {
        let sessions = manager();
        let headers = client_headers("Firefox");
        assert_eq!(sessions.verify_token("not-a-jwt", &headers).unwrap_err(), SessionError::Malformed);

        let other = SessionManager::new(&AuthConfig::default().with_session_secret("z".repeat(40)));
        let resolution = static_resolution(roles::ADMIN).unwrap();
        let forged = other.issue(&identity(), &resolution, &headers).unwrap();
        assert_eq!(
            sessions.verify_token(&forged.token, &headers).unwrap_err(),
            SessionError::InvalidSignature
        );
    }

    #[test]
    fn expired_session_is_rejected_before_fingerprint() {
        let sessions = manager();
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: "1".into(),
            name: "x".into(),
            provider: ProviderKind::Local,
            role: roles::ADMIN.into(),
            permissions: vec![],
            page_permissions: None,
            iat: now - 100,
            exp: now - 1,
            fpr: "bogus".into(),
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert_eq!(
            sessions.verify_token(&token, &client_headers("Firefox")).unwrap_err(),
            SessionError::Expired
        );
    }

    #[test]
    fn unconfigured_manager_refuses_to_issue() {
        let sessions = SessionManager::new(&AuthConfig::default());
        assert!(!sessions.is_configured());
        let resolution = static_resolution(roles::ADMIN).unwrap();
        let err = sessions.issue(&identity(), &resolution, &HeaderMap::new()).unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(sessions.validate(&with_cookie(HeaderMap::new(), "x.y.z")).is_none());
    }

    #[test]
    fn out_of_range_ttl_is_clamped() {
        let mut config = AuthConfig::default().with_session_secret(SECRET);
        config.session_ttl_hours = i64::MAX;
        let sessions = SessionManager::new(&config);
        let resolution = static_resolution(roles::ADMIN).unwrap();
        let issued = sessions.issue(&identity(), &resolution, &client_headers("Firefox")).unwrap();
        assert!(issued.cookie.contains(&format!("Max-Age={}", 720 * 3600)));

        config.session_ttl_hours = 0;
        let issued = SessionManager::new(&config)
            .issue(&identity(), &resolution, &client_headers("Firefox"))
            .unwrap();
        assert!(issued.cookie.contains("Max-Age=3600"));
    }
}
