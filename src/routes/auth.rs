use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::HeaderMap;
use axum::response::AppendHeaders;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::app::AppState;
use crate::audit::{names, AuditEvent, RequestContext};
use crate::auth::password::{password_violations, PasswordRule};
use crate::auth::{AuthSession, MaybeSession};
use crate::authz::{static_resolution, Principal};
use crate::errors::{AppError, AppResult};
use crate::providers::{Identity, ProviderKind};

const INVALID_CREDENTIALS: &str = "invalid credentials";

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user_id: String,
    pub display_name: String,
    #[schema(value_type = String)]
    pub provider: ProviderKind,
    pub role: String,
    pub permissions: Vec<String>,
    #[schema(value_type = Option<Vec<Object>>)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_permissions: Option<Vec<crate::authz::PagePermission>>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl From<Principal> for SessionResponse {
    fn from(principal: Principal) -> Self {
        let mut permissions: Vec<String> = principal.permissions.into_iter().collect();
        permissions.sort();
        Self {
            user_id: principal.user_id,
            display_name: principal.display_name,
            provider: principal.provider,
            role: principal.role,
            permissions,
            page_permissions: principal.page_permissions,
            expires_at: principal.expires_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthStatusResponse {
    pub configured: bool,
    pub providers: Vec<String>,
    pub authenticated: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordCheckRequest {
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PasswordCheckResponse {
    pub valid: bool,
    pub violations: Vec<PasswordRule>,
    pub messages: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful, session cookie set", body = SessionResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 503, description = "Authentication not configured")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(AppendHeaders<[(axum::http::HeaderName, String); 1]>, Json<SessionResponse>)> {
    if !state.sessions.is_configured() {
        return Err(AppError::configuration("session secret not configured"));
    }
    let context = RequestContext::from_headers(&headers);

    let outcome = authenticate_local(&state, &payload, &context).await;
    let (identity, resolution) = match outcome {
        Ok(found) => found,
        Err(reason) => {
            tracing::info!(username = %payload.username, reason, "local login rejected");
            state.audit.record(
                AuditEvent::new(names::LOGIN_FAILED, "auth")
                    .with_provider(ProviderKind::Local)
                    .with_reason(reason)
                    .with_context(context),
            );
            return Err(AppError::unauthorized(INVALID_CREDENTIALS));
        }
    };

    let issued = state.sessions.issue(&identity, &resolution, &headers)?;
    state.audit.record(
        AuditEvent::new(names::LOGIN_SUCCEEDED, "auth")
            .with_actor(identity.provider_user_id.clone())
            .with_provider(ProviderKind::Local)
            .with_reason(format!("role {}", resolution.role))
            .with_context(context),
    );

    Ok((AppendHeaders([(SET_COOKIE, issued.cookie)]), Json(issued.principal.into())))
}

/// Every failure collapses to one client-facing message; the reason is for the audit trail.
async fn authenticate_local(
    state: &AppState,
    payload: &LoginRequest,
    context: &RequestContext,
) -> Result<(Identity, crate::authz::RoleResolution), &'static str> {
    let hasher = state.hasher;
    let password = payload.password.clone();

    let credential = match state.credentials.find_credential(&payload.username).await {
        Ok(Some(credential)) => credential,
        Ok(None) => {
            // One key derivation, so unknown usernames cost the same as wrong passwords.
            let _ = tokio::task::spawn_blocking(move || hasher.hash(&password)).await;
            return Err("unknown user");
        }
        Err(err) => {
            tracing::error!(error = %err, "credential lookup failed");
            return Err("credential store unavailable");
        }
    };

    let stored = credential.password_hash.clone();
    let (valid, upgraded) = tokio::task::spawn_blocking(move || {
        let valid = hasher.verify(&password, &stored);
        let upgraded = (valid && hasher.needs_rehash(&stored)).then(|| hasher.hash(&password));
        (valid, upgraded)
    })
    .await
    .map_err(|err| {
        tracing::error!(error = %err, "password check task failed");
        "password check failed"
    })?;

    if !valid {
        return Err("wrong password");
    }

    if let Some(upgraded) = upgraded {
        match state.credentials.update_password_hash(&credential.username, &upgraded).await {
            Ok(()) => state.audit.record(
                AuditEvent::new(names::CREDENTIAL_REHASHED, "credential")
                    .with_actor(credential.username.clone())
                    .with_provider(ProviderKind::Local)
                    .with_context(context.clone()),
            ),
            Err(err) => tracing::warn!(username = %credential.username, error = %err, "rehash failed"),
        }
    }

    let resolution = static_resolution(&credential.role).ok_or("stored role is not a known role")?;
    let identity = Identity {
        provider: ProviderKind::Local,
        provider_user_id: credential.username.clone(),
        display_name: credential.username,
        email: None,
        email_verified: false,
        avatar_url: None,
        raw_profile: serde_json::Value::Null,
    };
    Ok((identity, resolution))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses((status = 200, description = "Session cookie cleared", body = MessageResponse))
)]
pub async fn logout(
    State(state): State<AppState>,
    MaybeSession(principal): MaybeSession,
    headers: HeaderMap,
) -> (AppendHeaders<[(axum::http::HeaderName, String); 1]>, Json<MessageResponse>) {
    if let Some(principal) = principal {
        state.audit.record(
            AuditEvent::new(names::LOGOUT, "auth")
                .with_actor(principal.user_id)
                .with_provider(principal.provider)
                .with_context(RequestContext::from_headers(&headers)),
        );
    }

    (
        AppendHeaders([(SET_COOKIE, state.sessions.clear_cookie())]),
        Json(MessageResponse { message: "logged out".to_string() }),
    )
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Current session", body = SessionResponse),
        (status = 401, description = "Not authenticated")
    ),
    security(("sessionCookie" = []))
)]
pub async fn me(AuthSession(principal): AuthSession) -> Json<SessionResponse> {
    Json(principal.into())
}

#[utoipa::path(
    get,
    path = "/auth/status",
    tag = "Auth",
    responses((status = 200, description = "Whether login is available", body = AuthStatusResponse))
)]
pub async fn status(State(state): State<AppState>, MaybeSession(principal): MaybeSession) -> Json<AuthStatusResponse> {
    let configured = state.sessions.is_configured();
    let providers = if configured {
        state.providers.configured().iter().map(|k| k.as_str().to_string()).collect()
    } else {
        Vec::new()
    };

    Json(AuthStatusResponse { configured, providers, authenticated: principal.is_some() })
}

#[utoipa::path(
    post,
    path = "/auth/password/check",
    tag = "Auth",
    request_body = PasswordCheckRequest,
    responses((status = 200, description = "Complexity report", body = PasswordCheckResponse))
)]
pub async fn check_password(Json(payload): Json<PasswordCheckRequest>) -> Json<PasswordCheckResponse> {
    let violations = password_violations(&payload.password);
    let messages = violations.iter().map(PasswordRule::describe).collect();
    Json(PasswordCheckResponse { valid: violations.is_empty(), violations, messages })
}
