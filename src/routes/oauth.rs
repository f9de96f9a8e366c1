use axum::extract::{Path, Query, State};
use axum::http::header::SET_COOKIE;
use axum::http::HeaderMap;
use axum::response::{AppendHeaders, IntoResponse, Redirect, Response};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::app::AppState;
use crate::audit::{names, AuditEvent, RequestContext};
use crate::auth::cookies::read_cookie;
use crate::auth::oauth::{generate_state, sanitize_return_path, validate_state, PkcePair};
use crate::auth::{HandshakeCookies, IssuedSession};
use crate::errors::{AppError, AppResult, ProtocolError};
use crate::providers::{IdentityProvider, Membership, ProviderKind};

#[derive(Debug, Deserialize, IntoParams)]
pub struct LoginQuery {
    /// Internal path to land on after login.
    #[serde(rename = "returnTo")]
    pub return_to: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

fn configured_provider(state: &AppState, kind: ProviderKind) -> AppResult<std::sync::Arc<dyn IdentityProvider>> {
    if !state.sessions.is_configured() {
        return Err(AppError::configuration("session secret not configured"));
    }
    state
        .providers
        .get(kind)
        .filter(|provider| provider.is_configured())
        .ok_or_else(|| AppError::configuration(format!("{kind} provider not configured")))
}

fn login_error_redirect(state: &AppState, err: &AppError) -> Redirect {
    Redirect::to(&format!("{}?error={}", state.config.login_path, err.login_error_code()))
}

#[utoipa::path(
    get,
    path = "/auth/{provider}/login",
    tag = "Auth",
    params(("provider" = ProviderKind, Path, description = "discord or google"), LoginQuery),
    responses(
        (status = 303, description = "Redirect to the provider authorize URL, or to the login page with ?error="),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Path(kind): Path<ProviderKind>,
    Query(query): Query<LoginQuery>,
) -> Response {
    match begin_login(&state, kind, query.return_to.as_deref()) {
        Ok((url, cookies)) => {
            tracing::debug!(provider = %kind, "redirecting to provider");
            (AppendHeaders(cookies.into_iter().map(|c| (SET_COOKIE, c))), Redirect::to(&url)).into_response()
        }
        Err(err) => {
            tracing::warn!(provider = %kind, error = %err, "login could not start");
            login_error_redirect(&state, &err).into_response()
        }
    }
}

fn begin_login(state: &AppState, kind: ProviderKind, return_to: Option<&str>) -> AppResult<(String, Vec<String>)> {
    let provider = configured_provider(state, kind)?;

    let oauth_state = generate_state();
    let pkce = PkcePair::generate();
    let return_to = sanitize_return_path(return_to, &state.config.default_return_path);
    let url = provider.authorize_url(&oauth_state, &pkce.challenge)?;

    let cookies = HandshakeCookies::for_provider(kind.as_str()).set_all(
        state.sessions.cookie_settings(),
        &oauth_state,
        &pkce.verifier,
        &return_to,
    );
    Ok((url, cookies))
}

#[utoipa::path(
    get,
    path = "/auth/{provider}/callback",
    tag = "Auth",
    params(("provider" = ProviderKind, Path, description = "discord or google"), CallbackQuery),
    responses(
        (status = 303, description = "Session cookie set and redirect to the return path, or redirect to the login page with ?error="),
    )
)]
pub async fn callback(
    State(state): State<AppState>,
    Path(kind): Path<ProviderKind>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Response {
    let handshake = HandshakeCookies::for_provider(kind.as_str());
    // Handshake cookies are single-use whatever the outcome.
    let mut cookies = handshake.clear_all(state.sessions.cookie_settings());
    let context = RequestContext::from_headers(&headers);

    match complete_login(&state, kind, &query, &headers, &handshake).await {
        Ok(issued) => {
            let return_to = read_cookie(&headers, &handshake.return_to)
                .and_then(|raw| urlencoding::decode(&raw).ok().map(|p| p.into_owned()));
            let return_to = sanitize_return_path(return_to.as_deref(), &state.config.default_return_path);

            tracing::info!(provider = %kind, user_id = %issued.principal.user_id, role = %issued.principal.role, "login succeeded");
            state.audit.record(
                AuditEvent::new(names::LOGIN_SUCCEEDED, "auth")
                    .with_actor(issued.principal.user_id.clone())
                    .with_provider(kind)
                    .with_reason(format!("role {}", issued.principal.role))
                    .with_context(context),
            );

            cookies.push(issued.cookie);
            (AppendHeaders(cookies.into_iter().map(|c| (SET_COOKIE, c))), Redirect::to(&return_to)).into_response()
        }
        Err(failure) => {
            let LoginFailure { error, actor_id } = failure;
            tracing::warn!(provider = %kind, kind = error.kind(), error = %error, "login failed");

            let mut event = AuditEvent::new(names::LOGIN_FAILED, error.kind())
                .with_provider(kind)
                .with_reason(error.login_error_code())
                .with_context(context);
            if let Some(actor_id) = actor_id {
                event = event.with_actor(actor_id);
            }
            state.audit.record(event);

            (
                AppendHeaders(cookies.into_iter().map(|c| (SET_COOKIE, c))),
                login_error_redirect(&state, &error),
            )
                .into_response()
        }
    }
}

/// A failed callback, with the provider user id once it is known.
struct LoginFailure {
    error: AppError,
    actor_id: Option<String>,
}

impl From<AppError> for LoginFailure {
    fn from(error: AppError) -> Self {
        Self { error, actor_id: None }
    }
}

impl From<ProtocolError> for LoginFailure {
    fn from(error: ProtocolError) -> Self {
        AppError::from(error).into()
    }
}

async fn complete_login(
    state: &AppState,
    kind: ProviderKind,
    query: &CallbackQuery,
    headers: &HeaderMap,
    handshake: &HandshakeCookies,
) -> Result<IssuedSession, LoginFailure> {
    let provider = configured_provider(state, kind)?;

    if let Some(error) = query.error.as_deref() {
        return Err(ProtocolError::ProviderReported { error: error.to_string() }.into());
    }

    let stored_state = read_cookie(headers, &handshake.state);
    let verifier = read_cookie(headers, &handshake.pkce);
    let code = query.code.as_deref().filter(|c| !c.is_empty());
    let received_state = query.state.as_deref().filter(|s| !s.is_empty());

    let (Some(code), Some(received_state), Some(stored_state), Some(verifier)) =
        (code, received_state, stored_state, verifier)
    else {
        return Err(ProtocolError::MissingParams.into());
    };

    validate_state(Some(&stored_state), Some(received_state))
        .into_result()
        .map_err(ProtocolError::InvalidState)?;

    let token = provider.exchange_code(code, &verifier).await?;
    let identity = provider.fetch_profile(&token).await?;
    let with_actor = |error: AppError| LoginFailure { error, actor_id: Some(identity.provider_user_id.clone()) };

    let roles = match provider.fetch_membership(&identity).await.map_err(with_actor)? {
        Membership::Member { roles } => roles,
        Membership::NotMember => {
            return Err(with_actor(AppError::membership("not a member of the required community")));
        }
    };

    let resolution = state
        .resolver
        .resolve(&roles)
        .await
        .ok_or_else(|| with_actor(AppError::authorization("no admin role assigned")))?;

    state.sessions.issue(&identity, &resolution, headers).map_err(with_actor)
}
