use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use super::permissions::{require, ClientIp};
use crate::app::AppState;
use crate::audit::{names, AuditEvent, RequestContext};
use crate::auth::AuthSession;
use crate::authz::{Action, RoleMappingConfig};
use crate::errors::AppResult;

const PAGE: &str = "role_mappings";

#[derive(Debug, Serialize, ToSchema)]
pub struct InvalidateResponse {
    pub message: String,
    pub version: u32,
}

#[utoipa::path(
    get,
    path = "/api/role-mappings",
    tag = "Role mappings",
    responses(
        (status = 200, description = "Stored role-mapping record", body = Object),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Missing view on role_mappings")
    ),
    security(("sessionCookie" = []))
)]
pub async fn list(
    State(state): State<AppState>,
    AuthSession(principal): AuthSession,
    client_ip: ClientIp,
    headers: HeaderMap,
) -> AppResult<Json<RoleMappingConfig>> {
    require(&state, &principal, PAGE, Action::View, client_ip, &headers)?;
    let config = state.config_store.load_role_mappings().await?;
    Ok(Json(config))
}

#[utoipa::path(
    post,
    path = "/api/role-mappings/invalidate",
    tag = "Role mappings",
    responses(
        (status = 200, description = "Cache dropped; next resolve reads the store", body = InvalidateResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Missing edit on role_mappings")
    ),
    security(("sessionCookie" = []))
)]
pub async fn invalidate(
    State(state): State<AppState>,
    AuthSession(principal): AuthSession,
    client_ip: ClientIp,
    headers: HeaderMap,
) -> AppResult<Json<InvalidateResponse>> {
    require(&state, &principal, PAGE, Action::Edit, client_ip, &headers)?;

    state.resolver.invalidate();
    let version = state.resolver.mappings().await.version;

    state.audit.record(
        AuditEvent::new(names::ROLE_MAPPINGS_INVALIDATED, "config")
            .with_actor(principal.user_id)
            .with_provider(principal.provider)
            .with_reason(format!("reloaded version {version}"))
            .with_context(RequestContext::from_headers(&headers)),
    );

    Ok(Json(InvalidateResponse { message: "role mapping cache invalidated".to_string(), version }))
}
