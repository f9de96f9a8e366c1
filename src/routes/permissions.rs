use std::convert::Infallible;
use std::net::SocketAddr;

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::app::AppState;
use crate::audit::{names, AuditEvent, RequestContext};
use crate::auth::{AuthSession, MaybeSession};
use crate::authz::{Action, PermissionContext, PermissionDecision, Principal, QuantityLimit, TimeRestrictions};
use crate::errors::{AppError, AppResult};

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct CheckQuery {
    pub page: String,
    /// One of view, create, edit, delete, approve, export.
    pub action: String,
    pub field: Option<String>,
    pub owner_id: Option<String>,
    pub group_id: Option<String>,
    pub today_count: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub page: String,
    pub can_access: bool,
    pub actions: Vec<Action>,
    pub sub_actions: Vec<String>,
    /// `null` means every field is allowed.
    pub allowed_fields: Option<Vec<String>>,
    pub blocked_fields: Vec<String>,
    #[schema(value_type = Option<Object>)]
    pub time_restrictions: Option<TimeRestrictions>,
    #[schema(value_type = Vec<Object>)]
    pub limits: Vec<QuantityLimit>,
}

/// Client address for `ip_whitelist` checks, taken from the socket peer and
/// from forwarded headers only when that peer is a configured trusted proxy.
#[derive(Debug, Clone, Default)]
pub struct ClientIp(pub Option<String>);

#[async_trait]
impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(ClientIp(RequestContext::client_ip(peer, &parts.headers, &state.config.trusted_proxies)))
    }
}

/// Runs the engine and records a `permission.denied` event on denial.
pub(crate) fn evaluate(
    state: &AppState,
    principal: Option<&Principal>,
    page: &str,
    action: Action,
    ctx: &PermissionContext,
    headers: &HeaderMap,
) -> PermissionDecision {
    let decision = state.engine.check(principal, page, action, ctx);
    if !decision.allowed {
        let mut event = AuditEvent::new(names::PERMISSION_DENIED, "authz")
            .with_reason(format!(
                "{page}:{action}: {}",
                decision.reason.as_deref().unwrap_or("denied")
            ))
            .with_context(RequestContext { ip: ctx.ip.clone(), ..RequestContext::from_headers(headers) });
        if let Some(principal) = principal {
            event = event.with_actor(principal.user_id.clone()).with_provider(principal.provider);
        }
        state.audit.record(event);
    }
    decision
}

/// Guard for handlers that need one action on one page.
pub(crate) fn require(
    state: &AppState,
    principal: &Principal,
    page: &str,
    action: Action,
    client_ip: ClientIp,
    headers: &HeaderMap,
) -> AppResult<()> {
    let ClientIp(ip) = client_ip;
    let ctx = PermissionContext { ip, ..PermissionContext::new() };
    let decision = evaluate(state, Some(principal), page, action, &ctx, headers);
    if decision.allowed {
        Ok(())
    } else {
        Err(AppError::permission_denied(decision.reason.unwrap_or_else(|| "forbidden".to_string())))
    }
}

#[utoipa::path(
    get,
    path = "/api/permissions/check",
    tag = "Permissions",
    params(CheckQuery),
    responses(
        (status = 200, description = "Decision for the current session", body = PermissionDecision),
        (status = 400, description = "Unknown action")
    ),
    security(("sessionCookie" = []))
)]
pub async fn check(
    State(state): State<AppState>,
    MaybeSession(principal): MaybeSession,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    Query(query): Query<CheckQuery>,
) -> AppResult<Json<PermissionDecision>> {
    let action = Action::parse(&query.action)
        .ok_or_else(|| AppError::bad_request(format!("unknown action '{}'", query.action)))?;

    let ctx = PermissionContext {
        field_id: query.field,
        owner_id: query.owner_id,
        ip,
        group_id: query.group_id,
        today_count: query.today_count,
    };

    Ok(Json(evaluate(&state, principal.as_ref(), &query.page, action, &ctx, &headers)))
}

#[utoipa::path(
    get,
    path = "/api/permissions/pages/{page}",
    tag = "Permissions",
    params(("page" = String, Path, description = "Page id")),
    responses(
        (status = 200, description = "What the session may do on the page", body = PageSummary),
        (status = 401, description = "Not authenticated")
    ),
    security(("sessionCookie" = []))
)]
pub async fn page_summary(
    State(state): State<AppState>,
    AuthSession(principal): AuthSession,
    Path(page): Path<String>,
) -> Json<PageSummary> {
    let engine = &state.engine;
    let who = Some(&principal);

    Json(PageSummary {
        can_access: engine.can_access_page(who, &page),
        actions: engine.allowed_actions(who, &page),
        sub_actions: engine.allowed_sub_actions(who, &page),
        allowed_fields: engine.allowed_fields(who, &page),
        blocked_fields: engine.blocked_fields(who, &page),
        time_restrictions: engine.time_restrictions(who, &page),
        limits: engine.quantity_limits(who, &page),
        page,
    })
}
