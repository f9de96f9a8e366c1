use axum::Router;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::openapi::server::Server;
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::SESSION_COOKIE;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::oauth::login,
		routes::oauth::callback,
		routes::auth::login,
		routes::auth::logout,
		routes::auth::me,
		routes::auth::status,
		routes::auth::check_password,
		routes::permissions::check,
		routes::permissions::page_summary,
		routes::role_mappings::list,
		routes::role_mappings::invalidate,
	),
	components(
		schemas(
			routes::health::HealthResponse,
			routes::auth::LoginRequest,
			routes::auth::SessionResponse,
			routes::auth::MessageResponse,
			routes::auth::AuthStatusResponse,
			routes::auth::PasswordCheckRequest,
			routes::auth::PasswordCheckResponse,
			routes::permissions::PageSummary,
			routes::role_mappings::InvalidateResponse,
			crate::auth::password::PasswordRule,
			crate::authz::Action,
			crate::authz::PermissionDecision,
			crate::providers::ProviderKind,
		)
	),
	modifiers(&SessionCookieAddon),
	tags(
		(name = "Auth", description = "Login, logout and session endpoints"),
		(name = "Permissions", description = "Page permission checks"),
		(name = "Role mappings", description = "Provider role to internal role mapping"),
		(name = "Health", description = "Liveness")
	)
)]
pub struct ApiDoc;

struct SessionCookieAddon;

impl Modify for SessionCookieAddon {
	fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
		if let Some(components) = openapi.components.as_mut() {
			components.add_security_scheme(
				"sessionCookie",
				SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(SESSION_COOKIE))),
			);
		}
	}
}

pub fn build_openapi(port: u16) -> utoipa::openapi::OpenApi {
	let mut doc = ApiDoc::openapi();
	doc.servers = Some(vec![Server::new(format!("http://localhost:{port}"))]);
	doc
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
	Router::new().merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", doc))
}
