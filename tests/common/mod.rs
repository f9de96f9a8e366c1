#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{self, Body};
use axum::http::header::{COOKIE, SET_COOKIE, USER_AGENT};
use axum::http::{Request, Response};
use axum::Router;
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;

use precinct_auth::auth::CredentialHasher;
use precinct_auth::authz::LegacyRoleIds;
use precinct_auth::config::AuthConfig;
use precinct_auth::errors::{AppError, AppResult};
use precinct_auth::providers::{AccessToken, Identity, IdentityProvider, Membership, ProviderKind, ProviderRegistry};
use precinct_auth::store::CredentialStore;
use precinct_auth::{build_router, AppState};

pub const SECRET: &str = "test-session-secret-that-is-long-enough";
pub const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0";
pub const ADMIN_ROLE_ID: &str = "role-admin";
pub const SUPERADMIN_ROLE_ID: &str = "role-super";

/// In-process stand-in for a real identity provider.
#[derive(Clone)]
pub struct FakeProvider {
    pub kind: ProviderKind,
    pub membership: Membership,
    pub user_id: String,
}

impl FakeProvider {
    pub fn member_with(roles: &[&str]) -> Self {
        Self {
            kind: ProviderKind::Discord,
            membership: Membership::Member { roles: roles.iter().map(|r| r.to_string()).collect() },
            user_id: "discord-user-1".to_string(),
        }
    }

    pub fn not_member() -> Self {
        Self { membership: Membership::NotMember, ..Self::member_with(&[]) }
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn authorize_url(&self, state: &str, code_challenge: &str) -> AppResult<String> {
        Ok(format!("https://provider.test/authorize?state={state}&code_challenge={code_challenge}"))
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> AppResult<AccessToken> {
        if code == "rejected" {
            return Err(AppError::provider("token endpoint returned 400"));
        }
        assert!(!code_verifier.is_empty(), "verifier must be forwarded");
        Ok(AccessToken { access_token: format!("token-for-{code}"), token_type: None, expires_in: None, scope: None })
    }

    async fn fetch_profile(&self, _token: &AccessToken) -> AppResult<Identity> {
        Ok(Identity {
            provider: self.kind,
            provider_user_id: self.user_id.clone(),
            display_name: "Officer Test".to_string(),
            email: None,
            email_verified: false,
            avatar_url: None,
            raw_profile: Value::Null,
        })
    }

    async fn fetch_membership(&self, _identity: &Identity) -> AppResult<Membership> {
        Ok(self.membership.clone())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub pool: SqlitePool,
    _dir: TempDir,
}

pub async fn test_pool() -> anyhow::Result<(SqlitePool, TempDir)> {
    let dir = tempfile::tempdir()?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator =
        sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;
    Ok((pool, dir))
}

pub fn test_config() -> AuthConfig {
    let mut config = AuthConfig::default().with_session_secret(SECRET);
    config.cookie_secure = false;
    config.legacy_roles = LegacyRoleIds {
        superadmin: Some(SUPERADMIN_ROLE_ID.to_string()),
        admin: Some(ADMIN_ROLE_ID.to_string()),
        moderator: None,
    };
    config
}

pub async fn spawn_app(config: AuthConfig, provider: Option<FakeProvider>) -> anyhow::Result<TestApp> {
    let (pool, dir) = test_pool().await?;
    let mut providers = ProviderRegistry::new();
    if let Some(provider) = provider {
        providers = providers.with_provider(Arc::new(provider));
    }

    let state = AppState::new(pool.clone(), config, providers).with_hasher(CredentialHasher::with_iterations(1_000));
    Ok(TestApp { router: build_router(state.clone()), state, pool, _dir: dir })
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(USER_AGENT, BROWSER)
        .body(Body::empty())
        .expect("request")
}

pub fn get_with_cookies(uri: &str, cookies: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(USER_AGENT, BROWSER)
        .header(COOKIE, cookies)
        .body(Body::empty())
        .expect("request")
}

pub fn post_json(uri: &str, body: Value, cookies: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(USER_AGENT, BROWSER)
        .header("content-type", "application/json");
    if let Some(cookies) = cookies {
        builder = builder.header(COOKIE, cookies);
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

/// All `Set-Cookie` values on a response.
pub fn set_cookies(resp: &Response<Body>) -> Vec<String> {
    resp.headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

/// `name=value` pairs of the non-empty cookies, joined for a `Cookie` header.
pub fn cookie_header(set_cookies: &[String]) -> String {
    set_cookies
        .iter()
        .filter_map(|c| c.split(';').next())
        .filter(|pair| !pair.ends_with('='))
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn cookie_value(set_cookies: &[String], name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    set_cookies
        .iter()
        .filter_map(|c| c.split(';').next())
        .find_map(|pair| pair.strip_prefix(prefix.as_str()).map(str::to_string))
}

pub fn location(resp: &Response<Body>) -> String {
    resp.headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub async fn json_body(resp: Response<Body>) -> anyhow::Result<Value> {
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Full provider round trip; returns the `Cookie` header for the new session.
pub async fn provider_session(app: &TestApp) -> anyhow::Result<String> {
    use tower::util::ServiceExt;

    let resp = app.router.clone().oneshot(get("/auth/discord/login")).await?;
    let handshake = set_cookies(&resp);
    let state = cookie_value(&handshake, "discord_oauth_state").ok_or_else(|| anyhow::anyhow!("no state cookie"))?;

    let resp = app
        .router
        .clone()
        .oneshot(get_with_cookies(
            &format!("/auth/discord/callback?code=abc&state={state}"),
            &cookie_header(&handshake),
        ))
        .await?;
    let session = cookie_header(&set_cookies(&resp));
    anyhow::ensure!(session.starts_with("precinct_session="), "login failed: {}", location(&resp));
    Ok(session)
}

/// Stores a local credential and logs in with it; returns the `Cookie` header.
pub async fn local_session(app: &TestApp, username: &str, role: &str) -> anyhow::Result<String> {
    use tower::util::ServiceExt;

    let password = "Correct-Horse-9!";
    let hash = app.state.hasher.hash(password);
    app.state.credentials.upsert_credential(username, &hash, role).await?;

    let resp = app
        .router
        .clone()
        .oneshot(post_json(
            "/auth/login",
            serde_json::json!({ "username": username, "password": password }),
            None,
        ))
        .await?;
    anyhow::ensure!(resp.status().is_success(), "local login failed: {}", resp.status());
    Ok(cookie_header(&set_cookies(&resp)))
}
