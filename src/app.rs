use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::audit::{start_audit_listener, AuditBus};
use crate::auth::{CredentialHasher, SessionManager};
use crate::authz::{PagePermissionEngine, RoleMappingResolver};
use crate::config::AuthConfig;
use crate::errors::AppError;
use crate::providers::ProviderRegistry;
use crate::routes::{auth, health, oauth, permissions, role_mappings};
use crate::store::{ConfigStore, CredentialStore, SqliteStore};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<AuthConfig>,
    pub sessions: Arc<SessionManager>,
    pub config_store: Arc<dyn ConfigStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub resolver: Arc<RoleMappingResolver>,
    pub engine: Arc<PagePermissionEngine>,
    pub providers: ProviderRegistry,
    pub hasher: CredentialHasher,
    pub audit: AuditBus,
}

impl AppState {
    /// State backed by the SQLite document and credential stores.
    pub fn new(pool: SqlitePool, config: AuthConfig, providers: ProviderRegistry) -> Self {
        let store = Arc::new(SqliteStore::new(pool.clone()));
        let (audit, _) = AuditBus::new();
        let resolver = RoleMappingResolver::new(
            store.clone(),
            config.role_mapping_cache_ttl,
            config.legacy_roles.clone(),
        );

        Self {
            sessions: Arc::new(SessionManager::new(&config)),
            config: Arc::new(config),
            config_store: store.clone(),
            credentials: store,
            resolver: Arc::new(resolver),
            engine: Arc::new(PagePermissionEngine::new()),
            providers,
            hasher: CredentialHasher::default(),
            audit,
            pool,
        }
    }

    pub fn from_env(pool: SqlitePool) -> Result<Self, AppError> {
        let config = AuthConfig::from_env()?;
        let providers = ProviderRegistry::from_config(&config)?;
        Ok(Self::new(pool, config, providers))
    }

    pub fn with_hasher(mut self, hasher: CredentialHasher) -> Self {
        self.hasher = hasher;
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/status", get(auth::status))
        .route("/password/check", post(auth::check_password))
        .route("/:provider/login", get(oauth::login))
        .route("/:provider/callback", get(oauth::callback));

    let api_routes = Router::new()
        .route("/health", get(health::health))
        .route("/permissions/check", get(permissions::check))
        .route("/permissions/pages/:page", get(permissions::page_summary))
        .route("/role-mappings", get(role_mappings::list))
        .route("/role-mappings/invalidate", post(role_mappings::invalidate));

    Router::new()
        .nest("/auth", auth_routes)
        .nest("/api", api_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Router with state read from the environment and the audit listener running.
pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let state = AppState::from_env(pool)?;
    tokio::spawn(start_audit_listener(state.audit.subscribe(), state.pool.clone()));
    Ok(build_router(state))
}
