//! External identity providers.
//!
//! Each provider knows how to build its authorization URL, redeem a code for an
//! access token (with the PKCE verifier), read the user profile, and report
//! which roles the user holds in the community it gates on.

mod discord;
mod google;

pub use discord::DiscordProvider;
pub use google::GoogleProvider;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::AuthConfig;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Discord,
    Google,
    /// Username/password credential store.
    Local,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Discord => "discord",
            ProviderKind::Google => "google",
            ProviderKind::Local => "local",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user as reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub provider: ProviderKind,
    pub provider_user_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub avatar_url: Option<String>,
    pub raw_profile: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    /// Member of the gated community, holding these provider role ids.
    Member { roles: Vec<String> },
    NotMember,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// False when any credential the provider needs is missing.
    fn is_configured(&self) -> bool;

    fn authorize_url(&self, state: &str, code_challenge: &str) -> AppResult<String>;

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> AppResult<AccessToken>;

    async fn fetch_profile(&self, token: &AccessToken) -> AppResult<Identity>;

    async fn fetch_membership(&self, identity: &Identity) -> AppResult<Membership>;
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AuthConfig) -> AppResult<Self> {
        let client = http_client(config.provider_timeout)?;
        Ok(Self::new()
            .with_provider(Arc::new(DiscordProvider::new(config.discord.clone(), client.clone())))
            .with_provider(Arc::new(GoogleProvider::new(config.google.clone(), client))))
    }

    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn IdentityProvider>> {
        self.providers.get(&kind).cloned()
    }

    /// Providers with complete credentials, in a stable order.
    pub fn configured(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self
            .providers
            .values()
            .filter(|p| p.is_configured())
            .map(|p| p.kind())
            .collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

pub fn http_client(timeout: Duration) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| AppError::internal(format!("failed to build HTTP client: {err}")))
}

/// Maps transport failures and non-2xx answers to provider errors. The body of
/// an error response is logged, never returned to the caller.
pub(crate) async fn check_response(
    provider: ProviderKind,
    step: &'static str,
    result: reqwest::Result<reqwest::Response>,
) -> AppResult<reqwest::Response> {
    let response = result.map_err(|err| {
        tracing::warn!(%provider, step, error = %err, "provider request failed");
        AppError::provider(format!("{provider} {step} request failed"))
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(%provider, step, status = status.as_u16(), body = %body, "provider returned error status");
    Err(AppError::provider(format!("{provider} {step} returned {status}")))
}

pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    provider: ProviderKind,
    step: &'static str,
    response: reqwest::Response,
) -> AppResult<T> {
    response.json::<T>().await.map_err(|err| {
        tracing::warn!(%provider, step, error = %err, "provider response did not parse");
        AppError::provider(format!("{provider} {step} response was malformed"))
    })
}

pub(crate) fn required<'a>(value: &'a Option<String>, name: &str) -> AppResult<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| AppError::configuration(format!("{name} not set")))
}
