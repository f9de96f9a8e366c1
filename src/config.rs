use std::net::IpAddr;
use std::time::Duration;

use crate::authz::LegacyRoleIds;
use crate::errors::AppError;

pub const MIN_SECRET_LEN: usize = 32;
pub const MIN_SESSION_TTL_HOURS: i64 = 1;
pub const MAX_SESSION_TTL_HOURS: i64 = 720;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscordConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub guild_id: Option<String>,
    pub bot_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoogleConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub allowed_domain: Option<String>,
}

/// Everything the auth core reads from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// `None` when unset or shorter than [`MIN_SECRET_LEN`]; sessions are then refused.
    pub session_secret: Option<Vec<u8>>,
    pub session_ttl_hours: i64,
    pub cookie_secure: bool,
    pub login_path: String,
    pub default_return_path: String,
    pub provider_timeout: Duration,
    pub role_mapping_cache_ttl: Duration,
    pub legacy_roles: LegacyRoleIds,
    /// Peers whose `X-Forwarded-For` / `X-Real-IP` headers are believed.
    pub trusted_proxies: Vec<IpAddr>,
    pub discord: DiscordConfig,
    pub google: GoogleConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_secret: None,
            session_ttl_hours: 24,
            cookie_secure: true,
            login_path: "/login".to_string(),
            default_return_path: "/admin".to_string(),
            provider_timeout: Duration::from_secs(10),
            role_mapping_cache_ttl: Duration::from_secs(60),
            legacy_roles: LegacyRoleIds::default(),
            trusted_proxies: Vec::new(),
            discord: DiscordConfig::default(),
            google: GoogleConfig::default(),
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let session_secret = non_empty("SESSION_SECRET").and_then(|secret| {
            if secret.len() < MIN_SECRET_LEN {
                tracing::warn!(min_len = MIN_SECRET_LEN, "SESSION_SECRET is too short, sessions disabled");
                None
            } else {
                Some(secret.into_bytes())
            }
        });
        if session_secret.is_none() {
            tracing::warn!("SESSION_SECRET not configured, login is disabled");
        }

        Ok(Self {
            session_secret,
            session_ttl_hours: check_session_ttl(parse_var("SESSION_TTL_HOURS", defaults.session_ttl_hours)?)?,
            cookie_secure: parse_var("COOKIE_SECURE", defaults.cookie_secure)?,
            login_path: non_empty("LOGIN_PATH").unwrap_or(defaults.login_path),
            default_return_path: non_empty("DEFAULT_RETURN_PATH").unwrap_or(defaults.default_return_path),
            provider_timeout: Duration::from_secs(parse_var("PROVIDER_TIMEOUT_SECS", 10u64)?),
            role_mapping_cache_ttl: Duration::from_secs(parse_var("ROLE_MAPPING_CACHE_TTL_SECS", 60u64)?),
            legacy_roles: LegacyRoleIds {
                superadmin: non_empty("DISCORD_SUPERADMIN_ROLE_ID"),
                admin: non_empty("DISCORD_ADMIN_ROLE_ID"),
                moderator: non_empty("DISCORD_MODERATOR_ROLE_ID"),
            },
            trusted_proxies: match non_empty("TRUSTED_PROXIES") {
                Some(raw) => parse_ip_list("TRUSTED_PROXIES", &raw)?,
                None => Vec::new(),
            },
            discord: DiscordConfig {
                client_id: non_empty("DISCORD_CLIENT_ID"),
                client_secret: non_empty("DISCORD_CLIENT_SECRET"),
                redirect_uri: non_empty("DISCORD_REDIRECT_URI"),
                guild_id: non_empty("DISCORD_GUILD_ID"),
                bot_token: non_empty("DISCORD_BOT_TOKEN"),
            },
            google: GoogleConfig {
                client_id: non_empty("GOOGLE_CLIENT_ID"),
                client_secret: non_empty("GOOGLE_CLIENT_SECRET"),
                redirect_uri: non_empty("GOOGLE_REDIRECT_URI"),
                allowed_domain: non_empty("GOOGLE_ALLOWED_DOMAIN"),
            },
        })
    }

    pub fn with_session_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        let secret = secret.into();
        self.session_secret = (secret.len() >= MIN_SECRET_LEN).then_some(secret);
        self
    }

    pub fn auth_configured(&self) -> bool {
        self.session_secret.is_some()
    }
}

pub fn check_session_ttl(hours: i64) -> Result<i64, AppError> {
    if (MIN_SESSION_TTL_HOURS..=MAX_SESSION_TTL_HOURS).contains(&hours) {
        Ok(hours)
    } else {
        Err(AppError::configuration(format!(
            "SESSION_TTL_HOURS must be between {MIN_SESSION_TTL_HOURS} and {MAX_SESSION_TTL_HOURS}, got {hours}"
        )))
    }
}

fn parse_ip_list(key: &str, raw: &str) -> Result<Vec<IpAddr>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<IpAddr>()
                .map_err(|_| AppError::configuration(format!("{key} contains an invalid address '{entry}'")))
        })
        .collect()
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match non_empty(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::configuration(format!("{key} has an invalid value"))),
        None => Ok(default),
    }
}
