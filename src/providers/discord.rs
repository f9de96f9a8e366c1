//! Discord OAuth2 provider, gated on membership of one guild.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{check_response, read_json, required, AccessToken, Identity, IdentityProvider, Membership, ProviderKind};
use crate::config::DiscordConfig;
use crate::errors::{AppError, AppResult};

pub const AUTHORIZE_URL: &str = "https://discord.com/oauth2/authorize";
pub const DEFAULT_API_BASE: &str = "https://discord.com/api";
const SCOPE: &str = "identify";

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    verified: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct GuildMember {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Clone)]
pub struct DiscordProvider {
    config: DiscordConfig,
    client: reqwest::Client,
    api_base: String,
}

impl DiscordProvider {
    pub fn new(config: DiscordConfig, client: reqwest::Client) -> Self {
        Self { config, client, api_base: DEFAULT_API_BASE.to_string() }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn avatar_url(user: &DiscordUser) -> Option<String> {
        user.avatar
            .as_ref()
            .map(|hash| format!("https://cdn.discordapp.com/avatars/{}/{}.png", user.id, hash))
    }
}

#[async_trait]
impl IdentityProvider for DiscordProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Discord
    }

    fn is_configured(&self) -> bool {
        let c = &self.config;
        c.client_id.is_some()
            && c.client_secret.is_some()
            && c.redirect_uri.is_some()
            && c.guild_id.is_some()
            && c.bot_token.is_some()
    }

    fn authorize_url(&self, state: &str, code_challenge: &str) -> AppResult<String> {
        let client_id = required(&self.config.client_id, "DISCORD_CLIENT_ID")?;
        let redirect_uri = required(&self.config.redirect_uri, "DISCORD_REDIRECT_URI")?;

        Ok(format!(
            "{AUTHORIZE_URL}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}\
             &code_challenge={}&code_challenge_method=S256&prompt=none",
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(SCOPE),
            urlencoding::encode(state),
            urlencoding::encode(code_challenge),
        ))
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> AppResult<AccessToken> {
        let client_id = required(&self.config.client_id, "DISCORD_CLIENT_ID")?;
        let client_secret = required(&self.config.client_secret, "DISCORD_CLIENT_SECRET")?;
        let redirect_uri = required(&self.config.redirect_uri, "DISCORD_REDIRECT_URI")?;

        let params = [
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
        ];

        let result = self
            .client
            .post(format!("{}/oauth2/token", self.api_base))
            .form(&params)
            .send()
            .await;
        let response = check_response(ProviderKind::Discord, "token exchange", result).await?;
        read_json(ProviderKind::Discord, "token exchange", response).await
    }

    async fn fetch_profile(&self, token: &AccessToken) -> AppResult<Identity> {
        let result = self
            .client
            .get(format!("{}/v10/users/@me", self.api_base))
            .bearer_auth(&token.access_token)
            .send()
            .await;
        let response = check_response(ProviderKind::Discord, "profile", result).await?;
        let raw: serde_json::Value = read_json(ProviderKind::Discord, "profile", response).await?;
        let user: DiscordUser = serde_json::from_value(raw.clone())
            .map_err(|err| AppError::provider(format!("discord profile is missing fields: {err}")))?;

        Ok(Identity {
            provider: ProviderKind::Discord,
            display_name: user.global_name.clone().unwrap_or_else(|| user.username.clone()),
            email: user.email.clone(),
            email_verified: user.verified.unwrap_or(false),
            avatar_url: Self::avatar_url(&user),
            provider_user_id: user.id,
            raw_profile: raw,
        })
    }

    async fn fetch_membership(&self, identity: &Identity) -> AppResult<Membership> {
        let guild_id = required(&self.config.guild_id, "DISCORD_GUILD_ID")?;
        let bot_token = required(&self.config.bot_token, "DISCORD_BOT_TOKEN")?;

        let result = self
            .client
            .get(format!(
                "{}/v10/guilds/{}/members/{}",
                self.api_base,
                urlencoding::encode(guild_id),
                urlencoding::encode(&identity.provider_user_id)
            ))
            .header(reqwest::header::AUTHORIZATION, format!("Bot {bot_token}"))
            .send()
            .await;

        if let Ok(response) = &result {
            if response.status() == StatusCode::NOT_FOUND {
                tracing::info!(user_id = %identity.provider_user_id, "user is not a guild member");
                return Ok(Membership::NotMember);
            }
        }

        let response = check_response(ProviderKind::Discord, "guild member", result).await?;
        let member: GuildMember = read_json(ProviderKind::Discord, "guild member", response).await?;
        Ok(Membership::Member { roles: member.roles })
    }
}
