//! Google OAuth2 provider, gated on a verified address in one domain.

use async_trait::async_trait;
use serde::Deserialize;

use super::{check_response, read_json, required, AccessToken, Identity, IdentityProvider, Membership, ProviderKind};
use crate::config::GoogleConfig;
use crate::errors::{AppError, AppResult};

pub const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const SCOPE: &str = "openid email profile";

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

#[derive(Clone)]
pub struct GoogleProvider {
    config: GoogleConfig,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(config: GoogleConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

/// Membership check without any network call: the address must be verified
/// and, when a domain is configured, belong to it. Roles are the address and
/// `@domain`, so mappings can target one person or the whole domain.
pub fn domain_membership(identity: &Identity, allowed_domain: Option<&str>) -> Membership {
    let Some(email) = identity.email.as_deref().filter(|_| identity.email_verified) else {
        return Membership::NotMember;
    };
    let Some((_, domain)) = email.rsplit_once('@') else {
        return Membership::NotMember;
    };
    let domain = domain.to_ascii_lowercase();

    if let Some(allowed) = allowed_domain {
        if !domain.eq_ignore_ascii_case(allowed.trim_start_matches('@')) {
            return Membership::NotMember;
        }
    }

    Membership::Member { roles: vec![email.to_ascii_lowercase(), format!("@{domain}")] }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn is_configured(&self) -> bool {
        let c = &self.config;
        c.client_id.is_some() && c.client_secret.is_some() && c.redirect_uri.is_some()
    }

    fn authorize_url(&self, state: &str, code_challenge: &str) -> AppResult<String> {
        let client_id = required(&self.config.client_id, "GOOGLE_CLIENT_ID")?;
        let redirect_uri = required(&self.config.redirect_uri, "GOOGLE_REDIRECT_URI")?;

        let mut url = format!(
            "{AUTHORIZE_URL}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}\
             &code_challenge={}&code_challenge_method=S256&access_type=online&prompt=select_account",
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(SCOPE),
            urlencoding::encode(state),
            urlencoding::encode(code_challenge),
        );
        if let Some(domain) = self.config.allowed_domain.as_deref() {
            url.push_str("&hd=");
            url.push_str(&urlencoding::encode(domain));
        }
        Ok(url)
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> AppResult<AccessToken> {
        let client_id = required(&self.config.client_id, "GOOGLE_CLIENT_ID")?;
        let client_secret = required(&self.config.client_secret, "GOOGLE_CLIENT_SECRET")?;
        let redirect_uri = required(&self.config.redirect_uri, "GOOGLE_REDIRECT_URI")?;

        let params = [
            ("code", code),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
            ("code_verifier", code_verifier),
        ];

        let result = self.client.post(TOKEN_URL).form(&params).send().await;
        let response = check_response(ProviderKind::Google, "token exchange", result).await?;
        read_json(ProviderKind::Google, "token exchange", response).await
    }

    async fn fetch_profile(&self, token: &AccessToken) -> AppResult<Identity> {
        let result = self.client.get(USERINFO_URL).bearer_auth(&token.access_token).send().await;
        let response = check_response(ProviderKind::Google, "profile", result).await?;
        let raw: serde_json::Value = read_json(ProviderKind::Google, "profile", response).await?;
        let info: GoogleUserInfo = serde_json::from_value(raw.clone())
            .map_err(|err| AppError::provider(format!("google profile is missing fields: {err}")))?;

        let display_name = info
            .name
            .clone()
            .or_else(|| info.email.clone())
            .unwrap_or_else(|| info.sub.clone());

        Ok(Identity {
            provider: ProviderKind::Google,
            provider_user_id: info.sub,
            display_name,
            email: info.email,
            email_verified: info.email_verified.unwrap_or(false),
            avatar_url: info.picture,
            raw_profile: raw,
        })
    }

    async fn fetch_membership(&self, identity: &Identity) -> AppResult<Membership> {
        let membership = domain_membership(identity, self.config.allowed_domain.as_deref());
        if membership == Membership::NotMember {
            tracing::info!(user_id = %identity.provider_user_id, "google account outside the allowed domain");
        }
        Ok(membership)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(email: Option<&str>, verified: bool) -> Identity {
        Identity {
            provider: ProviderKind::Google,
            provider_user_id: "1099".into(),
            display_name: "Officer".into(),
            email: email.map(str::to_string),
            email_verified: verified,
            avatar_url: None,
            raw_profile: serde_json::Value::Null,
        }
    }

    #[test]
    fn verified_address_in_domain_is_member() {
        let membership = domain_membership(&identity(Some("Chief@LSPD.example"), true), Some("lspd.example"));
        assert_eq!(
            membership,
            Membership::Member { roles: vec!["chief@lspd.example".into(), "@lspd.example".into()] }
        );
    }

    #[test]
    fn other_domain_or_unverified_is_not_member() {
        assert_eq!(
            domain_membership(&identity(Some("someone@gmail.com"), true), Some("lspd.example")),
            Membership::NotMember
        );
        assert_eq!(
            domain_membership(&identity(Some("chief@lspd.example"), false), Some("lspd.example")),
            Membership::NotMember
        );
        assert_eq!(domain_membership(&identity(None, true), None), Membership::NotMember);
    }

    #[test]
    fn authorize_url_includes_hosted_domain_hint() {
        let provider = GoogleProvider::new(
            GoogleConfig {
                client_id: Some("gid".into()),
                client_secret: Some("gsecret".into()),
                redirect_uri: Some("https://mdt.example/auth/google/callback".into()),
                allowed_domain: Some("lspd.example".into()),
            },
            reqwest::Client::new(),
        );

        let url = provider.authorize_url("st", "ch").expect("url");
        assert!(url.starts_with(AUTHORIZE_URL));
        assert!(url.contains("scope=openid%20email%20profile"));
        assert!(url.contains("code_challenge=ch"));
        assert!(url.contains("hd=lspd.example"));
        assert!(provider.is_configured());
    }
}
