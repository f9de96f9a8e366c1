use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod severity;
pub use severity::Severity;

use crate::errors::AppResult;
use crate::providers::ProviderKind;

/// Audit event names
pub mod names {
    pub const LOGIN_SUCCEEDED: &str = "login.succeeded";
    pub const LOGIN_FAILED: &str = "login.failed";
    pub const LOGOUT: &str = "logout";
    pub const PERMISSION_DENIED: &str = "permission.denied";
    pub const ROLE_MAPPINGS_INVALIDATED: &str = "role_mappings.invalidated";
    pub const CREDENTIAL_REHASHED: &str = "credential.rehashed";
}

/// Request context for audit events (IP, User-Agent)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Extract context from request headers; the first `x-forwarded-for` hop wins.
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.trim().to_string())
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self { ip, user_agent }
    }

    /// Address to authorize against. Forwarded headers count only when the
    /// socket peer is a trusted proxy; without a known peer there is no address.
    pub fn client_ip(
        peer: Option<IpAddr>,
        headers: &axum::http::HeaderMap,
        trusted_proxies: &[IpAddr],
    ) -> Option<String> {
        let peer = peer?;
        if trusted_proxies.contains(&peer) {
            if let Some(forwarded) = Self::from_headers(headers).ip {
                return Some(forwarded);
            }
        }
        Some(peer.to_string())
    }
}

/// One security-relevant fact. Never carries codes, tokens, verifiers or passwords.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub name: &'static str,
    pub category: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    pub severity: Severity,
    pub occurred_at: DateTime<Utc>,
    pub context: RequestContext,
}

impl AuditEvent {
    pub fn new(name: &'static str, category: &'static str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            category,
            reason: None,
            actor_id: None,
            provider: None,
            severity: Severity::for_event(name),
            occurred_at: Utc::now(),
            context: RequestContext::default(),
        }
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

#[derive(Clone)]
pub struct AuditBus {
    tx: broadcast::Sender<AuditEvent>,
}

impl AuditBus {
    pub fn new() -> (Self, broadcast::Receiver<AuditEvent>) {
        let (tx, rx) = broadcast::channel(1024);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.tx.subscribe()
    }

    /// Fire and forget; a missing listener never fails the request.
    pub fn record(&self, event: AuditEvent) {
        tracing::info!(
            event = event.name,
            actor_id = event.actor_id.as_deref().unwrap_or("-"),
            reason = event.reason.as_deref().unwrap_or("-"),
            "audit"
        );
        let _ = self.tx.send(event);
    }
}

pub async fn start_audit_listener(mut rx: broadcast::Receiver<AuditEvent>, pool: SqlitePool) {
    tracing::info!("audit listener started");
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(err) = persist(&pool, &event).await {
                    tracing::error!(event = event.name, error = %err, "failed to persist audit event");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "audit listener lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::info!("audit listener stopped");
}

fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Appends one event, chaining SHA-256(prev_hash || payload).
pub async fn persist(pool: &SqlitePool, event: &AuditEvent) -> AppResult<()> {
    let payload = serde_json::to_string(event).map_err(|err| crate::errors::AppError::internal(err.to_string()))?;

    let mut tx = pool.begin().await?;
    let prev_hash: Option<String> = sqlx::query_scalar("SELECT hash FROM audit_log ORDER BY seq DESC LIMIT 1")
        .fetch_optional(&mut *tx)
        .await?;
    let hash = chain_hash(prev_hash.as_deref(), &payload);

    sqlx::query(
        "INSERT INTO audit_log (id, event_name, category, severity, actor_id, provider, reason, occurred_at, payload, prev_hash, hash) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(event.id.to_string())
    .bind(event.name)
    .bind(event.category)
    .bind(event.severity.as_str())
    .bind(event.actor_id.as_deref())
    .bind(event.provider.map(|p| p.as_str()))
    .bind(event.reason.as_deref())
    .bind(event.occurred_at)
    .bind(&payload)
    .bind(prev_hash.as_deref())
    .bind(&hash)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Recomputes the chain; `false` means a row was edited or removed.
pub async fn verify_chain(pool: &SqlitePool) -> AppResult<bool> {
    let rows = sqlx::query("SELECT payload, prev_hash, hash FROM audit_log ORDER BY seq ASC")
        .fetch_all(pool)
        .await?;

    let mut prev: Option<String> = None;
    for row in rows {
        let payload: String = row.get("payload");
        let stored_prev: Option<String> = row.get("prev_hash");
        let hash: String = row.get("hash");

        if stored_prev != prev || chain_hash(prev.as_deref(), &payload) != hash {
            return Ok(false);
        }
        prev = Some(hash);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn context_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(RequestContext::from_headers(&headers).ip.as_deref(), Some("203.0.113.7"));

        headers.remove("x-forwarded-for");
        assert_eq!(RequestContext::from_headers(&headers).ip.as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn forwarded_headers_only_count_behind_trusted_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        let proxy: IpAddr = "172.16.0.2".parse().unwrap();
        let stranger: IpAddr = "203.0.113.9".parse().unwrap();

        assert_eq!(RequestContext::client_ip(Some(stranger), &headers, &[proxy]).as_deref(), Some("203.0.113.9"));
        assert_eq!(RequestContext::client_ip(Some(proxy), &headers, &[proxy]).as_deref(), Some("10.0.0.1"));
        assert_eq!(RequestContext::client_ip(None, &headers, &[proxy]), None);
        assert_eq!(
            RequestContext::client_ip(Some(proxy), &HeaderMap::new(), &[proxy]).as_deref(),
            Some("172.16.0.2")
        );
    }

    #[test]
    fn chain_depends_on_previous_hash() {
        let first = chain_hash(None, "{}");
        assert_ne!(chain_hash(Some(&first), "{}"), first);
    }

    #[tokio::test]
    async fn bus_delivers_to_subscribers() {
        let (bus, mut rx) = AuditBus::new();
        bus.record(AuditEvent::new(names::LOGOUT, "auth").with_actor("42"));
        let event = rx.recv().await.expect("event");
        assert_eq!(event.name, names::LOGOUT);
        assert_eq!(event.actor_id.as_deref(), Some("42"));
    }
}
