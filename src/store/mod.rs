//! Persistence seams: the key-value document store holding the role-mapping
//! record, and the legacy local credential store.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::authz::RoleMappingConfig;
use crate::errors::AppResult;

pub const ROLE_MAPPINGS_KEY: &str = "role_mappings";

/// Read-mostly configuration consumed by the role-mapping resolver.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Current role-mapping record; a missing record reads as empty.
    async fn load_role_mappings(&self) -> AppResult<RoleMappingConfig>;

    /// Replaces the record, bumping its version.
    async fn save_role_mappings(&self, config: &RoleMappingConfig) -> AppResult<u32>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_credential(&self, username: &str) -> AppResult<Option<Credential>>;

    async fn update_password_hash(&self, username: &str, password_hash: &str) -> AppResult<()>;

    async fn upsert_credential(&self, username: &str, password_hash: &str, role: &str) -> AppResult<()>;
}
