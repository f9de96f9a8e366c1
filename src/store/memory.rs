use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{ConfigStore, Credential, CredentialStore};
use crate::authz::RoleMappingConfig;
use crate::errors::{AppError, AppResult};

/// In-process store used by tests and local experiments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    role_mappings: Mutex<Option<RoleMappingConfig>>,
    credentials: Mutex<HashMap<String, Credential>>,
    fail_loads: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role_mappings(config: RoleMappingConfig) -> Self {
        let store = Self::new();
        *store.role_mappings.lock() = Some(config);
        store
    }

    /// Makes subsequent `load_role_mappings` calls fail, to simulate an outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.fail_loads.lock() = unavailable;
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn load_role_mappings(&self) -> AppResult<RoleMappingConfig> {
        if *self.fail_loads.lock() {
            return Err(AppError::internal("document store unavailable"));
        }
        Ok(self.role_mappings.lock().clone().unwrap_or_default())
    }

    async fn save_role_mappings(&self, config: &RoleMappingConfig) -> AppResult<u32> {
        let mut slot = self.role_mappings.lock();
        let version = slot.as_ref().map(|c| c.version).unwrap_or(0) + 1;
        let mut stored = config.clone();
        stored.version = version;
        *slot = Some(stored);
        Ok(version)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_credential(&self, username: &str) -> AppResult<Option<Credential>> {
        Ok(self.credentials.lock().get(username).cloned())
    }

    async fn update_password_hash(&self, username: &str, password_hash: &str) -> AppResult<()> {
        let mut credentials = self.credentials.lock();
        let credential = credentials
            .get_mut(username)
            .ok_or_else(|| AppError::not_found("credential not found"))?;
        credential.password_hash = password_hash.to_string();
        credential.updated_at = Utc::now();
        Ok(())
    }

    async fn upsert_credential(&self, username: &str, password_hash: &str, role: &str) -> AppResult<()> {
        let now = Utc::now();
        let mut credentials = self.credentials.lock();
        let created_at = credentials.get(username).map(|c| c.created_at).unwrap_or(now);
        credentials.insert(
            username.to_string(),
            Credential {
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                role: role.to_string(),
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }
}
