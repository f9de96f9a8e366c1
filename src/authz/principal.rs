use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::model::PagePermission;
use crate::providers::ProviderKind;

/// Principal represents the authenticated user as carried by a validated session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub display_name: String,
    pub provider: ProviderKind,
    pub role: String,
    pub permissions: HashSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_permissions: Option<Vec<PagePermission>>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, role: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            display_name: String::new(),
            provider: ProviderKind::Local,
            role: role.into(),
            permissions: HashSet::new(),
            page_permissions: None,
            issued_at: now,
            expires_at: now,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_permissions(mut self, perms: impl IntoIterator<Item = String>) -> Self {
        self.permissions = perms.into_iter().collect();
        self
    }

    pub fn with_page_permissions(mut self, page_permissions: Option<Vec<PagePermission>>) -> Self {
        self.page_permissions = page_permissions;
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn is_superadmin(&self) -> bool {
        self.role == super::roles::SUPERADMIN
    }

    pub fn page_permission(&self, page_id: &str) -> Option<&PagePermission> {
        self.page_permissions
            .as_ref()
            .and_then(|pages| pages.iter().find(|p| p.page_id == page_id))
    }
}

/// Where a role resolution came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionSource {
    Mapping { mapping_id: String },
    Legacy,
}

/// Output of the role-mapping resolver for one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleResolution {
    pub role: String,
    pub permissions: Vec<String>,
    pub page_permissions: Option<Vec<PagePermission>>,
    pub source: ResolutionSource,
}

/// Request-specific inputs for conditional restrictions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PermissionContext {
    pub field_id: Option<String>,
    pub owner_id: Option<String>,
    pub ip: Option<String>,
    pub group_id: Option<String>,
    pub today_count: Option<u32>,
}

impl PermissionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, field_id: impl Into<String>) -> Self {
        self.field_id = Some(field_id.into());
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_today_count(mut self, count: u32) -> Self {
        self.today_count = Some(count);
        self
    }
}
