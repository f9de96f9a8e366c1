use std::sync::Arc;
use std::time::Duration;

use super::cache::TtlCache;
use super::legacy;
use super::model::{RoleMapping, RoleMappingConfig};
use super::principal::{ResolutionSource, RoleResolution};
use super::roles;
use crate::store::ConfigStore;

/// One step of role resolution. Strategies are tried in order; the first one
/// returning `Some` decides the role.
pub trait RoleStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn resolve(&self, membership_roles: &[String]) -> Option<RoleResolution>;
}

/// Admin-editable mappings: active entries only, highest priority first.
pub struct MappingTableStrategy {
    config: Arc<RoleMappingConfig>,
}

impl MappingTableStrategy {
    pub fn new(config: Arc<RoleMappingConfig>) -> Self {
        Self { config }
    }

    fn ordered(&self) -> Vec<&RoleMapping> {
        let mut active: Vec<&RoleMapping> = self.config.mappings.iter().filter(|m| m.is_active).collect();
        // Stable sort: equal priorities keep their stored order.
        active.sort_by(|a, b| b.priority.cmp(&a.priority));
        active
    }
}

impl RoleStrategy for MappingTableStrategy {
    fn name(&self) -> &'static str {
        "mapping_table"
    }

    fn resolve(&self, membership_roles: &[String]) -> Option<RoleResolution> {
        self.ordered()
            .into_iter()
            .find(|m| membership_roles.iter().any(|r| r == &m.provider_role_id))
            .map(|m| RoleResolution {
                role: m.internal_role.clone(),
                permissions: m.permissions.clone(),
                page_permissions: m.page_permissions.clone(),
                source: ResolutionSource::Mapping { mapping_id: m.id.clone() },
            })
    }
}

/// Provider role ids for the three static roles, from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyRoleIds {
    pub superadmin: Option<String>,
    pub admin: Option<String>,
    pub moderator: Option<String>,
}

pub struct LegacyRoleStrategy {
    ids: LegacyRoleIds,
}

impl LegacyRoleStrategy {
    pub fn new(ids: LegacyRoleIds) -> Self {
        Self { ids }
    }
}

impl RoleStrategy for LegacyRoleStrategy {
    fn name(&self) -> &'static str {
        "legacy_roles"
    }

    fn resolve(&self, membership_roles: &[String]) -> Option<RoleResolution> {
        let checks = [
            (&self.ids.superadmin, roles::SUPERADMIN),
            (&self.ids.admin, roles::ADMIN),
            (&self.ids.moderator, roles::MODERATOR),
        ];

        checks.into_iter().find_map(|(id, role)| {
            let id = id.as_deref().filter(|id| !id.is_empty())?;
            if membership_roles.iter().any(|r| r == id) {
                static_resolution(role)
            } else {
                None
            }
        })
    }
}

/// Resolution for a static legacy role name, used by both the legacy strategy
/// and the local credential login.
pub fn static_resolution(role: &str) -> Option<RoleResolution> {
    legacy::static_permissions(role).map(|permissions| RoleResolution {
        role: role.to_string(),
        permissions,
        page_permissions: None,
        source: ResolutionSource::Legacy,
    })
}

pub struct RoleMappingResolver {
    store: Arc<dyn ConfigStore>,
    cache: TtlCache<RoleMappingConfig>,
    legacy_ids: LegacyRoleIds,
}

impl RoleMappingResolver {
    pub fn new(store: Arc<dyn ConfigStore>, cache_ttl: Duration, legacy_ids: LegacyRoleIds) -> Self {
        Self { store, cache: TtlCache::new(cache_ttl), legacy_ids }
    }

    /// Current mapping table. A store failure with nothing cached reads as an
    /// empty table, so resolution degrades to the legacy roles.
    pub async fn mappings(&self) -> Arc<RoleMappingConfig> {
        let store = Arc::clone(&self.store);
        match self.cache.get_or_refresh(|| async move { store.load_role_mappings().await }).await {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, "role mappings unavailable, using legacy roles only");
                Arc::new(RoleMappingConfig::default())
            }
        }
    }

    /// Drops the cached table so the next resolve reads the store.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    pub async fn strategies(&self) -> Vec<Box<dyn RoleStrategy>> {
        vec![
            Box::new(MappingTableStrategy::new(self.mappings().await)),
            Box::new(LegacyRoleStrategy::new(self.legacy_ids.clone())),
        ]
    }

    /// `None` means the identity has no role at all.
    pub async fn resolve(&self, membership_roles: &[String]) -> Option<RoleResolution> {
        for strategy in self.strategies().await {
            if let Some(resolution) = strategy.resolve(membership_roles) {
                tracing::debug!(
                    strategy = strategy.name(),
                    role = %resolution.role,
                    "role resolved"
                );
                return Some(resolution);
            }
        }

        tracing::debug!(roles = ?membership_roles, "no role resolved");
        None
    }
}
