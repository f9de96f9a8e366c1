//! Authorization: role resolution and page permissions
//!
//! This module implements:
//! - The admin-editable role-mapping table, with a TTL cache in front of the store
//! - The static legacy roles used when no mapping matches
//! - The page permission engine (explicit grants, legacy permissions, carve-out)
//! - Superadmin bypass

mod cache;
mod engine;
pub mod legacy;
mod model;
mod principal;
mod resolver;

pub use cache::TtlCache;
pub use engine::{PageGrantSource, PagePermissionEngine, PermissionDecision, NOT_AUTHENTICATED};
pub use model::{
    Action, CatalogEntry, LimitPeriod, PagePermission, PageRestrictions, PermissionCondition, QuantityLimit,
    RoleMapping, RoleMappingConfig, TimeRestrictions,
};
pub use principal::{PermissionContext, Principal, ResolutionSource, RoleResolution};
pub use resolver::{
    static_resolution, LegacyRoleIds, LegacyRoleStrategy, MappingTableStrategy, RoleMappingResolver, RoleStrategy,
};

/// Well-known role names
pub mod roles {
    pub const SUPERADMIN: &str = "superadmin";
    pub const ADMIN: &str = "admin";
    pub const MODERATOR: &str = "moderator";
}
