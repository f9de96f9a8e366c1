//! Fixed tables from the coarse permission model that predates role mappings.

use super::model::{Action, PagePermission, PageRestrictions};
use super::roles;

/// Page id -> legacy permission id.
pub const PAGE_PERMISSIONS: &[(&str, &str)] = &[
    ("dashboard", "view_dashboard"),
    ("events", "manage_events"),
    ("resources", "manage_resources"),
    ("subdivisions", "manage_subdivisions"),
    ("training", "manage_training"),
    ("reports", "view_reports"),
    ("members", "manage_members"),
    ("roster", "manage_roster"),
    ("settings", "manage_settings"),
    ("role_mappings", "manage_roles"),
    ("audit_log", "view_audit_log"),
];

pub const LEGACY_ACTIONS: [Action; 3] = [Action::View, Action::Edit, Action::Create];

const ADMIN_PERMISSIONS: &[&str] = &[
    "view_dashboard",
    "manage_events",
    "manage_resources",
    "view_reports",
    "manage_members",
    "manage_roster",
];

const MODERATOR_PERMISSIONS: &[&str] = &["view_dashboard", "manage_events", "view_reports"];

/// Pages the mid-privilege role may view and edit without any mapping,
/// limited to `CARVE_OUT_FIELDS`.
pub const CARVE_OUT_PAGES: [&str; 2] = ["subdivisions", "training"];
pub const CARVE_OUT_ACTIONS: [Action; 2] = [Action::View, Action::Edit];
pub const CARVE_OUT_FIELDS: [&str; 3] = ["availability", "status", "notes"];

pub fn legacy_permission_for_page(page_id: &str) -> Option<&'static str> {
    PAGE_PERMISSIONS
        .iter()
        .find(|(page, _)| *page == page_id)
        .map(|(_, perm)| *perm)
}

/// Static permission set for a legacy role name, or `None` for unknown roles.
pub fn static_permissions(role: &str) -> Option<Vec<String>> {
    let perms: Vec<&str> = match role {
        roles::SUPERADMIN => PAGE_PERMISSIONS.iter().map(|(_, perm)| *perm).collect(),
        roles::ADMIN => ADMIN_PERMISSIONS.to_vec(),
        roles::MODERATOR => MODERATOR_PERMISSIONS.to_vec(),
        _ => return None,
    };
    Some(perms.into_iter().map(String::from).collect())
}

pub fn carve_out_permission(role: &str, page_id: &str) -> Option<PagePermission> {
    if role != roles::ADMIN || !CARVE_OUT_PAGES.contains(&page_id) {
        return None;
    }

    Some(
        PagePermission::new(page_id, CARVE_OUT_ACTIONS).with_restrictions(PageRestrictions {
            allowed_fields: Some(CARVE_OUT_FIELDS.iter().map(|f| f.to_string()).collect()),
            ..Default::default()
        }),
    )
}

pub fn default_sub_actions(action: Action) -> &'static [&'static str] {
    match action {
        Action::View => &["list", "details"],
        Action::Create => &["create", "duplicate"],
        Action::Edit => &["update", "reorder"],
        Action::Delete => &["delete", "archive"],
        Action::Approve => &["approve", "reject"],
        Action::Export => &["export_csv"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superadmin_holds_every_legacy_permission() {
        let perms = static_permissions(roles::SUPERADMIN).expect("known role");
        assert_eq!(perms.len(), PAGE_PERMISSIONS.len());
    }

    #[test]
    fn admin_does_not_hold_carve_out_pages() {
        let perms = static_permissions(roles::ADMIN).expect("known role");
        for page in CARVE_OUT_PAGES {
            let legacy = legacy_permission_for_page(page).expect("page mapped");
            assert!(!perms.iter().any(|p| p == legacy), "{page} would bypass the field allow-list");
        }
    }

    #[test]
    fn carve_out_only_for_admin_on_two_pages() {
        assert!(carve_out_permission(roles::ADMIN, "subdivisions").is_some());
        assert!(carve_out_permission(roles::ADMIN, "training").is_some());
        assert!(carve_out_permission(roles::ADMIN, "events").is_none());
        assert!(carve_out_permission(roles::MODERATOR, "subdivisions").is_none());
    }

    #[test]
    fn unknown_role_has_no_static_permissions() {
        assert!(static_permissions("cadet").is_none());
    }
}
