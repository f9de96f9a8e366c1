use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    View,
    Create,
    Edit,
    Delete,
    Approve,
    Export,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::View,
        Action::Create,
        Action::Edit,
        Action::Delete,
        Action::Approve,
        Action::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Approve => "approve",
            Action::Export => "export",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str().eq_ignore_ascii_case(value))
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_active() -> bool {
    true
}

/// Admin-configured rule translating one provider role into an internal role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleMapping {
    pub id: String,
    pub provider_role_id: String,
    pub internal_role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_permissions: Option<Vec<PagePermission>>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// One entry of the legacy-compatible permission catalog shown to administrators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub pages: Vec<String>,
}

/// The persisted, versioned role-mapping record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleMappingConfig {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub mappings: Vec<RoleMapping>,
    #[serde(default)]
    pub catalog: Vec<CatalogEntry>,
}

impl RoleMappingConfig {
    /// Mapping ids must be unique and catalog entries may only name known pages.
    pub fn validate(&self) -> Result<(), String> {
        let mut ids = std::collections::HashSet::new();
        if let Some(dup) = self.mappings.iter().find(|m| !ids.insert(m.id.as_str())) {
            return Err(format!("duplicate mapping id '{}'", dup.id));
        }

        for entry in &self.catalog {
            if let Some(page) = entry
                .pages
                .iter()
                .find(|page| super::legacy::legacy_permission_for_page(page).is_none())
            {
                return Err(format!("catalog entry '{}' names unknown page '{page}'", entry.id));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagePermission {
    pub page_id: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_actions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<PageRestrictions>,
}

impl PagePermission {
    pub fn new(page_id: impl Into<String>, actions: impl IntoIterator<Item = Action>) -> Self {
        Self {
            page_id: page_id.into(),
            actions: actions.into_iter().collect(),
            sub_actions: None,
            restrictions: None,
        }
    }

    pub fn with_restrictions(mut self, restrictions: PageRestrictions) -> Self {
        self.restrictions = Some(restrictions);
        self
    }

    pub fn with_sub_actions(mut self, sub_actions: impl IntoIterator<Item = String>) -> Self {
        self.sub_actions = Some(sub_actions.into_iter().collect());
        self
    }

    pub fn allows(&self, action: Action) -> bool {
        self.actions.contains(&action)
    }

    pub fn allowed_fields(&self) -> Option<&[String]> {
        self.restrictions
            .as_ref()
            .and_then(|r| r.allowed_fields.as_deref())
            .filter(|fields| !fields.is_empty())
    }

    pub fn blocked_fields(&self) -> &[String] {
        self.restrictions
            .as_ref()
            .and_then(|r| r.blocked_fields.as_deref())
            .unwrap_or(&[])
    }

    pub fn conditions(&self) -> &[PermissionCondition] {
        self.restrictions
            .as_ref()
            .and_then(|r| r.conditions.as_deref())
            .unwrap_or(&[])
    }

    pub fn time_restrictions(&self) -> Option<&TimeRestrictions> {
        self.restrictions.as_ref().and_then(|r| r.time_restrictions.as_ref())
    }

    pub fn limits(&self) -> &[QuantityLimit] {
        self.restrictions
            .as_ref()
            .and_then(|r| r.limits.as_deref())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRestrictions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<PermissionCondition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_restrictions: Option<TimeRestrictions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Vec<QuantityLimit>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PermissionCondition {
    OwnItemsOnly,
    MaxPerDay {
        limit: u32,
    },
    RequiresApproval,
    TimeRestricted,
    #[serde(rename = "requires_2fa")]
    Requires2fa,
    IpWhitelist {
        #[serde(rename = "allowedIps", default)]
        allowed_ips: Vec<String>,
    },
    SubdivisionOnly {
        #[serde(rename = "groupIds", default)]
        group_ids: Vec<String>,
    },
}

/// UTC window during which a page may be used. Hours are `[start, end)`, and a
/// window with `start > end` wraps past midnight. Days are 0 = Sunday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRestrictions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_days: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_hour: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_hour: Option<u8>,
}

impl TimeRestrictions {
    pub fn allows(&self, at: DateTime<Utc>) -> bool {
        if let Some(days) = &self.allowed_days {
            let weekday = at.weekday().num_days_from_sunday() as u8;
            if !days.is_empty() && !days.contains(&weekday) {
                return false;
            }
        }

        let hour = at.hour() as u8;
        match (self.start_hour, self.end_hour) {
            (Some(start), Some(end)) if start <= end => hour >= start && hour < end,
            (Some(start), Some(end)) => hour >= start || hour < end,
            (Some(start), None) => hour >= start,
            (None, Some(end)) => hour < end,
            (None, None) => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitPeriod {
    Day,
    Week,
    Month,
    Total,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantityLimit {
    pub action: Action,
    pub max: u32,
    pub period: LimitPeriod,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn mapping_defaults_to_active() {
        let mapping: RoleMapping = serde_json::from_value(serde_json::json!({
            "id": "m1",
            "providerRoleId": "123",
            "internalRole": "admin",
            "priority": 3
        }))
        .expect("mapping");
        assert!(mapping.is_active);
        assert!(mapping.permissions.is_empty());
        assert!(mapping.page_permissions.is_none());
    }

    #[test]
    fn conditions_deserialize_from_tagged_json() {
        let conditions: Vec<PermissionCondition> = serde_json::from_value(serde_json::json!([
            { "type": "own_items_only" },
            { "type": "max_per_day", "limit": 3 },
            { "type": "requires_2fa" },
            { "type": "ip_whitelist", "allowedIps": ["10.0.0.1"] },
            { "type": "subdivision_only", "groupIds": ["swat"] }
        ]))
        .expect("conditions");

        assert_eq!(conditions[0], PermissionCondition::OwnItemsOnly);
        assert_eq!(conditions[1], PermissionCondition::MaxPerDay { limit: 3 });
        assert_eq!(conditions[2], PermissionCondition::Requires2fa);
        assert_eq!(
            conditions[3],
            PermissionCondition::IpWhitelist { allowed_ips: vec!["10.0.0.1".into()] }
        );
        assert_eq!(
            conditions[4],
            PermissionCondition::SubdivisionOnly { group_ids: vec!["swat".into()] }
        );
    }

    #[test]
    fn empty_allowed_fields_means_unrestricted() {
        let perm = PagePermission::new("events", [Action::View]).with_restrictions(PageRestrictions {
            allowed_fields: Some(vec![]),
            ..Default::default()
        });
        assert_eq!(perm.allowed_fields(), None);
    }

    #[test]
    fn time_window_wraps_midnight() {
        let night = TimeRestrictions { allowed_days: None, start_hour: Some(22), end_hour: Some(6) };
        assert!(night.allows(Utc.with_ymd_and_hms(2025, 3, 3, 23, 0, 0).unwrap()));
        assert!(night.allows(Utc.with_ymd_and_hms(2025, 3, 3, 5, 59, 0).unwrap()));
        assert!(!night.allows(Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap()));
    }

    #[test]
    fn time_window_checks_weekday() {
        // 2025-03-02 is a Sunday.
        let weekdays = TimeRestrictions { allowed_days: Some(vec![1, 2, 3, 4, 5]), start_hour: None, end_hour: None };
        assert!(!weekdays.allows(Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap()));
        assert!(weekdays.allows(Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap()));
    }

    #[test]
    fn validate_rejects_duplicate_ids_and_unknown_catalog_pages() {
        let mut config: RoleMappingConfig = serde_json::from_value(serde_json::json!({
            "mappings": [
                { "id": "m1", "providerRoleId": "1", "internalRole": "admin" },
                { "id": "m2", "providerRoleId": "2", "internalRole": "moderator" }
            ],
            "catalog": [{ "id": "manage_events", "label": "Events", "pages": ["events"] }]
        }))
        .expect("config");
        assert_eq!(config.validate(), Ok(()));

        config.catalog[0].pages.push("armory".into());
        assert!(config.validate().unwrap_err().contains("armory"));

        config.catalog.clear();
        config.mappings[1].id = "m1".into();
        assert!(config.validate().unwrap_err().contains("duplicate"));
    }

    #[test]
    fn action_parse_is_case_insensitive() {
        assert_eq!(Action::parse("EDIT"), Some(Action::Edit));
        assert_eq!(Action::parse("publish"), None);
    }
}
