use serde::Serialize;
use utoipa::ToSchema;

use super::legacy;
use super::model::{Action, PagePermission, PageRestrictions, PermissionCondition, QuantityLimit, TimeRestrictions};
use super::principal::{PermissionContext, Principal};

pub const NOT_AUTHENTICATED: &str = "not authenticated";

/// Result of a single authorization question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub restrictions: Option<PageRestrictions>,
    pub requires_approval: bool,
    pub is_time_restricted: bool,
    pub is_2fa_required: bool,
}

impl PermissionDecision {
    pub fn allow() -> Self {
        Self { allowed: true, ..Default::default() }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: Some(reason.into()), ..Default::default() }
    }
}

/// Where a principal's envelope for one page can come from. Sources are tried in
/// order and the first one that yields a `PagePermission` is used.
pub trait PageGrantSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn grant(&self, principal: &Principal, page_id: &str) -> Option<PagePermission>;
}

/// The page permission carried in the principal's resolved mapping.
pub struct ExplicitGrant;

impl PageGrantSource for ExplicitGrant {
    fn name(&self) -> &'static str {
        "explicit"
    }

    fn grant(&self, principal: &Principal, page_id: &str) -> Option<PagePermission> {
        principal.page_permission(page_id).cloned()
    }
}

/// Coarse legacy permission for the page, implying view/edit/create.
pub struct LegacyPermissionGrant;

impl PageGrantSource for LegacyPermissionGrant {
    fn name(&self) -> &'static str {
        "legacy_permission"
    }

    fn grant(&self, principal: &Principal, page_id: &str) -> Option<PagePermission> {
        let legacy_id = legacy::legacy_permission_for_page(page_id)?;
        principal
            .has_permission(legacy_id)
            .then(|| PagePermission::new(page_id, legacy::LEGACY_ACTIONS))
    }
}

/// Narrow view/edit access for the mid-privilege role on two fixed pages.
pub struct MidRoleCarveOut;

impl PageGrantSource for MidRoleCarveOut {
    fn name(&self) -> &'static str {
        "mid_role_carve_out"
    }

    fn grant(&self, principal: &Principal, page_id: &str) -> Option<PagePermission> {
        legacy::carve_out_permission(&principal.role, page_id)
    }
}

pub struct PagePermissionEngine {
    sources: Vec<Box<dyn PageGrantSource>>,
}

impl Default for PagePermissionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PagePermissionEngine {
    pub fn new() -> Self {
        Self {
            sources: vec![Box::new(ExplicitGrant), Box::new(LegacyPermissionGrant), Box::new(MidRoleCarveOut)],
        }
    }

    /// Envelope for `page_id`, or `None` when the principal has no access.
    pub fn page_grant(&self, principal: &Principal, page_id: &str) -> Option<PagePermission> {
        self.sources.iter().find_map(|source| {
            let grant = source.grant(principal, page_id)?;
            tracing::trace!(source = source.name(), page = %page_id, "page grant");
            Some(grant)
        })
    }

    pub fn check(
        &self,
        principal: Option<&Principal>,
        page_id: &str,
        action: Action,
        ctx: &PermissionContext,
    ) -> PermissionDecision {
        let Some(principal) = principal else {
            return PermissionDecision::deny(NOT_AUTHENTICATED);
        };

        if principal.is_superadmin() {
            return PermissionDecision::allow();
        }

        let Some(grant) = self.page_grant(principal, page_id) else {
            tracing::debug!(user_id = %principal.user_id, page = %page_id, "no access to page");
            return PermissionDecision::deny(format!("no access to page '{page_id}'"));
        };

        if !grant.allows(action) {
            tracing::debug!(user_id = %principal.user_id, page = %page_id, action = %action, "action denied");
            return PermissionDecision::deny(format!("action '{action}' is not permitted on page '{page_id}'"));
        }

        if let Some(field) = ctx.field_id.as_deref() {
            if !field_permitted(&grant, field) {
                tracing::debug!(user_id = %principal.user_id, page = %page_id, field = %field, "field denied");
                return PermissionDecision::deny(format!("field '{field}' is not permitted on page '{page_id}'"));
            }
        }

        let mut decision = PermissionDecision::allow();
        for condition in grant.conditions() {
            match evaluate_condition(condition, principal, ctx) {
                ConditionOutcome::Pass => {}
                ConditionOutcome::RequiresApproval => decision.requires_approval = true,
                ConditionOutcome::TimeRestricted => decision.is_time_restricted = true,
                ConditionOutcome::Requires2fa => decision.is_2fa_required = true,
                ConditionOutcome::Deny(reason) => {
                    tracing::debug!(user_id = %principal.user_id, page = %page_id, reason = %reason, "condition denied");
                    return PermissionDecision::deny(reason);
                }
            }
        }

        decision.restrictions = grant.restrictions;
        decision
    }

    pub fn can_access_page(&self, principal: Option<&Principal>, page_id: &str) -> bool {
        !self.allowed_actions(principal, page_id).is_empty()
    }

    pub fn allowed_actions(&self, principal: Option<&Principal>, page_id: &str) -> Vec<Action> {
        let Some(principal) = principal else {
            return Vec::new();
        };
        if principal.is_superadmin() {
            return Action::ALL.to_vec();
        }
        self.page_grant(principal, page_id).map(|g| g.actions).unwrap_or_default()
    }

    /// Explicit sub-action list when the grant has one, otherwise the defaults
    /// for every allowed action.
    pub fn allowed_sub_actions(&self, principal: Option<&Principal>, page_id: &str) -> Vec<String> {
        let Some(principal) = principal else {
            return Vec::new();
        };

        let explicit = if principal.is_superadmin() {
            None
        } else {
            self.page_grant(principal, page_id).and_then(|g| g.sub_actions)
        };
        if let Some(sub_actions) = explicit {
            return sub_actions;
        }

        let mut sub_actions: Vec<String> = Vec::new();
        for action in self.allowed_actions(Some(principal), page_id) {
            for sub in legacy::default_sub_actions(action) {
                if !sub_actions.iter().any(|s| s == sub) {
                    sub_actions.push(sub.to_string());
                }
            }
        }
        sub_actions
    }

    /// `None` means every field is allowed.
    pub fn allowed_fields(&self, principal: Option<&Principal>, page_id: &str) -> Option<Vec<String>> {
        let principal = principal?;
        if principal.is_superadmin() {
            return None;
        }
        self.page_grant(principal, page_id)
            .and_then(|g| g.allowed_fields().map(|fields| fields.to_vec()))
    }

    pub fn blocked_fields(&self, principal: Option<&Principal>, page_id: &str) -> Vec<String> {
        match principal {
            Some(p) if !p.is_superadmin() => self
                .page_grant(p, page_id)
                .map(|g| g.blocked_fields().to_vec())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn can_access_field(&self, principal: Option<&Principal>, page_id: &str, field_id: &str) -> bool {
        let Some(principal) = principal else {
            return false;
        };
        if principal.is_superadmin() {
            return true;
        }
        self.page_grant(principal, page_id)
            .map(|g| field_permitted(&g, field_id))
            .unwrap_or(false)
    }

    pub fn time_restrictions(&self, principal: Option<&Principal>, page_id: &str) -> Option<TimeRestrictions> {
        let principal = principal.filter(|p| !p.is_superadmin())?;
        self.page_grant(principal, page_id)
            .and_then(|g| g.time_restrictions().cloned())
    }

    pub fn quantity_limits(&self, principal: Option<&Principal>, page_id: &str) -> Vec<QuantityLimit> {
        match principal {
            Some(p) if !p.is_superadmin() => self
                .page_grant(p, page_id)
                .map(|g| g.limits().to_vec())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

// Blocked list wins over the allowed list.
fn field_permitted(grant: &PagePermission, field_id: &str) -> bool {
    if grant.blocked_fields().iter().any(|f| f == field_id) {
        return false;
    }
    match grant.allowed_fields() {
        Some(allowed) => allowed.iter().any(|f| f == field_id),
        None => true,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConditionOutcome {
    Pass,
    RequiresApproval,
    TimeRestricted,
    Requires2fa,
    Deny(String),
}

fn evaluate_condition(
    condition: &PermissionCondition,
    principal: &Principal,
    ctx: &PermissionContext,
) -> ConditionOutcome {
    match condition {
        PermissionCondition::OwnItemsOnly => match ctx.owner_id.as_deref() {
            Some(owner) if owner != principal.user_id => {
                ConditionOutcome::Deny("can only modify own items".to_string())
            }
            _ => ConditionOutcome::Pass,
        },
        PermissionCondition::MaxPerDay { limit } => match ctx.today_count {
            Some(count) if count >= *limit => ConditionOutcome::Deny(format!("daily limit of {limit} reached")),
            _ => ConditionOutcome::Pass,
        },
        PermissionCondition::RequiresApproval => ConditionOutcome::RequiresApproval,
        PermissionCondition::TimeRestricted => ConditionOutcome::TimeRestricted,
        PermissionCondition::Requires2fa => ConditionOutcome::Requires2fa,
        PermissionCondition::IpWhitelist { allowed_ips } => match ctx.ip.as_deref() {
            Some(ip) if allowed_ips.iter().any(|allowed| allowed == ip) => ConditionOutcome::Pass,
            _ => ConditionOutcome::Deny("IP address not allowed".to_string()),
        },
        PermissionCondition::SubdivisionOnly { group_ids } => match ctx.group_id.as_deref() {
            Some(group) if !group_ids.iter().any(|g| g == group) => {
                ConditionOutcome::Deny("restricted to assigned subdivisions".to_string())
            }
            _ => ConditionOutcome::Pass,
        },
    }
}
