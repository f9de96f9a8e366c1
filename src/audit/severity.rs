use serde::{Deserialize, Serialize};

/// Severity levels for audit events.
/// Controls retention policies and log filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Long-term retention, never auto-deleted
    Critical,
    /// Medium-term retention
    #[default]
    Important,
    /// Aggressively trimmed
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }

    /// Default severity for an event name.
    pub fn for_event(name: &str) -> Self {
        match name {
            super::names::LOGIN_FAILED | super::names::ROLE_MAPPINGS_INVALIDATED => Severity::Critical,
            super::names::PERMISSION_DENIED => Severity::Noise,
            _ => Severity::Important,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::names;

    #[test]
    fn failures_are_kept_longest() {
        assert_eq!(Severity::for_event(names::LOGIN_FAILED), Severity::Critical);
        assert_eq!(Severity::for_event(names::LOGIN_SUCCEEDED), Severity::Important);
        assert_eq!(Severity::for_event(names::PERMISSION_DENIED), Severity::Noise);
        assert_eq!(Severity::Noise.as_str(), "noise");
    }
}
