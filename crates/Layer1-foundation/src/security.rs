//! Security context supplied by the external authentication layer
//!
//! Berth never produces these itself; it only reads the caller id to seed task
//! parameters and copies the context into task metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const ANONYMOUS_CALLER: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    pub caller_id: String,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub admin: bool,
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl SecurityContext {
    pub fn anonymous() -> Self {
        Self {
            caller_id: ANONYMOUS_CALLER.to_string(),
            permissions: BTreeSet::new(),
            authenticated: false,
            admin: false,
        }
    }

    pub fn authenticated(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            authenticated: true,
            ..Self::anonymous()
        }
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.admin || self.permissions.contains(permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions() {
        let ctx = SecurityContext::authenticated("u1").with_permission("deploy");
        assert!(ctx.authenticated);
        assert!(ctx.has_permission("deploy"));
        assert!(!ctx.has_permission("admin:remove"));

        let admin = SecurityContext::authenticated("root").with_admin(true);
        assert!(admin.has_permission("anything"));
    }

    #[test]
    fn test_anonymous_default() {
        let ctx = SecurityContext::default();
        assert_eq!(ctx.caller_id, ANONYMOUS_CALLER);
        assert!(!ctx.authenticated);
    }
}
