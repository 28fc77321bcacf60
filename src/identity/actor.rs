use serde::Serialize;

use super::role::{DeviceScope, Role, RoleSet};

/// The authenticated user as seen by the visibility policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub roles: RoleSet,
    pub user_name: Option<String>,
    /// `None` until hydration resolves it, or when the user is unaffiliated.
    pub organization: Option<String>,
}

impl Actor {
    pub fn new(roles: RoleSet, user_name: impl Into<String>) -> Self {
        Self {
            roles,
            user_name: Some(user_name.into()),
            organization: None,
        }
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.has(role)
    }

    pub fn device_scope(&self) -> DeviceScope {
        self.roles.device_scope()
    }

    /// The organization, treating a blank string as absent. Present values
    /// are returned verbatim so they compare exactly against device records.
    pub fn organization(&self) -> Option<&str> {
        self.organization
            .as_deref()
            .filter(|org| !org.trim().is_empty())
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref().filter(|name| !name.is_empty())
    }
}
