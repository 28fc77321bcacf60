use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Actor roles, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    Operator,
    Admin,
    Manager,
}

impl Role {
    /// Parse a role claim. Unknown roles yield `None`.
    pub fn from_claim(claim: &str) -> Option<Self> {
        let claim = claim.trim();
        if claim.eq_ignore_ascii_case("manager") {
            Some(Role::Manager)
        } else if claim.eq_ignore_ascii_case("admin") {
            Some(Role::Admin)
        } else if claim.eq_ignore_ascii_case("operator") {
            Some(Role::Operator)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Operator => "Operator",
            Role::Admin => "Admin",
            Role::Manager => "Manager",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which devices an actor may see, derived from its most privileged role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceScope {
    /// Every device.
    Fleet,
    /// Own organization, unaffiliated devices, and personally owned devices.
    OrganizationAndUnaffiliated,
    /// Personally owned devices and own organization.
    OwnedAndOrganization,
    /// Nothing at all.
    Nothing,
}

/// The set of roles an actor holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_claims<'a, I>(claims: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self(claims.into_iter().filter_map(Role::from_claim).collect())
    }

    pub fn has(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn highest(&self) -> Option<Role> {
        self.0.iter().next_back().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }

    /// Roles are evaluated by privilege, never by claim order.
    pub fn device_scope(&self) -> DeviceScope {
        match self.highest() {
            Some(Role::Manager) => DeviceScope::Fleet,
            Some(Role::Admin) => DeviceScope::OrganizationAndUnaffiliated,
            Some(Role::Operator) => DeviceScope::OwnedAndOrganization,
            None => DeviceScope::Nothing,
        }
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<T: IntoIterator<Item = Role>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
