use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::Role;

/// Identity of an authenticated principal, as carried in the token's `sub`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(subject: impl Into<String>) -> Self {
        Self(subject.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric user id, for subjects issued by the shop's user store.
    pub fn as_user_id(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl core::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved identity, valid for one pipeline execution only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: PrincipalId,
    pub email: Option<String>,
    pub roles: BTreeSet<Role>,
}

impl Principal {
    pub fn new(id: PrincipalId, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            id,
            email: None,
            roles: roles.into_iter().collect(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }
}
