use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier carried in a credential (e.g. `"Admin"`, `"Customer"`).
///
/// Roles are opaque strings at this layer and compared case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Role {
    fn from(value: &'static str) -> Self {
        Self::from_static(value)
    }
}

/// Roles an operation requires.
///
/// An empty requirement admits any authenticated principal; otherwise the
/// principal must hold at least one of the listed roles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleRequirement {
    any_of: Vec<Role>,
}

impl RoleRequirement {
    /// Any authenticated principal.
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn any_of<I, R>(roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        Self {
            any_of: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn roles(&self) -> &[Role] {
        &self.any_of
    }

    pub fn is_empty(&self) -> bool {
        self.any_of.is_empty()
    }
}

impl core::fmt::Display for RoleRequirement {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.any_of.is_empty() {
            return f.write_str("<authenticated>");
        }
        let names: Vec<&str> = self.any_of.iter().map(Role::as_str).collect();
        f.write_str(&names.join("|"))
    }
}
