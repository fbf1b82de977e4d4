use thiserror::Error;

use bazaar_core::ErrorKind;

use crate::{Principal, RoleRequirement};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("missing or invalid credential")]
    Unauthenticated,

    #[error("forbidden: requires one of roles '{0}'")]
    Forbidden(String),
}

impl AuthzError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthzError::Unauthenticated => ErrorKind::Unauthorized,
            AuthzError::Forbidden(_) => ErrorKind::Forbidden,
        }
    }
}

/// Check a principal against an operation's role requirement.
///
/// - No IO
/// - No panics
/// - Any-of semantics: one matching role is enough
pub fn authorize(principal: &Principal, required: &RoleRequirement) -> Result<(), AuthzError> {
    if required.is_empty() || required.roles().iter().any(|r| principal.has_role(r)) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PrincipalId, Role};

    fn customer() -> Principal {
        Principal::new(PrincipalId::new("7"), [Role::from_static("Customer")])
    }

    #[test]
    fn empty_requirement_admits_any_principal() {
        let nobody = Principal::new(PrincipalId::new("9"), []);
        assert_eq!(authorize(&nobody, &RoleRequirement::authenticated()), Ok(()));
    }

    #[test]
    fn one_matching_role_is_enough() {
        let req = RoleRequirement::any_of(["Admin", "Customer"]);
        assert_eq!(authorize(&customer(), &req), Ok(()));
    }

    #[test]
    fn missing_role_is_forbidden() {
        let err = authorize(&customer(), &RoleRequirement::any_of(["Admin"])).unwrap_err();
        assert_eq!(err, AuthzError::Forbidden("Admin".into()));
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn role_names_are_case_sensitive() {
        let req = RoleRequirement::any_of(["customer"]);
        assert!(authorize(&customer(), &req).is_err());
    }
}
