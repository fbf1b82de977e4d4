//! `bazaar-auth`: credential validation and role checks.
//!
//! This crate is intentionally decoupled from HTTP and from the pipeline: it
//! turns a bearer token into a [`Principal`] and answers "may this principal
//! run an operation that requires these roles?".

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{CredentialError, CredentialValidator, HmacJwtValidator, JwtSettings};
pub use principal::{Principal, PrincipalId};
pub use roles::{Role, RoleRequirement};
