//! `bazaar-core`: shared building blocks for the cross-cutting layer.
//!
//! This crate contains **pure** primitives (no IO, no async): the error
//! taxonomy, the `Outcome` every pipeline stage returns, and the identity of an
//! operation call.

pub mod environment;
pub mod error;
pub mod id;
pub mod operation;
pub mod outcome;

pub use environment::Environment;
pub use error::{AppError, AppResult, ErrorKind};
pub use id::{EventId, RequestId};
pub use operation::{KeyPart, OperationId, json_arg};
pub use outcome::{Failure, Outcome};
