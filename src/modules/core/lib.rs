//! Core domain logic for Polyquery
//!
//! This crate contains the domain models, the error type and the collaborator
//! interfaces (secret store, authorizer, insight generator) shared by the
//! parser and the runtime.

pub mod domain;
pub mod error;
pub mod traits;

pub use domain::*;
pub use error::PolyqueryError;
pub use traits::{Authorizer, Decision, InsightGenerator, SecretStore};
