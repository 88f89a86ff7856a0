//! Braid Resolver
//!
//! Substitutes variable references in step parameters with values taken from
//! the outputs of completed steps, evaluates step and edge conditions, and
//! checks resolved parameters against a step's declared schema.
//!
//! Everything here is a pure function of its arguments: resolving the same
//! parameters against the same [`Scope`] always gives the same result, which
//! is what makes retries reproducible and lets observers re-run resolution
//! for inspection.

mod condition;
mod error;
mod resolve;
mod schema;
mod scope;

pub use condition::evaluate_condition;
pub use error::{ResolutionError, ValidationError};
pub use resolve::{resolve_parameters, resolve_reference, resolve_value};
pub use schema::{SchemaType, extract_schema_types, required_fields, validate_parameters};
pub use scope::Scope;
