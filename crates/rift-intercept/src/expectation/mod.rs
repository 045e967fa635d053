//! Expectation records and the scopes that own them.

mod scope;
mod types;

pub use scope::{
    BodyFilterFn, PathFilterFn, Scope, ScopeBuilder, ScopeFilterFn, ScopeOptions, TargetPattern,
};
pub use types::{Expectation, ExpectationBuilder, ExpectationOptions};
