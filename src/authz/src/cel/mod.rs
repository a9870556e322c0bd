//! CEL (Common Expression Language) predicates on privileges
//!
//! A privilege may carry a condition such as `principal.attributes.tenant == "acme"`.
//! It is compiled when the policy index is built and evaluated once per request;
//! `false` turns the privilege into ABSTAIN for that request.

pub mod context;
pub mod convert;
pub mod engine;
pub mod error;

pub use context::EvalContext;
pub use engine::Engine;
pub use error::{CelError, Result};
