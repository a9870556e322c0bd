//! # Rowguard Authorization Engine
//!
//! Row-level access control for entity queries: roles hold GRANT, DENY or
//! ABSTAIN privileges on resources, resources select rows through rule
//! expressions, and the engine turns the active roles of a request into one SQL
//! filter fragment per query.
//!
//! ## Features
//!
//! - **Compiled rules** cached per distinct text and shared across roles
//! - **Constraint synthesis** into SQL with named parameters and subselects for to-one relations
//! - **Role inheritance** flattened with memoization and cycle detection
//! - **CEL predicates** on privileges, evaluated per request
//! - **Wildcard resources** gating access to a whole entity type
//!
//! ## Example
//!
//! ```rust
//! use rowguard_authz::{
//!     Combinator, EngineConfig, EntityMapping, GlobalObjects, OperandSource, Operator,
//!     PolicyDocument, Principal, ResourceDefinition, RowFilterEngine, SecurityContext,
//!     StaticFrontEnd, StaticMetadata,
//! };
//! use std::sync::Arc;
//!
//! let own = r#"isType("Document") && property("owner").equals(context.user.id)"#;
//! let front_end = StaticFrontEnd::new().with_rule(
//!     own,
//!     vec![
//!         Combinator::is_type("Document"),
//!         Combinator::property("owner"),
//!         Combinator::compare(Operator::Eq, OperandSource::global("user", "id")),
//!         Combinator::and(2),
//!     ],
//! );
//! let metadata = StaticMetadata::new()
//!     .with_entity("Document", EntityMapping::new("documents").with_field("owner", "owner_id"));
//! let policy = PolicyDocument::new().with_resource("Acme:Own", ResourceDefinition::matching(own));
//!
//! let engine = RowFilterEngine::new(
//!     EngineConfig::default(),
//!     &policy,
//!     Arc::new(front_end),
//!     Arc::new(metadata),
//! )?;
//!
//! let context = SecurityContext::new(Principal::new("alice"), GlobalObjects::standard());
//! let roles = context.active_roles(engine.index())?.clone();
//! let filter = engine.render_filter("Document", "d", &roles, &context)?;
//!
//! assert_eq!(filter.map(|f| f.sql), Some("NOT (d.owner_id = :p0)".to_string()));
//! # Ok::<(), rowguard_authz::AuthzError>(())
//! ```

pub mod cel;
pub mod context;
pub mod engine;
pub mod error;
pub mod expression;
pub mod filter;
pub mod policy;
pub mod synth;
pub mod types;

// Re-export commonly used types
pub use context::{GlobalObjects, SecurityContext};
pub use engine::{CombinationMode, EngineConfig, FilterOutcome, RenderedFilter, RowFilterEngine};
pub use error::{AuthzError, Result};
pub use expression::{
    Combinator, CompiledExpression, ConditionNode, ExpressionCompiler, OperandSource, Operator, RuleFrontEnd,
    StaticFrontEnd,
};
pub use filter::{EntityQuery, FilterState, QueryFilter};
pub use policy::index::SystemRoles;
pub use policy::{
    InMemoryPolicySource, JsonFilePolicySource, PolicyDocument, PolicyIndex, PolicySource, PrivilegeDefinition,
    ResourceDefinition, RoleDefinition, SubConstraintOperator,
};
pub use synth::{EntityMapping, MetadataProvider, QueryTarget, StaticMetadata, Synthesizer};
pub use types::{Effect, Principal, ResourceId, RoleId};
