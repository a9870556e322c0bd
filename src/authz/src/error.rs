//! Error types for the row-level authorization engine

use thiserror::Error;

/// Authorization engine errors
///
/// Everything except [`AuthzError::GlobalObjectResolution`] and
/// [`AuthzError::Evaluation`] is a configuration-authoring error: it must stop the
/// host from serving requests instead of being logged and skipped.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// A rule declared its entity type more than once
    #[error("Entity type declared twice in rule: first \"{first}\", then \"{second}\"")]
    DuplicateTypeTag { first: String, second: String },

    /// A rule never declared the entity type it applies to
    #[error("Entity type could not be determined for rule: {0}")]
    EntityTypeUndetermined(String),

    /// Property path crosses an inverse-side or collection-valued association
    #[error("Unsupported relation constraint on path \"{path}\": {kind} associations cannot be constrained")]
    UnsupportedRelationConstraint { path: String, kind: String },

    /// A resource or privilege references a resource that is not defined
    #[error("Unknown resource \"{resource}\" referenced by {referenced_by}")]
    UnknownResourceReference { resource: String, referenced_by: String },

    /// Sub-constraint references form a cycle
    #[error("Cyclic resource reference: {0}")]
    CyclicResourceReference(String),

    /// A role references a parent role that is not defined
    #[error("Unknown role \"{role}\" referenced by {referenced_by}")]
    UnknownRole { role: String, referenced_by: String },

    /// Parent roles form a cycle
    #[error("Cyclic role inheritance: {0}")]
    CyclicRoleInheritance(String),

    /// Invalid policy definition
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// Operand does not fit the operator or the target property
    #[error("Invalid operand for \"{path}\": {reason}")]
    InvalidOperand { path: String, reason: String },

    /// Value cannot be inlined into a subselect as a quoted literal
    #[error("Value cannot be inlined as a safe literal: {0}")]
    UnsafeLiteral(String),

    /// Property is neither a mapped field nor an association
    #[error("Unknown property \"{property}\" on entity type \"{entity_type}\"")]
    UnknownProperty { entity_type: String, property: String },

    /// A type tag names a different entity type than the query target
    #[error("Rule is tagged for \"{tagged}\" but was applied to \"{target}\"")]
    EntityTypeMismatch { tagged: String, target: String },

    /// Global object lookup failed while resolving an operand
    #[error("Global object \"{object}\" could not be resolved: {reason}")]
    GlobalObjectResolution { object: String, reason: String },

    /// Rule front-end rejected or mis-sequenced the rule
    #[error("Rule front-end error: {0}")]
    FrontEnd(String),

    /// Runtime privilege predicate evaluation error
    #[error("Privilege condition evaluation failed: {0}")]
    Evaluation(String),

    /// Policy document (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
