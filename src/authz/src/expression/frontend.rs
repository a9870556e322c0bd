//! Contract between the expression compiler and the rule language front-end
//!
//! The front-end owns the lexical grammar. It hands the compiler the combinator
//! calls a rule evaluates to, in postfix order: arguments first, then the call
//! that consumes them.
//!
//! ```text
//! isType("Document") && property("owner").equals(context.user.id)
//!
//! IsType("Document")
//! Property("owner")
//! Compare(==, context.user.id)
//! And(2)
//! ```

use super::ast::{OperandSource, Operator};
use crate::error::{AuthzError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One combinator invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "camelCase")]
pub enum Combinator {
    /// Declare the entity type; yields no condition
    #[serde(rename_all = "camelCase")]
    IsType { entity_type: String },

    /// Select a property path; consumed by the next `Compare`
    Property { path: String },

    /// Compare the pending property against an operand
    Compare {
        operator: Operator,
        operand: OperandSource,
    },

    /// Negate the topmost condition
    Not,

    /// Conjunction of the topmost `arity` terms
    And { arity: usize },

    /// Disjunction of the topmost `arity` terms
    Or { arity: usize },

    /// Constant `true` / `false`
    Constant { value: bool },
}

impl Combinator {
    pub fn is_type(entity_type: impl Into<String>) -> Self {
        Combinator::IsType {
            entity_type: entity_type.into(),
        }
    }

    pub fn property(path: impl Into<String>) -> Self {
        Combinator::Property { path: path.into() }
    }

    pub fn compare(operator: Operator, operand: OperandSource) -> Self {
        Combinator::Compare { operator, operand }
    }

    pub fn and(arity: usize) -> Self {
        Combinator::And { arity }
    }

    pub fn or(arity: usize) -> Self {
        Combinator::Or { arity }
    }
}

/// Rule language front-end
///
/// Must be deterministic: identical text always yields the identical sequence.
pub trait RuleFrontEnd: Send + Sync {
    /// Translate rule text into combinator invocations
    fn parse(&self, text: &str) -> Result<Vec<Combinator>>;
}

/// Front-end backed by a table of pre-translated rules
///
/// Hosts that translate rules ahead of time (build step, admin tooling) load the
/// table from JSON; tests register programs directly.
#[derive(Debug, Default)]
pub struct StaticFrontEnd {
    programs: HashMap<String, Vec<Combinator>>,
    invocations: AtomicUsize,
}

impl StaticFrontEnd {
    /// Create an empty front-end
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a `{ "rule text": [combinators...] }` table
    pub fn from_json(json: &str) -> Result<Self> {
        let programs: HashMap<String, Vec<Combinator>> = serde_json::from_str(json)?;
        Ok(Self {
            programs,
            invocations: AtomicUsize::new(0),
        })
    }

    /// Register the translation of a rule
    pub fn register(&mut self, text: impl Into<String>, program: Vec<Combinator>) {
        self.programs.insert(text.into(), program);
    }

    /// Builder-style [`StaticFrontEnd::register`]
    pub fn with_rule(mut self, text: impl Into<String>, program: Vec<Combinator>) -> Self {
        self.register(text, program);
        self
    }

    /// Number of `parse` calls served so far
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }
}

impl RuleFrontEnd for StaticFrontEnd {
    fn parse(&self, text: &str) -> Result<Vec<Combinator>> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.programs
            .get(text)
            .cloned()
            .ok_or_else(|| AuthzError::FrontEnd(format!("no translation registered for rule: {}", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_front_end_from_json() {
        let front_end = StaticFrontEnd::from_json(
            r#"{
                "isType(\"Document\") && property(\"owner\").equals(context.user.id)": [
                    {"call": "isType", "entityType": "Document"},
                    {"call": "property", "path": "owner"},
                    {"call": "compare", "operator": "==", "operand": {"globalRef": {"object": "user", "path": "id"}}},
                    {"call": "and", "arity": 2}
                ]
            }"#,
        )
        .unwrap();

        let program = front_end
            .parse("isType(\"Document\") && property(\"owner\").equals(context.user.id)")
            .unwrap();
        assert_eq!(program.len(), 4);
        assert_eq!(program[0], Combinator::is_type("Document"));
        assert_eq!(
            program[2],
            Combinator::compare(Operator::Eq, OperandSource::global("user", "id"))
        );
        assert_eq!(front_end.invocations(), 1);
    }

    #[test]
    fn test_unknown_rule() {
        let front_end = StaticFrontEnd::new();
        assert!(matches!(front_end.parse("isType(\"X\")"), Err(AuthzError::FrontEnd(_))));
    }
}
