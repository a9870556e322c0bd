//! Condition tree produced by the expression compiler

use crate::types::EntityType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Comparison operator of a property constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "in")]
    In,
}

impl Operator {
    /// Operator as written in rules
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "like",
            Operator::In => "in",
        }
    }

    /// Every operator, in declaration order
    pub fn all() -> [Operator; 8] {
        [
            Operator::Eq,
            Operator::Ne,
            Operator::Lt,
            Operator::Le,
            Operator::Gt,
            Operator::Ge,
            Operator::Like,
            Operator::In,
        ]
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the right-hand side of a property constraint comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperandSource {
    /// Scalar, boolean or null literal
    Literal(Value),

    /// Ordered list of literals (operand of `in`)
    LiteralList(Vec<Value>),

    /// Property path on a registered global object, e.g. `context.user.id`
    GlobalRef { object: String, path: String },
}

impl OperandSource {
    /// Literal operand
    pub fn literal(value: impl Into<Value>) -> Self {
        OperandSource::Literal(value.into())
    }

    /// List operand
    pub fn list<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        OperandSource::LiteralList(values.into_iter().map(Into::into).collect())
    }

    /// Reference to `context.<object>.<path>`
    pub fn global(object: impl Into<String>, path: impl Into<String>) -> Self {
        OperandSource::GlobalRef {
            object: object.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for OperandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandSource::Literal(value) => write!(f, "{}", value),
            OperandSource::LiteralList(values) => write!(f, "{}", Value::Array(values.clone())),
            OperandSource::GlobalRef { object, path } => write!(f, "context.{}.{}", object, path),
        }
    }
}

/// Immutable condition tree
///
/// The variant set is closed; the synthesizer matches it exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionNode {
    /// Matches every row
    True,

    /// Matches no row
    False,

    Not(Box<ConditionNode>),

    /// Order only affects the generated fragment text
    And(Vec<ConditionNode>),

    /// Order only affects the generated fragment text
    Or(Vec<ConditionNode>),

    PropertyCompare {
        path: String,
        operator: Operator,
        operand: OperandSource,
    },

    /// Entity type the rule applies to; at most one per tree
    TypeTag(EntityType),
}

/// Intermediate value while folding combinator calls
///
/// Only [`Term::Condition`] is a condition node; the other variants are dropped
/// by the `And`/`Or` combinators.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Condition(ConditionNode),
    Property(String),
    Nothing,
}

impl ConditionNode {
    /// Property comparison
    pub fn compare(path: impl Into<String>, operator: Operator, operand: OperandSource) -> Self {
        ConditionNode::PropertyCompare {
            path: path.into(),
            operator,
            operand,
        }
    }

    /// Negation
    pub fn negate(node: ConditionNode) -> Self {
        ConditionNode::Not(Box::new(node))
    }

    /// `And` over the condition terms; other terms are dropped
    ///
    /// Returns `None` when no argument is a condition.
    pub fn conjunction(terms: impl IntoIterator<Item = Term>) -> Option<Self> {
        let nodes = Self::conditions_only(terms);
        if nodes.is_empty() {
            None
        } else {
            Some(ConditionNode::And(nodes))
        }
    }

    /// `Or` over the condition terms; other terms are dropped
    pub fn disjunction(terms: impl IntoIterator<Item = Term>) -> Option<Self> {
        let nodes = Self::conditions_only(terms);
        if nodes.is_empty() {
            None
        } else {
            Some(ConditionNode::Or(nodes))
        }
    }

    fn conditions_only(terms: impl IntoIterator<Item = Term>) -> Vec<ConditionNode> {
        terms
            .into_iter()
            .filter_map(|term| match term {
                Term::Condition(node) => Some(node),
                _ => None,
            })
            .collect()
    }

    /// All type tags in the tree, in pre-order
    pub fn type_tags(&self) -> Vec<&str> {
        let mut tags = Vec::new();
        self.collect_type_tags(&mut tags);
        tags
    }

    fn collect_type_tags<'a>(&'a self, tags: &mut Vec<&'a str>) {
        match self {
            ConditionNode::TypeTag(entity_type) => tags.push(entity_type),
            ConditionNode::Not(inner) => inner.collect_type_tags(tags),
            ConditionNode::And(nodes) | ConditionNode::Or(nodes) => {
                for node in nodes {
                    node.collect_type_tags(tags);
                }
            }
            ConditionNode::True | ConditionNode::False | ConditionNode::PropertyCompare { .. } => {}
        }
    }

    /// Remove type tags, the way a type declaration contributes no condition
    ///
    /// Junctions left with a single child collapse to that child; a tree that
    /// consisted only of type tags yields `None`.
    pub fn without_type_tags(self) -> Option<ConditionNode> {
        match self {
            ConditionNode::TypeTag(_) => None,
            ConditionNode::Not(inner) => inner.without_type_tags().map(ConditionNode::negate),
            ConditionNode::And(nodes) => Self::collapse(nodes, ConditionNode::And),
            ConditionNode::Or(nodes) => Self::collapse(nodes, ConditionNode::Or),
            other => Some(other),
        }
    }

    fn collapse(
        nodes: Vec<ConditionNode>,
        junction: fn(Vec<ConditionNode>) -> ConditionNode,
    ) -> Option<ConditionNode> {
        let mut kept: Vec<ConditionNode> = nodes
            .into_iter()
            .filter_map(ConditionNode::without_type_tags)
            .collect();
        match kept.len() {
            0 => None,
            1 => kept.pop(),
            _ => Some(junction(kept)),
        }
    }

    /// Whether any comparison reads a global object
    pub fn references_globals(&self) -> bool {
        match self {
            ConditionNode::PropertyCompare { operand, .. } => {
                matches!(operand, OperandSource::GlobalRef { .. })
            }
            ConditionNode::Not(inner) => inner.references_globals(),
            ConditionNode::And(nodes) | ConditionNode::Or(nodes) => {
                nodes.iter().any(ConditionNode::references_globals)
            }
            ConditionNode::True | ConditionNode::False | ConditionNode::TypeTag(_) => false,
        }
    }
}

impl fmt::Display for ConditionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionNode::True => f.write_str("true"),
            ConditionNode::False => f.write_str("false"),
            ConditionNode::Not(inner) => write!(f, "!({})", inner),
            ConditionNode::And(nodes) | ConditionNode::Or(nodes) => {
                let glue = if matches!(self, ConditionNode::And(_)) { " && " } else { " || " };
                f.write_str("(")?;
                for (i, node) in nodes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(glue)?;
                    }
                    write!(f, "{}", node)?;
                }
                f.write_str(")")
            }
            ConditionNode::PropertyCompare { path, operator, operand } => {
                write!(f, "{} {} {}", path, operator, operand)
            }
            ConditionNode::TypeTag(entity_type) => write!(f, "isType(\"{}\")", entity_type),
        }
    }
}
