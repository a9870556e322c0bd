//! Constraint synthesizer: lowers condition trees into SQL filter fragments
//!
//! ```text
//! owner == context.user.id      d.owner_id = :p0
//! folder.name == "Inbox"        d.folder_id IN (SELECT sub_1a2b.id FROM folders sub_1a2b WHERE sub_1a2b.name = 'Inbox')
//! status in ["a", null]         (d.status IN (:p1) OR d.status IS NULL)
//! ```

pub mod binder;
pub mod metadata;
mod relation;

pub use binder::{quote_literal, InlineLiterals, NamedParameters, ParameterBinder};
pub use metadata::{Association, AssociationKind, EntityMapping, JoinColumn, MetadataProvider, StaticMetadata};

use crate::error::{AuthzError, Result};
use crate::expression::{CompiledExpression, ConditionNode, OperandSource, Operator};
use crate::types::EntityType;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Query target a fragment is rendered for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryTarget {
    pub entity_type: EntityType,
    pub alias: String,
}

impl QueryTarget {
    pub fn new(entity_type: impl Into<EntityType>, alias: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            alias: alias.into(),
        }
    }
}

/// Rendered fragment and the named parameters it references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub sql: String,
    pub parameters: BTreeSet<String>,
}

/// Resolves `context.<object>.<path>` operands
pub trait OperandResolver {
    fn resolve_global(&self, object: &str, path: &str) -> Result<Value>;
}

/// Resolver for rendering without a request, e.g. validating literal-only rules
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGlobals;

impl OperandResolver for NoGlobals {
    fn resolve_global(&self, object: &str, _path: &str) -> Result<Value> {
        Err(AuthzError::GlobalObjectResolution {
            object: object.to_string(),
            reason: "no global objects are available".to_string(),
        })
    }
}

/// Lowers [`ConditionNode`]s against entity metadata
pub struct Synthesizer {
    metadata: Arc<dyn MetadataProvider>,
}

impl Synthesizer {
    pub fn new(metadata: Arc<dyn MetadataProvider>) -> Self {
        Self { metadata }
    }

    pub fn metadata(&self) -> &dyn MetadataProvider {
        self.metadata.as_ref()
    }

    /// Render a compiled rule for a target of its own entity type
    pub fn render_compiled(
        &self,
        compiled: &CompiledExpression,
        target: &QueryTarget,
        operands: &dyn OperandResolver,
        params: &mut NamedParameters,
    ) -> Result<Fragment> {
        let entity_type = compiled.entity_type()?;
        if entity_type != target.entity_type {
            return Err(AuthzError::EntityTypeMismatch {
                tagged: entity_type.to_string(),
                target: target.entity_type.clone(),
            });
        }
        self.render(&compiled.condition, target, operands, params)
    }

    /// Render a condition tree with named parameters
    pub fn render(
        &self,
        node: &ConditionNode,
        target: &QueryTarget,
        operands: &dyn OperandResolver,
        params: &mut NamedParameters,
    ) -> Result<Fragment> {
        params.take_used();
        let sql = self.lower(node, &target.entity_type, &target.alias, operands, params)?;
        Ok(Fragment {
            sql,
            parameters: params.take_used(),
        })
    }

    /// Lower a node with any binder
    pub fn lower(
        &self,
        node: &ConditionNode,
        entity_type: &str,
        alias: &str,
        operands: &dyn OperandResolver,
        binder: &mut dyn ParameterBinder,
    ) -> Result<String> {
        match node {
            ConditionNode::True => Ok("(1 = 1)".to_string()),
            ConditionNode::False => Ok("(1 = 0)".to_string()),
            ConditionNode::Not(inner) => Ok(format!(
                "NOT ({})",
                self.lower(inner, entity_type, alias, operands, binder)?
            )),
            ConditionNode::And(nodes) if nodes.is_empty() => Ok("(1 = 1)".to_string()),
            ConditionNode::Or(nodes) if nodes.is_empty() => Ok("(1 = 0)".to_string()),
            ConditionNode::And(nodes) | ConditionNode::Or(nodes) => {
                let glue = if matches!(node, ConditionNode::And(_)) { " AND " } else { " OR " };
                let parts = nodes
                    .iter()
                    .map(|child| {
                        self.lower(child, entity_type, alias, operands, binder)
                            .map(|sql| format!("({})", sql))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(parts.join(glue))
            }
            ConditionNode::PropertyCompare { path, operator, operand } => {
                let value = resolve_operand(path, operand, operands)?;
                self.lower_compare(entity_type, alias, path, path, *operator, &value, binder)
            }
            ConditionNode::TypeTag(tagged) => {
                if tagged == entity_type {
                    Ok("(1 = 1)".to_string())
                } else {
                    Err(AuthzError::EntityTypeMismatch {
                        tagged: tagged.clone(),
                        target: entity_type.to_string(),
                    })
                }
            }
        }
    }

    /// Dispatch a comparison on the first path segment
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn lower_compare(
        &self,
        entity_type: &str,
        alias: &str,
        full_path: &str,
        path: &str,
        operator: Operator,
        value: &Value,
        binder: &mut dyn ParameterBinder,
    ) -> Result<String> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        if self.metadata.has_association(entity_type, head) {
            return relation::lower_association(
                self, entity_type, alias, full_path, head, rest, operator, value, binder,
            );
        }

        if rest.is_some() || !self.metadata.has_field(entity_type, head) {
            return Err(AuthzError::UnknownProperty {
                entity_type: entity_type.to_string(),
                property: head.to_string(),
            });
        }

        if value.is_object() {
            return Err(AuthzError::InvalidOperand {
                path: full_path.to_string(),
                reason: format!("\"{}\" is a scalar field and cannot be compared with an object", head),
            });
        }

        let column = self.column(alias, &self.metadata.column_name(entity_type, head)?);
        compare_column(&column, full_path, operator, value, binder)
    }

    /// Qualified, quoted column reference
    pub(crate) fn column(&self, alias: &str, column: &str) -> String {
        format!("{}.{}", alias, self.metadata.quote_column(column))
    }
}

/// Turn an operand into a value, resolving global references
fn resolve_operand(path: &str, operand: &OperandSource, operands: &dyn OperandResolver) -> Result<Value> {
    match operand {
        OperandSource::Literal(value) => Ok(value.clone()),
        OperandSource::LiteralList(values) => Ok(Value::Array(values.clone())),
        OperandSource::GlobalRef { object, path: property } => {
            operands.resolve_global(object, property).map_err(|err| match err {
                AuthzError::GlobalObjectResolution { .. } => err,
                other => AuthzError::GlobalObjectResolution {
                    object: object.clone(),
                    reason: format!("while resolving operand of \"{}\": {}", path, other),
                },
            })
        }
    }
}

fn sql_operator(operator: Operator) -> &'static str {
    match operator {
        Operator::Eq => "=",
        Operator::Ne => "<>",
        Operator::Lt => "<",
        Operator::Le => "<=",
        Operator::Gt => ">",
        Operator::Ge => ">=",
        Operator::Like => "LIKE",
        Operator::In => "IN",
    }
}

/// Compare one column against a resolved value
pub(crate) fn compare_column(
    column: &str,
    path: &str,
    operator: Operator,
    value: &Value,
    binder: &mut dyn ParameterBinder,
) -> Result<String> {
    let invalid = |reason: &str| AuthzError::InvalidOperand {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if operator == Operator::In {
        let values = value
            .as_array()
            .ok_or_else(|| invalid("the \"in\" operator needs a list operand"))?;
        let has_null = values.iter().any(Value::is_null);
        let bound = values
            .iter()
            .filter(|value| !value.is_null())
            .map(|value| {
                if value.is_object() || value.is_array() {
                    Err(invalid("list elements must be scalar"))
                } else {
                    binder.bind(value)
                }
            })
            .collect::<Result<Vec<_>>>()?;

        return Ok(match (bound.is_empty(), has_null) {
            (true, _) => format!("{} IS NULL", column),
            (false, false) => format!("{} IN ({})", column, bound.join(", ")),
            (false, true) => format!("({} IN ({}) OR {} IS NULL)", column, bound.join(", "), column),
        });
    }

    match value {
        Value::Null => match operator {
            Operator::Eq => Ok(format!("{} IS NULL", column)),
            Operator::Ne => Ok(format!("{} IS NOT NULL", column)),
            _ => Err(invalid(&format!("\"{}\" cannot be applied to null", operator))),
        },
        Value::Array(_) => Err(invalid("list operands are only valid with \"in\"")),
        Value::Object(_) => Err(invalid("object operands are only valid on associations")),
        scalar => Ok(format!("{} {} {}", column, sql_operator(operator), binder.bind(scalar)?)),
    }
}
