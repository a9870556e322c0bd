//! Expression compiler with content-addressed caching

use super::ast::{ConditionNode, OperandSource, Operator, Term};
use super::frontend::{Combinator, RuleFrontEnd};
use crate::error::{AuthzError, Result};
use crate::types::EntityType;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Cache key type (BLAKE3 hash of the rule text)
pub type ExpressionHash = [u8; 32];

/// Compiled rule: entity type plus row predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledExpression {
    /// Content hash of the rule text
    pub hash: ExpressionHash,

    /// Entity type declared by the rule, if any
    pub entity_type: Option<EntityType>,

    /// Row predicate; `True` when the rule only declares a type
    pub condition: ConditionNode,
}

impl CompiledExpression {
    /// Declared entity type, or `EntityTypeUndetermined`
    pub fn entity_type(&self) -> Result<&str> {
        self.entity_type
            .as_deref()
            .ok_or_else(|| AuthzError::EntityTypeUndetermined(self.condition.to_string()))
    }

    /// Hex form of the content hash, for logs
    pub fn hash_hex(&self) -> String {
        blake3::Hash::from(self.hash).to_hex().to_string()
    }
}

/// Compiler cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of distinct compiled rules
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Turns rule text into [`CompiledExpression`]s, once per distinct text
///
/// Entries are never invalidated: rule text is immutable configuration. The
/// front-end runs while the cache shard for the key is write-locked, so
/// concurrent first calls for the same text compile it exactly once.
pub struct ExpressionCompiler {
    front_end: Arc<dyn RuleFrontEnd>,

    /// Compiled expression cache (thread-safe)
    cache: DashMap<ExpressionHash, Arc<CompiledExpression>>,

    hits: AtomicU64,
    misses: AtomicU64,
}

impl ExpressionCompiler {
    /// Create a compiler on top of a rule front-end
    pub fn new(front_end: Arc<dyn RuleFrontEnd>) -> Self {
        Self {
            front_end,
            cache: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Compile rule text, or return the cached result for identical text
    pub fn compile(&self, text: &str) -> Result<Arc<CompiledExpression>> {
        let hash = *blake3::hash(text.as_bytes()).as_bytes();

        if let Some(compiled) = self.cache.get(&hash) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(compiled.clone());
        }

        match self.cache.entry(hash) {
            Entry::Occupied(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(entry.get().clone())
            }
            Entry::Vacant(entry) => {
                let program = self.front_end.parse(text)?;
                let (entity_type, condition) = fold(&program)?;
                let compiled = Arc::new(CompiledExpression {
                    hash,
                    entity_type,
                    condition,
                });
                debug!(
                    "Compiled rule {} for entity type {:?}",
                    compiled.hash_hex(),
                    compiled.entity_type
                );
                entry.insert(compiled.clone());
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(compiled)
            }
        }
    }

    /// Get cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            size: self.cache.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Fold a postfix combinator program into `(entity type, condition)`
pub fn fold(program: &[Combinator]) -> Result<(Option<EntityType>, ConditionNode)> {
    let mut stack: Vec<Term> = Vec::with_capacity(program.len());
    let mut entity_type: Option<EntityType> = None;

    for combinator in program {
        match combinator {
            Combinator::IsType { entity_type: declared } => {
                if let Some(first) = &entity_type {
                    return Err(AuthzError::DuplicateTypeTag {
                        first: first.clone(),
                        second: declared.clone(),
                    });
                }
                entity_type = Some(declared.clone());
                stack.push(Term::Condition(ConditionNode::TypeTag(declared.clone())));
            }
            Combinator::Property { path } => {
                if path.is_empty() || path.split('.').any(str::is_empty) {
                    return Err(AuthzError::FrontEnd(format!("invalid property path \"{}\"", path)));
                }
                stack.push(Term::Property(path.clone()));
            }
            Combinator::Compare { operator, operand } => {
                let path = match stack.pop() {
                    Some(Term::Property(path)) => path,
                    _ => {
                        return Err(AuthzError::FrontEnd(format!(
                            "comparison {} {} without a preceding property()",
                            operator, operand
                        )))
                    }
                };
                check_operand(&path, *operator, operand)?;
                stack.push(Term::Condition(ConditionNode::compare(path, *operator, operand.clone())));
            }
            Combinator::Not => match stack.pop() {
                Some(Term::Condition(node)) if !matches!(node, ConditionNode::TypeTag(_)) => {
                    stack.push(Term::Condition(ConditionNode::negate(node)));
                }
                _ => return Err(AuthzError::FrontEnd("not() requires a condition".to_string())),
            },
            Combinator::And { arity } | Combinator::Or { arity } => {
                if *arity > stack.len() {
                    return Err(AuthzError::FrontEnd(format!(
                        "junction expects {} arguments, {} available",
                        arity,
                        stack.len()
                    )));
                }
                let terms = stack.split_off(stack.len() - arity);
                let node = if matches!(combinator, Combinator::And { .. }) {
                    ConditionNode::conjunction(terms)
                } else {
                    ConditionNode::disjunction(terms)
                };
                stack.push(node.map(Term::Condition).unwrap_or(Term::Nothing));
            }
            Combinator::Constant { value } => {
                let node = if *value { ConditionNode::True } else { ConditionNode::False };
                stack.push(Term::Condition(node));
            }
        }
    }

    if stack.len() > 1 {
        return Err(AuthzError::FrontEnd(format!(
            "rule left {} unconsumed terms",
            stack.len()
        )));
    }

    let condition = match stack.pop() {
        Some(Term::Condition(node)) => node.without_type_tags().unwrap_or(ConditionNode::True),
        Some(Term::Nothing) | None => ConditionNode::True,
        Some(Term::Property(path)) => {
            return Err(AuthzError::FrontEnd(format!(
                "property(\"{}\") is never compared",
                path
            )))
        }
    };

    Ok((entity_type, condition))
}

/// Reject operands that can never fit the operator
fn check_operand(path: &str, operator: Operator, operand: &OperandSource) -> Result<()> {
    let reason = match (operator, operand) {
        (Operator::In, OperandSource::Literal(_)) => {
            Some("the \"in\" operator needs a list operand")
        }
        (op, OperandSource::LiteralList(_)) if op != Operator::In => {
            Some("list operands are only valid with \"in\"")
        }
        (_, OperandSource::Literal(value)) if value.is_object() || value.is_array() => {
            Some("literal operands must be scalar")
        }
        (_, OperandSource::GlobalRef { object, path }) if object.is_empty() || path.is_empty() => {
            Some("global references need an object and a property path")
        }
        _ => None,
    };

    match reason {
        Some(reason) => Err(AuthzError::InvalidOperand {
            path: path.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
