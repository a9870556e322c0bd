//! Rule expressions: condition tree, front-end contract and cached compiler
//!
//! Rules are compiled once per distinct text and shared through `Arc`, so the
//! same [`CompiledExpression`] backs every role and request that uses the rule.

pub mod ast;
pub mod compiler;
pub mod frontend;

pub use ast::{ConditionNode, OperandSource, Operator, Term};
pub use compiler::{CacheStats, CompiledExpression, ExpressionCompiler, ExpressionHash};
pub use frontend::{Combinator, RuleFrontEnd, StaticFrontEnd};
