//! Parameter binding for rendered fragments

use crate::error::{AuthzError, Result};
use serde_json::Value;
use std::collections::BTreeSet;

/// Turns an operand value into the text that stands for it in a fragment
pub trait ParameterBinder {
    fn bind(&mut self, value: &Value) -> Result<String>;
}

/// Binds values as `:pN` named parameters
///
/// Equal values share one placeholder, so identical constraints rendered
/// through the same binder produce identical text.
#[derive(Debug, Default, Clone)]
pub struct NamedParameters {
    params: Vec<(String, Value)>,

    /// Names bound since the last `take_used`
    used: BTreeSet<String>,
}

impl NamedParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names bound since the previous call
    pub fn take_used(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.used)
    }

    /// Look up a bound value by parameter name (without the colon)
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// All bindings, in binding order
    pub fn into_params(self) -> Vec<(String, Value)> {
        self.params
    }
}

impl ParameterBinder for NamedParameters {
    fn bind(&mut self, value: &Value) -> Result<String> {
        let name = match self.params.iter().find(|(_, bound)| bound == value) {
            Some((name, _)) => name.clone(),
            None => {
                let name = format!("p{}", self.params.len());
                self.params.push((name.clone(), value.clone()));
                name
            }
        };
        self.used.insert(name.clone());
        Ok(format!(":{}", name))
    }
}

/// Writes values inline as quoted literals, for subselects
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineLiterals;

impl ParameterBinder for InlineLiterals {
    fn bind(&mut self, value: &Value) -> Result<String> {
        quote_literal(value)
    }
}

/// Render a scalar as a SQL literal
///
/// Strings are single-quoted with embedded quotes doubled. Strings carrying a
/// backslash or NUL, and any composite value, are rejected.
pub fn quote_literal(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Bool(true) => Ok("TRUE".to_string()),
        Value::Bool(false) => Ok("FALSE".to_string()),
        Value::Number(number) => Ok(number.to_string()),
        Value::String(text) => {
            if text.contains('\\') || text.contains('\0') {
                return Err(AuthzError::UnsafeLiteral(text.clone()));
            }
            Ok(format!("'{}'", text.replace('\'', "''")))
        }
        Value::Array(_) | Value::Object(_) => Err(AuthzError::UnsafeLiteral(value.to_string())),
    }
}
