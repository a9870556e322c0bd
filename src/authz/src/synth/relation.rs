//! Comparisons that cross associations

use super::binder::{InlineLiterals, ParameterBinder};
use super::{compare_column, Synthesizer};
use crate::error::{AuthzError, Result};
use crate::expression::Operator;
use serde_json::Value;

/// Lower a comparison whose first path segment is an association
#[allow(clippy::too_many_arguments)]
pub(super) fn lower_association(
    synth: &Synthesizer,
    entity_type: &str,
    alias: &str,
    full_path: &str,
    property: &str,
    rest: Option<&str>,
    operator: Operator,
    value: &Value,
    binder: &mut dyn ParameterBinder,
) -> Result<String> {
    let metadata = synth.metadata();

    if !metadata.is_to_one(entity_type, property)? {
        return Err(AuthzError::UnsupportedRelationConstraint {
            path: full_path.to_string(),
            kind: "to-many".to_string(),
        });
    }
    if metadata.is_inverse_side(entity_type, property)? {
        return Err(AuthzError::UnsupportedRelationConstraint {
            path: full_path.to_string(),
            kind: "inverse-side to-one".to_string(),
        });
    }

    let join_columns = metadata.join_columns(entity_type, property)?;
    if join_columns.is_empty() {
        return Err(AuthzError::InvalidPolicy(format!(
            "association \"{}\" of \"{}\" has no join columns",
            property, entity_type
        )));
    }
    let target_type = metadata.association_target(entity_type, property)?;

    let parts = match rest {
        None => {
            if operator == Operator::In && join_columns.len() > 1 {
                return Err(AuthzError::InvalidOperand {
                    path: full_path.to_string(),
                    reason: "\"in\" is not supported on composite associations".to_string(),
                });
            }
            join_columns
                .iter()
                .map(|join_column| {
                    let identity = identity_value(synth, &target_type, &join_column.referenced_column, full_path, value)?;
                    compare_column(
                        &synth.column(alias, &join_column.name),
                        full_path,
                        operator,
                        &identity,
                        binder,
                    )
                })
                .collect::<Result<Vec<_>>>()?
        }
        Some(rest) => {
            let sub_alias = subselect_alias(&target_type, rest, operator, value);
            let table = metadata.quote_column(&metadata.table_name(&target_type)?);
            let inner = synth.lower_compare(
                &target_type,
                &sub_alias,
                full_path,
                rest,
                operator,
                value,
                &mut InlineLiterals,
            )?;
            join_columns
                .iter()
                .map(|join_column| {
                    Ok(format!(
                        "{} IN (SELECT {} FROM {} {} WHERE {})",
                        synth.column(alias, &join_column.name),
                        synth.column(&sub_alias, &join_column.referenced_column),
                        table,
                        sub_alias,
                        inner
                    ))
                })
                .collect::<Result<Vec<_>>>()?
        }
    };

    Ok(if parts.len() == 1 {
        parts.into_iter().collect()
    } else {
        parts
            .iter()
            .map(|part| format!("({})", part))
            .collect::<Vec<_>>()
            .join(" AND ")
    })
}

/// Value to compare a join column with
///
/// Objects stand for the associated entity and contribute the property mapped
/// onto the referenced column; scalars are taken to be the identity already.
fn identity_value(
    synth: &Synthesizer,
    target_type: &str,
    referenced_column: &str,
    path: &str,
    value: &Value,
) -> Result<Value> {
    let identity_of = |object: &serde_json::Map<String, Value>| -> Result<Value> {
        let field = synth
            .metadata()
            .field_for_column(target_type, referenced_column)
            .ok_or_else(|| AuthzError::UnknownProperty {
                entity_type: target_type.to_string(),
                property: referenced_column.to_string(),
            })?;
        object.get(&field).cloned().ok_or_else(|| AuthzError::InvalidOperand {
            path: path.to_string(),
            reason: format!("object operand has no \"{}\" identity", field),
        })
    };

    match value {
        Value::Object(object) => identity_of(object),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(object) => identity_of(object),
                other => Ok(other.clone()),
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

/// Subselect alias derived from what the subselect computes
fn subselect_alias(target_type: &str, path: &str, operator: Operator, value: &Value) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(target_type.as_bytes());
    hasher.update(&[0]);
    hasher.update(path.as_bytes());
    hasher.update(&[0]);
    hasher.update(operator.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(value.to_string().as_bytes());
    let hex = hasher.finalize().to_hex();
    format!("sub_{}", &hex.as_str()[..12])
}
