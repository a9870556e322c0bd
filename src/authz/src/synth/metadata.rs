//! Entity metadata consumed by the synthesizer
//!
//! The host's persistence layer owns the mapping; the engine only asks the
//! questions below. [`StaticMetadata`] is a serde-loadable implementation for
//! hosts that export their mapping as JSON, and for tests.

use crate::error::{AuthzError, Result};
use crate::types::EntityType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Cardinality of an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssociationKind {
    ToOne,
    ToMany,
}

/// Foreign key column and the column it references on the target table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinColumn {
    pub name: String,
    pub referenced_column: String,
}

impl JoinColumn {
    pub fn new(name: impl Into<String>, referenced_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            referenced_column: referenced_column.into(),
        }
    }
}

/// Association from one entity type to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Association {
    /// Target entity type
    pub target: EntityType,

    pub kind: AssociationKind,

    /// Whether this side holds the join columns
    #[serde(default = "default_owning")]
    pub owning: bool,

    #[serde(default)]
    pub join_columns: Vec<JoinColumn>,
}

fn default_owning() -> bool {
    true
}

impl Association {
    /// Owning to-one association over the given join columns
    pub fn to_one(target: impl Into<EntityType>, join_columns: Vec<JoinColumn>) -> Self {
        Self {
            target: target.into(),
            kind: AssociationKind::ToOne,
            owning: true,
            join_columns,
        }
    }

    /// Inverse side of a to-one association
    pub fn inverse_to_one(target: impl Into<EntityType>) -> Self {
        Self {
            target: target.into(),
            kind: AssociationKind::ToOne,
            owning: false,
            join_columns: Vec::new(),
        }
    }

    /// Collection-valued association
    pub fn to_many(target: impl Into<EntityType>) -> Self {
        Self {
            target: target.into(),
            kind: AssociationKind::ToMany,
            owning: false,
            join_columns: Vec::new(),
        }
    }
}

/// Mapping of one entity type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMapping {
    pub table: String,

    /// Property name to column name
    #[serde(default)]
    pub fields: BTreeMap<String, String>,

    /// Property name to association
    #[serde(default)]
    pub associations: BTreeMap<String, Association>,
}

impl EntityMapping {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, property: impl Into<String>, column: impl Into<String>) -> Self {
        self.fields.insert(property.into(), column.into());
        self
    }

    pub fn with_association(mut self, property: impl Into<String>, association: Association) -> Self {
        self.associations.insert(property.into(), association);
        self
    }
}

/// Questions the synthesizer asks about the persistence mapping
pub trait MetadataProvider: Send + Sync {
    /// Table backing the entity type
    fn table_name(&self, entity_type: &str) -> Result<String>;

    /// Whether `property` is a mapped scalar field
    fn has_field(&self, entity_type: &str, property: &str) -> bool;

    /// Column backing a scalar field
    fn column_name(&self, entity_type: &str, property: &str) -> Result<String>;

    fn has_association(&self, entity_type: &str, property: &str) -> bool;

    fn is_to_one(&self, entity_type: &str, property: &str) -> Result<bool>;

    fn is_inverse_side(&self, entity_type: &str, property: &str) -> Result<bool>;

    fn association_target(&self, entity_type: &str, property: &str) -> Result<EntityType>;

    fn join_columns(&self, entity_type: &str, property: &str) -> Result<Vec<JoinColumn>>;

    /// Property mapped onto `column`, used to read identities off objects
    fn field_for_column(&self, entity_type: &str, column: &str) -> Option<String>;

    /// Quote a column or table identifier for the backend
    fn quote_column(&self, column: &str) -> String;
}

/// In-memory mapping table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticMetadata {
    #[serde(default)]
    pub entities: HashMap<EntityType, EntityMapping>,

    /// Wrap identifiers in double quotes
    #[serde(default)]
    pub quote_identifiers: bool,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a mapping exported as JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let metadata: Self = serde_json::from_str(json)?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Reject entities where two properties share a column
    pub fn validate(&self) -> Result<()> {
        for (entity_type, mapping) in &self.entities {
            let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
            for (property, column) in &mapping.fields {
                if let Some(other) = seen.insert(column.as_str(), property.as_str()) {
                    return Err(AuthzError::InvalidPolicy(format!(
                        "entity type \"{}\" maps both \"{}\" and \"{}\" to column \"{}\"",
                        entity_type, other, property, column
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn with_entity(mut self, entity_type: impl Into<EntityType>, mapping: EntityMapping) -> Self {
        self.entities.insert(entity_type.into(), mapping);
        self
    }

    fn entity(&self, entity_type: &str) -> Result<&EntityMapping> {
        self.entities
            .get(entity_type)
            .ok_or_else(|| AuthzError::InvalidPolicy(format!("no mapping for entity type \"{}\"", entity_type)))
    }

    fn association(&self, entity_type: &str, property: &str) -> Result<&Association> {
        self.entity(entity_type)?
            .associations
            .get(property)
            .ok_or_else(|| AuthzError::UnknownProperty {
                entity_type: entity_type.to_string(),
                property: property.to_string(),
            })
    }
}

impl MetadataProvider for StaticMetadata {
    fn table_name(&self, entity_type: &str) -> Result<String> {
        Ok(self.entity(entity_type)?.table.clone())
    }

    fn has_field(&self, entity_type: &str, property: &str) -> bool {
        self.entities
            .get(entity_type)
            .map_or(false, |mapping| mapping.fields.contains_key(property))
    }

    fn column_name(&self, entity_type: &str, property: &str) -> Result<String> {
        self.entity(entity_type)?
            .fields
            .get(property)
            .cloned()
            .ok_or_else(|| AuthzError::UnknownProperty {
                entity_type: entity_type.to_string(),
                property: property.to_string(),
            })
    }

    fn has_association(&self, entity_type: &str, property: &str) -> bool {
        self.entities
            .get(entity_type)
            .map_or(false, |mapping| mapping.associations.contains_key(property))
    }

    fn is_to_one(&self, entity_type: &str, property: &str) -> Result<bool> {
        Ok(self.association(entity_type, property)?.kind == AssociationKind::ToOne)
    }

    fn is_inverse_side(&self, entity_type: &str, property: &str) -> Result<bool> {
        Ok(!self.association(entity_type, property)?.owning)
    }

    fn association_target(&self, entity_type: &str, property: &str) -> Result<EntityType> {
        Ok(self.association(entity_type, property)?.target.clone())
    }

    fn join_columns(&self, entity_type: &str, property: &str) -> Result<Vec<JoinColumn>> {
        Ok(self.association(entity_type, property)?.join_columns.clone())
    }

    fn field_for_column(&self, entity_type: &str, column: &str) -> Option<String> {
        self.entities.get(entity_type).and_then(|mapping| {
            mapping
                .fields
                .iter()
                .find(|(_, mapped)| mapped.as_str() == column)
                .map(|(property, _)| property.clone())
        })
    }

    fn quote_column(&self, column: &str) -> String {
        if self.quote_identifiers {
            format!("\"{}\"", column.replace('"', "\"\""))
        } else {
            column.to_string()
        }
    }
}
