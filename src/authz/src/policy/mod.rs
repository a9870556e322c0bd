//! Policy documents and the sources they are loaded from

pub mod index;
pub mod roles;

pub use index::{IndexEntry, PolicyIndex, ResourceConstraint, ResourceKind};
pub use roles::{GraphError, RoleGraph};

use crate::error::{AuthzError, Result};
use crate::types::{Effect, EntityType, ResourceId, RoleId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Matcher text of the per-type wildcard resource
pub const ANY_MATCHER: &str = "ANY";

/// Raw policy configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDocument {
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, ResourceDefinition>,

    #[serde(default)]
    pub roles: BTreeMap<RoleId, RoleDefinition>,
}

impl PolicyDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON policy document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_resource(mut self, id: impl Into<ResourceId>, resource: ResourceDefinition) -> Self {
        self.resources.insert(id.into(), resource);
        self
    }

    pub fn with_role(mut self, id: impl Into<RoleId>, role: RoleDefinition) -> Self {
        self.roles.insert(id.into(), role);
        self
    }
}

/// Entity privilege target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    /// Rule text, or `ANY` for the wildcard resource of `entity_type`
    pub matcher: String,

    /// Entity type; required for wildcards, checked against the rule otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,

    /// Names substituted into `{name}` placeholders of the matcher
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,

    /// Other resources combined into this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_constraints: Vec<SubConstraint>,
}

impl ResourceDefinition {
    /// Resource matching the rows selected by `matcher`
    pub fn matching(matcher: impl Into<String>) -> Self {
        Self {
            matcher: matcher.into(),
            ..Default::default()
        }
    }

    /// Wildcard resource covering every row of `entity_type`
    pub fn any(entity_type: impl Into<EntityType>) -> Self {
        Self {
            matcher: ANY_MATCHER.to_string(),
            entity_type: Some(entity_type.into()),
            ..Default::default()
        }
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<EntityType>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(name.into());
        self
    }

    pub fn with_sub_constraint(mut self, operator: SubConstraintOperator, resource: impl Into<ResourceId>) -> Self {
        self.sub_constraints.push(SubConstraint {
            operator,
            resource: resource.into(),
        });
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.matcher.trim() == ANY_MATCHER
    }
}

/// How a referenced resource is combined into the referencing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubConstraintOperator {
    #[serde(rename = "&&")]
    And,
    #[serde(rename = "&&!")]
    AndNot,
    #[serde(rename = "||")]
    Or,
    #[serde(rename = "||!")]
    OrNot,
}

impl fmt::Display for SubConstraintOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubConstraintOperator::And => "&&",
            SubConstraintOperator::AndNot => "&&!",
            SubConstraintOperator::Or => "||",
            SubConstraintOperator::OrNot => "||!",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubConstraint {
    pub operator: SubConstraintOperator,
    pub resource: ResourceId,
}

/// Role with its parents and directly assigned privileges
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDefinition {
    #[serde(default)]
    pub parent_roles: Vec<RoleId>,

    #[serde(default)]
    pub privileges: Vec<PrivilegeDefinition>,

    /// Abstract roles cannot be assigned to accounts
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
}

impl RoleDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(mut self, parent: impl Into<RoleId>) -> Self {
        self.parent_roles.push(parent.into());
        self
    }

    pub fn with_privilege(mut self, privilege: PrivilegeDefinition) -> Self {
        self.privileges.push(privilege);
        self
    }

    /// Shorthand for a parameterless, unconditional privilege
    pub fn with(self, resource: impl Into<ResourceId>, permission: Effect) -> Self {
        self.with_privilege(PrivilegeDefinition::new(resource, permission))
    }
}

/// Effect a role holds for a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivilegeDefinition {
    pub resource: ResourceId,

    pub permission: Effect,

    /// Values for the resource's parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,

    /// CEL predicate over the request principal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl PrivilegeDefinition {
    pub fn new(resource: impl Into<ResourceId>, permission: Effect) -> Self {
        Self {
            resource: resource.into(),
            permission,
            parameters: BTreeMap::new(),
            condition: None,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// Where role and privilege configuration comes from
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Load the complete policy document
    async fn load(&self) -> Result<PolicyDocument>;
}

/// In-memory policy source
pub struct InMemoryPolicySource {
    document: RwLock<PolicyDocument>,
}

impl InMemoryPolicySource {
    pub fn new(document: PolicyDocument) -> Self {
        Self {
            document: RwLock::new(document),
        }
    }

    /// Replace the document served by later loads
    pub async fn replace(&self, document: PolicyDocument) {
        *self.document.write().await = document;
    }
}

impl Default for InMemoryPolicySource {
    fn default() -> Self {
        Self::new(PolicyDocument::default())
    }
}

#[async_trait]
impl PolicySource for InMemoryPolicySource {
    async fn load(&self) -> Result<PolicyDocument> {
        Ok(self.document.read().await.clone())
    }
}

/// Policy document stored as a JSON file
pub struct JsonFilePolicySource {
    path: PathBuf,
}

impl JsonFilePolicySource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PolicySource for JsonFilePolicySource {
    async fn load(&self) -> Result<PolicyDocument> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let document = PolicyDocument::from_json(&text).map_err(|err| match err {
            AuthzError::Serialization(inner) => {
                AuthzError::InvalidPolicy(format!("{}: {}", self.path.display(), inner))
            }
            other => other,
        })?;
        debug!(
            "Loaded {} resources and {} roles from {}",
            document.resources.len(),
            document.roles.len(),
            self.path.display()
        );
        Ok(document)
    }
}
