//! Core authorization types

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Unique role identifier, `Package:Name`
pub type RoleId = String;

/// Unique resource (privilege target) identifier
pub type ResourceId = String;

/// Entity type name as reported by the host's metadata layer
pub type EntityType = String;

/// Decision a role holds for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Effect {
    /// Permits access to the rows the resource matches
    Grant,
    /// Forbids access; takes precedence over any grant
    Deny,
    /// No opinion
    Abstain,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Grant => write!(f, "GRANT"),
            Effect::Deny => write!(f, "DENY"),
            Effect::Abstain => write!(f, "ABSTAIN"),
        }
    }
}

/// Check that a role identifier has the namespaced `Package:Name` form
pub fn is_valid_role_id(id: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_.]+:[A-Za-z0-9_]+$").expect("static pattern"))
        .is_match(id)
}

/// Principal (user, service account) the current request acts for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier (e.g., "user:alice@example.com")
    pub id: String,

    /// Whether an authentication token was successfully verified
    #[serde(default)]
    pub authenticated: bool,

    /// Roles assigned to the account
    #[serde(default)]
    pub roles: Vec<RoleId>,

    /// Additional attributes (department, tenant, ...)
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl Principal {
    /// Create an authenticated principal
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            authenticated: true,
            roles: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    /// Create an unauthenticated principal
    pub fn anonymous() -> Self {
        Self {
            id: "anonymous".to_string(),
            authenticated: false,
            roles: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    /// Add a role to the principal
    pub fn with_role(mut self, role: impl Into<RoleId>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Add an attribute to the principal
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
