//! Evaluation context for privilege conditions

use crate::types::Principal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Variables available to a privilege condition
///
/// `principal` (alias `P`) carries `id`, `authenticated`, `roles` and
/// `attributes`; `request` carries host-supplied request metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalContext {
    /// Principal attributes (id, roles, etc.)
    pub principal: HashMap<String, Value>,

    /// Request metadata (time, IP, etc.)
    pub request: HashMap<String, Value>,
}

impl EvalContext {
    /// Create a new evaluation context
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the context for a request principal
    pub fn for_principal(principal: &Principal) -> Self {
        let mut map = HashMap::new();
        map.insert("id".to_string(), json!(principal.id));
        map.insert("authenticated".to_string(), json!(principal.authenticated));
        map.insert("roles".to_string(), json!(principal.roles));
        map.insert("attributes".to_string(), json!(principal.attributes));
        Self::new().with_principal(map)
    }

    /// Create context with principal attributes
    pub fn with_principal(mut self, principal: HashMap<String, Value>) -> Self {
        self.principal = principal;
        self
    }

    /// Create context with request metadata
    pub fn with_request(mut self, request: HashMap<String, Value>) -> Self {
        self.request = request;
        self
    }

    /// Get all variables as a flat map for CEL evaluation
    pub fn to_variables(&self) -> HashMap<String, Value> {
        let principal: serde_json::Map<String, Value> = self.principal.clone().into_iter().collect();
        let request: serde_json::Map<String, Value> = self.request.clone().into_iter().collect();

        let mut vars = HashMap::new();
        vars.insert("principal".to_string(), Value::Object(principal.clone()));
        vars.insert("P".to_string(), Value::Object(principal));
        vars.insert("request".to_string(), Value::Object(request));
        vars
    }
}
