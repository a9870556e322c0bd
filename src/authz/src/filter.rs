//! Query filter entry point
//!
//! Decides per outgoing entity query whether row filtering applies and, if it
//! does, attaches the rendered fragment to the query.
//!
//! ```text
//! Disabled      checks suspended, engine disabled or no entity resources
//! ExemptType    target type is on the exemption list
//! Uninitialized context has no principal yet: query runs unfiltered
//! Active        filter rendered and attached, once per query
//! ```

use crate::context::{QueryId, SecurityContext};
use crate::engine::{FilterOutcome, RowFilterEngine};
use crate::error::Result;
use crate::types::EntityType;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Filtering state of one query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Disabled,
    ExemptType,
    Uninitialized,
    Active,
}

/// Entity query as seen by the filter
#[derive(Debug, Clone, PartialEq)]
pub struct EntityQuery {
    pub id: QueryId,
    pub entity_type: EntityType,
    pub alias: String,

    /// Fragments the query must satisfy, conjoined
    pub constraints: Vec<String>,

    /// Named parameters the fragments bind
    pub parameters: Vec<(String, Value)>,

    /// Set when the wildcard gate refused the query
    pub refused: bool,
}

impl EntityQuery {
    pub fn new(entity_type: impl Into<EntityType>, alias: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            alias: alias.into(),
            constraints: Vec::new(),
            parameters: Vec::new(),
            refused: false,
        }
    }

    /// Conjunction of every attached constraint
    pub fn where_clause(&self) -> Option<String> {
        match self.constraints.as_slice() {
            [] => None,
            [single] => Some(single.clone()),
            many => Some(
                many.iter()
                    .map(|constraint| format!("({})", constraint))
                    .collect::<Vec<_>>()
                    .join(" AND "),
            ),
        }
    }
}

/// Applies row filters to entity queries
pub struct QueryFilter {
    engine: Arc<RowFilterEngine>,
}

impl QueryFilter {
    pub fn new(engine: Arc<RowFilterEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &RowFilterEngine {
        &self.engine
    }

    /// Current state for `query`; initializes the context when it can be
    pub fn state(&self, query: &EntityQuery, context: &SecurityContext) -> FilterState {
        if context.are_authorization_checks_disabled()
            || !self.engine.is_enabled()
            || !self.engine.has_entity_resources()
        {
            return FilterState::Disabled;
        }
        if self.engine.is_exempt_type(&query.entity_type) {
            return FilterState::ExemptType;
        }
        if !context.initialize() {
            return FilterState::Uninitialized;
        }
        FilterState::Active
    }

    /// Attach the row filter to `query` if filtering applies
    pub fn apply(&self, query: &mut EntityQuery, context: &SecurityContext) -> Result<FilterState> {
        let state = self.state(query, context);
        if state != FilterState::Active {
            debug!("Query {} on {} not filtered: {:?}", query.id, query.entity_type, state);
            return Ok(state);
        }
        if context.is_filtered(query.id) {
            debug!("Query {} already filtered", query.id);
            return Ok(state);
        }

        let roles = context.active_roles(self.engine.index())?;
        match self.engine.evaluate(&query.entity_type, &query.alias, roles, context)? {
            FilterOutcome::Unrestricted => {}
            FilterOutcome::Refused => {
                query.refused = true;
                query.constraints.push("(1 = 0)".to_string());
            }
            FilterOutcome::Restricted(filter) => {
                query.constraints.push(filter.sql);
                query.parameters.extend(filter.params);
            }
        }
        context.mark_filtered(query.id);
        Ok(state)
    }
}
