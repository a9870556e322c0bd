//! Effect combination
//!
//! Merges the GRANT/DENY/ABSTAIN effects every role holds for the resources of
//! one entity type into a single row filter.
//!
//! # Rendered-text combination
//!
//! ```text
//! for every (resource, role) entry of the type:
//!     f = render(resource constraint)
//!     AllExclusions += NOT (f)
//!     role active and GRANT  =>  Granted += NOT (f)
//!     role active and DENY   =>  Denied  += NOT (f)
//! Effective = AllExclusions - (Granted - Denied)
//! filter    = AND of Effective, or no filter when empty
//! ```
//!
//! Matching is by exact rendered text: two resources whose constraints render
//! identically are the same exclusion.

use crate::cel::{Engine as CelEngine, EvalContext};
use crate::error::{AuthzError, Result};
use crate::expression::ConditionNode;
use crate::policy::{IndexEntry, PolicyIndex, ResourceConstraint};
use crate::synth::{Fragment, NamedParameters, OperandResolver, QueryTarget, Synthesizer};
use crate::types::{Effect, ResourceId, RoleId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// How constraint resources are merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CombinationMode {
    /// Exclusions matched by rendered text
    #[default]
    RenderedText,

    /// Per-resource abstained and denied buckets, as a condition tree
    ResourceBuckets,
}

impl std::str::FromStr for CombinationMode {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "renderedtext" | "text" => Ok(CombinationMode::RenderedText),
            "resourcebuckets" | "buckets" => Ok(CombinationMode::ResourceBuckets),
            other => Err(AuthzError::InvalidPolicy(format!("unknown combination mode \"{}\"", other))),
        }
    }
}

/// Filter fragment with the parameters it binds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFilter {
    pub sql: String,
    pub params: Vec<(String, Value)>,
}

impl fmt::Display for RenderedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Result of combining the effects for one query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Every row is visible
    Unrestricted,

    /// No row is visible: the wildcard resource of the type was not granted
    Refused,

    /// Rows must match the filter
    Restricted(RenderedFilter),
}

impl FilterOutcome {
    /// The fragment to attach to the query, if any
    pub fn into_filter(self) -> Option<RenderedFilter> {
        match self {
            FilterOutcome::Unrestricted => None,
            FilterOutcome::Refused => Some(RenderedFilter {
                sql: "(1 = 0)".to_string(),
                params: Vec::new(),
            }),
            FilterOutcome::Restricted(filter) => Some(filter),
        }
    }
}

/// Everything one combination needs from the request
pub struct CombineRequest<'r> {
    pub target: QueryTarget,
    pub roles: &'r BTreeSet<RoleId>,
    pub operands: &'r dyn OperandResolver,
    pub eval: EvalContext,
}

/// Resolves effects for one entity type against the policy index
pub struct EffectCombiner<'a> {
    index: &'a PolicyIndex,
    synth: &'a Synthesizer,
    cel: &'a CelEngine,
}

impl<'a> EffectCombiner<'a> {
    pub fn new(index: &'a PolicyIndex, synth: &'a Synthesizer, cel: &'a CelEngine) -> Self {
        Self { index, synth, cel }
    }

    /// Wildcard gate, then constraint combination in the requested mode
    pub fn combine(&self, request: &CombineRequest<'_>, mode: CombinationMode) -> Result<FilterOutcome> {
        if !self.general_access(request)? {
            debug!("General access to {} refused", request.target.entity_type);
            return Ok(FilterOutcome::Refused);
        }

        let filter = match mode {
            CombinationMode::RenderedText => self.combine_rendered(request)?,
            CombinationMode::ResourceBuckets => match self.combine_buckets(request)? {
                Some(condition) => {
                    let mut params = NamedParameters::new();
                    let fragment = self.synth.render(&condition, &request.target, request.operands, &mut params)?;
                    Some(RenderedFilter {
                        sql: fragment.sql,
                        params: params.into_params(),
                    })
                }
                None => None,
            },
        };

        Ok(match filter {
            Some(filter) => FilterOutcome::Restricted(filter),
            None => FilterOutcome::Unrestricted,
        })
    }

    /// Whether the active roles may see the entity type at all
    ///
    /// Without a wildcard resource for the type access is granted. Otherwise any
    /// DENY refuses, else any GRANT permits, else access is refused.
    pub fn general_access(&self, request: &CombineRequest<'_>) -> Result<bool> {
        let wildcards = self.index.wildcard_resources(&request.target.entity_type);
        if wildcards.is_empty() {
            return Ok(true);
        }

        let mut granted = false;
        for resource in wildcards {
            let Some(entries) = self.index.entries_for(resource) else {
                continue;
            };
            for (role, entry) in entries {
                if !request.roles.contains(role) {
                    continue;
                }
                match self.effect_of(entry, &request.eval)? {
                    Effect::Deny => {
                        debug!("Role {} denies {} through {}", role, request.target.entity_type, resource);
                        return Ok(false);
                    }
                    Effect::Grant => granted = true,
                    Effect::Abstain => {}
                }
            }
        }
        Ok(granted)
    }

    /// Rendered-text combination; `None` when no exclusion remains
    pub fn combine_rendered(&self, request: &CombineRequest<'_>) -> Result<Option<RenderedFilter>> {
        let mut params = NamedParameters::new();
        let mut rendered: HashMap<[u8; 32], Fragment> = HashMap::new();

        let mut exclusions: Vec<String> = Vec::new();
        let mut exclusion_params: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut granted: HashSet<String> = HashSet::new();
        let mut denied: HashSet<String> = HashSet::new();

        for (resource, role, entry) in self.index.constraint_entries(&request.target.entity_type) {
            let Some(constraint) = &entry.constraint else {
                continue;
            };
            let fragment = match rendered.get(&constraint.key) {
                Some(fragment) => fragment.clone(),
                None => {
                    let fragment =
                        self.synth
                            .render(&constraint.condition, &request.target, request.operands, &mut params)?;
                    rendered.insert(constraint.key, fragment.clone());
                    fragment
                }
            };

            let exclusion = format!("NOT ({})", fragment.sql);
            if !exclusion_params.contains_key(&exclusion) {
                exclusions.push(exclusion.clone());
                exclusion_params.insert(exclusion.clone(), fragment.parameters);
            }

            if request.roles.contains(role) {
                match self.effect_of(entry, &request.eval)? {
                    Effect::Grant => {
                        granted.insert(exclusion);
                    }
                    Effect::Deny => {
                        debug!("Role {} denies rows of {} matching {}", role, resource, fragment.sql);
                        denied.insert(exclusion);
                    }
                    Effect::Abstain => {}
                }
            }
        }

        let effective_grants: HashSet<&String> = granted.difference(&denied).collect();
        let effective: Vec<&String> = exclusions
            .iter()
            .filter(|exclusion| !effective_grants.contains(exclusion))
            .collect();

        if effective.is_empty() {
            return Ok(None);
        }

        let used: BTreeSet<&String> = effective
            .iter()
            .flat_map(|exclusion| exclusion_params[*exclusion].iter())
            .collect();
        let sql = effective.iter().map(|exclusion| exclusion.as_str()).collect::<Vec<_>>().join(" AND ");
        let params = params
            .into_params()
            .into_iter()
            .filter(|(name, _)| used.contains(name))
            .collect();

        Ok(Some(RenderedFilter { sql, params }))
    }

    /// Bucket combination over resources; `None` when nothing is excluded
    ///
    /// Active roles without an entry for a parameterless resource count as
    /// abstaining from it. A resource granted by any active role leaves the
    /// abstained bucket; denied resources stay excluded regardless.
    pub fn combine_buckets(&self, request: &CombineRequest<'_>) -> Result<Option<ConditionNode>> {
        type BucketKey<'k> = (&'k ResourceId, [u8; 32]);

        let entity_type = &request.target.entity_type;
        let mut abstained: BTreeMap<BucketKey<'_>, Arc<ResourceConstraint>> = BTreeMap::new();
        let mut denied: BTreeMap<BucketKey<'_>, Arc<ResourceConstraint>> = BTreeMap::new();
        let mut granted: BTreeSet<&ResourceId> = BTreeSet::new();

        for (resource, role, entry) in self.index.constraint_entries(entity_type) {
            if !request.roles.contains(role) {
                continue;
            }
            let Some(constraint) = &entry.constraint else {
                continue;
            };
            let key = (resource, constraint.key);
            match self.effect_of(entry, &request.eval)? {
                Effect::Grant => {
                    granted.insert(resource);
                }
                Effect::Deny => {
                    denied.insert(key, constraint.clone());
                }
                Effect::Abstain => {
                    abstained.insert(key, constraint.clone());
                }
            }
        }

        for (resource, constraint) in self.index.constraint_resources(entity_type) {
            let absent = request
                .roles
                .iter()
                .any(|role| self.index.entry(resource, role).is_none());
            if absent {
                abstained.insert((resource, constraint.key), constraint.clone());
            }
        }

        abstained.retain(|(resource, _), _| !granted.contains(resource));
        for (key, constraint) in denied {
            abstained.insert(key, constraint);
        }

        if abstained.is_empty() {
            return Ok(None);
        }
        Ok(Some(ConditionNode::And(
            abstained
                .into_values()
                .map(|constraint| ConditionNode::negate(constraint.condition.clone()))
                .collect(),
        )))
    }

    /// Effect of an entry for this request; a false predicate means ABSTAIN
    fn effect_of(&self, entry: &IndexEntry, eval: &EvalContext) -> Result<Effect> {
        match (&entry.predicate, entry.effect) {
            (_, Effect::Abstain) | (None, _) => Ok(entry.effect),
            (Some(predicate), effect) => {
                if self.cel.evaluate_expression(predicate, eval)? {
                    Ok(effect)
                } else {
                    debug!("Privilege condition \"{}\" is false, abstaining", predicate);
                    Ok(Effect::Abstain)
                }
            }
        }
    }
}
