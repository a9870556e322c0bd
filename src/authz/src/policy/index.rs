//! Policy index: `(resource, role) -> effect + constraint`
//!
//! Built once from a [`PolicyDocument`] before the engine serves requests.
//! Building compiles every rule, expands sub-constraints and validates the
//! role graph, so configuration mistakes surface here instead of per query.

use super::roles::RoleGraph;
use super::{PolicyDocument, ResourceDefinition, SubConstraintOperator};
use crate::cel::Engine as CelEngine;
use crate::error::{AuthzError, Result};
use crate::expression::{ConditionNode, ExpressionCompiler};
use crate::types::{is_valid_role_id, Effect, EntityType, Principal, ResourceId, RoleId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Identifiers of the roles every request gets implicitly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemRoles {
    /// Held by every request
    pub everybody: RoleId,

    /// Held by unauthenticated requests
    pub anonymous: RoleId,

    /// Held by authenticated requests
    pub authenticated_user: RoleId,
}

impl Default for SystemRoles {
    fn default() -> Self {
        Self {
            everybody: "Rowguard:Everybody".to_string(),
            anonymous: "Rowguard:Anonymous".to_string(),
            authenticated_user: "Rowguard:AuthenticatedUser".to_string(),
        }
    }
}

impl SystemRoles {
    fn all(&self) -> [&RoleId; 3] {
        [&self.everybody, &self.anonymous, &self.authenticated_user]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Applies to every row of its entity type
    Wildcard,

    /// Applies to the rows its constraint matches
    Constraint,
}

/// Fully expanded row constraint of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceConstraint {
    pub entity_type: EntityType,
    pub condition: ConditionNode,

    /// Content hash of type and condition
    pub key: [u8; 32],
}

/// Effect one role holds for one resource
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub effect: Effect,

    /// `None` for wildcard resources
    pub constraint: Option<Arc<ResourceConstraint>>,

    /// CEL predicate; when it evaluates to false the entry counts as ABSTAIN
    pub predicate: Option<String>,
}

#[derive(Debug, Clone)]
struct ResourceInfo {
    kind: ResourceKind,
    entity_type: Option<EntityType>,

    /// Expanded constraint of a parameterless, non-wildcard resource
    constraint: Option<Arc<ResourceConstraint>>,
}

/// Read-only index over resources, roles and privileges
#[derive(Debug)]
pub struct PolicyIndex {
    resources: BTreeMap<ResourceId, ResourceInfo>,
    entries: BTreeMap<ResourceId, BTreeMap<RoleId, IndexEntry>>,
    roles: RoleGraph,
    system_roles: SystemRoles,
}

impl PolicyIndex {
    /// Build the index, compiling and validating everything it references
    pub fn build(
        document: &PolicyDocument,
        compiler: &ExpressionCompiler,
        cel: &CelEngine,
        system_roles: &SystemRoles,
    ) -> Result<Self> {
        let roles = build_role_graph(document, system_roles)?;
        let mut builder = ConstraintBuilder {
            document,
            compiler,
            parameterless: HashMap::new(),
        };

        let mut resources = BTreeMap::new();
        for (id, definition) in &document.resources {
            let info = if definition.is_wildcard() {
                let entity_type = definition.entity_type.clone().ok_or_else(|| {
                    AuthzError::InvalidPolicy(format!("wildcard resource \"{}\" needs an entity type", id))
                })?;
                if !definition.parameters.is_empty() || !definition.sub_constraints.is_empty() {
                    return Err(AuthzError::InvalidPolicy(format!(
                        "wildcard resource \"{}\" cannot have parameters or sub-constraints",
                        id
                    )));
                }
                ResourceInfo {
                    kind: ResourceKind::Wildcard,
                    entity_type: Some(entity_type),
                    constraint: None,
                }
            } else if definition.parameters.is_empty() {
                let constraint = builder.constraint(id, &BTreeMap::new(), &mut Vec::new())?;
                ResourceInfo {
                    kind: ResourceKind::Constraint,
                    entity_type: Some(constraint.entity_type.clone()),
                    constraint: Some(constraint),
                }
            } else {
                let unique: BTreeSet<&String> = definition.parameters.iter().collect();
                if unique.len() != definition.parameters.len() {
                    return Err(AuthzError::InvalidPolicy(format!(
                        "resource \"{}\" declares a parameter twice",
                        id
                    )));
                }
                ResourceInfo {
                    kind: ResourceKind::Constraint,
                    entity_type: definition.entity_type.clone(),
                    constraint: None,
                }
            };
            resources.insert(id.clone(), info);
        }

        let mut entries: BTreeMap<ResourceId, BTreeMap<RoleId, IndexEntry>> = BTreeMap::new();
        for (role, definition) in &document.roles {
            let mut seen = BTreeSet::new();
            for privilege in &definition.privileges {
                let info = resources.get(&privilege.resource).ok_or_else(|| AuthzError::UnknownResourceReference {
                    resource: privilege.resource.clone(),
                    referenced_by: format!("role \"{}\"", role),
                })?;
                if !seen.insert(privilege.resource.as_str()) {
                    return Err(AuthzError::InvalidPolicy(format!(
                        "role \"{}\" has more than one privilege for \"{}\"",
                        role, privilege.resource
                    )));
                }
                if let Some(condition) = &privilege.condition {
                    cel.compile(condition)?;
                }

                let constraint = match info.kind {
                    ResourceKind::Wildcard => {
                        if !privilege.parameters.is_empty() {
                            return Err(AuthzError::InvalidPolicy(format!(
                                "wildcard resource \"{}\" takes no parameters",
                                privilege.resource
                            )));
                        }
                        None
                    }
                    ResourceKind::Constraint => {
                        Some(builder.constraint(&privilege.resource, &privilege.parameters, &mut Vec::new())?)
                    }
                };

                entries.entry(privilege.resource.clone()).or_default().insert(
                    role.clone(),
                    IndexEntry {
                        effect: privilege.permission,
                        constraint,
                        predicate: privilege.condition.clone(),
                    },
                );
            }
        }

        // Everybody abstains from every parameterless resource it has no privilege for
        for (id, definition) in &document.resources {
            if !definition.parameters.is_empty() {
                continue;
            }
            let role_entries = entries.entry(id.clone()).or_default();
            if role_entries.contains_key(&system_roles.everybody) {
                continue;
            }
            role_entries.insert(
                system_roles.everybody.clone(),
                IndexEntry {
                    effect: Effect::Abstain,
                    constraint: resources[id].constraint.clone(),
                    predicate: None,
                },
            );
        }

        let index = Self {
            resources,
            entries,
            roles,
            system_roles: system_roles.clone(),
        };
        info!(
            "PolicyIndex built with {} resources, {} entries and {} roles",
            index.resources.len(),
            index.entry_count(),
            index.roles.roles().count()
        );
        Ok(index)
    }

    /// Whether any entity resource is defined at all
    pub fn has_entity_resources(&self) -> bool {
        !self.resources.is_empty()
    }

    pub fn resource_kind(&self, resource: &str) -> Option<ResourceKind> {
        self.resources.get(resource).map(|info| info.kind)
    }

    /// Entity types covered by at least one resource
    pub fn entity_types(&self) -> BTreeSet<&str> {
        let declared = self.resources.values().filter_map(|info| info.entity_type.as_deref());
        let compiled = self
            .entries
            .values()
            .flat_map(|roles| roles.values())
            .filter_map(|entry| entry.constraint.as_ref().map(|c| c.entity_type.as_str()));
        declared.chain(compiled).collect()
    }

    /// Wildcard resources of an entity type, sorted
    pub fn wildcard_resources(&self, entity_type: &str) -> Vec<&ResourceId> {
        self.resources
            .iter()
            .filter(|(_, info)| info.kind == ResourceKind::Wildcard && info.entity_type.as_deref() == Some(entity_type))
            .map(|(id, _)| id)
            .collect()
    }

    /// Parameterless constraint resources of an entity type, sorted
    pub fn constraint_resources<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> impl Iterator<Item = (&'a ResourceId, &'a Arc<ResourceConstraint>)> + 'a {
        self.resources.iter().filter_map(move |(id, info)| match &info.constraint {
            Some(constraint) if constraint.entity_type == entity_type => Some((id, constraint)),
            _ => None,
        })
    }

    /// Role entries of one resource, sorted by role
    pub fn entries_for(&self, resource: &str) -> Option<&BTreeMap<RoleId, IndexEntry>> {
        self.entries.get(resource)
    }

    pub fn entry(&self, resource: &str, role: &str) -> Option<&IndexEntry> {
        self.entries.get(resource).and_then(|roles| roles.get(role))
    }

    /// Non-wildcard entries whose constraint targets `entity_type`, sorted by
    /// resource then role
    pub fn constraint_entries<'a>(
        &'a self,
        entity_type: &'a str,
    ) -> impl Iterator<Item = (&'a ResourceId, &'a RoleId, &'a IndexEntry)> + 'a {
        self.entries.iter().flat_map(move |(resource, roles)| {
            roles.iter().filter_map(move |(role, entry)| match &entry.constraint {
                Some(constraint) if constraint.entity_type == entity_type => Some((resource, role, entry)),
                _ => None,
            })
        })
    }

    pub fn entry_count(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn roles(&self) -> &RoleGraph {
        &self.roles
    }

    pub fn system_roles(&self) -> &SystemRoles {
        &self.system_roles
    }

    /// Assigned roles plus the implicit system roles, flattened through
    /// inheritance
    pub fn roles_for(&self, principal: &Principal) -> Result<BTreeSet<RoleId>> {
        let mut assigned: Vec<RoleId> = principal.roles.clone();
        assigned.push(self.system_roles.everybody.clone());
        assigned.push(if principal.authenticated {
            self.system_roles.authenticated_user.clone()
        } else {
            self.system_roles.anonymous.clone()
        });
        let flattened = self.roles.flatten(&assigned)?;
        debug!("Principal {} holds roles {:?}", principal.id, flattened);
        Ok(flattened)
    }
}

/// Validate role identifiers and build the inheritance graph
fn build_role_graph(document: &PolicyDocument, system_roles: &SystemRoles) -> Result<RoleGraph> {
    let mut parents: BTreeMap<RoleId, Vec<RoleId>> = document
        .roles
        .iter()
        .map(|(role, definition)| (role.clone(), definition.parent_roles.clone()))
        .collect();
    for role in system_roles.all() {
        parents.entry(role.clone()).or_default();
    }

    if let Some(invalid) = parents.keys().find(|role| !is_valid_role_id(role)) {
        return Err(AuthzError::InvalidPolicy(format!(
            "role identifier \"{}\" is not of the form Package:Name",
            invalid
        )));
    }

    Ok(RoleGraph::build(parents)?)
}

/// Compiles resources into expanded constraints
struct ConstraintBuilder<'a> {
    document: &'a PolicyDocument,
    compiler: &'a ExpressionCompiler,

    /// Expanded parameterless resources
    parameterless: HashMap<ResourceId, Arc<ResourceConstraint>>,
}

impl ConstraintBuilder<'_> {
    /// Expand a resource, following sub-constraint references
    fn constraint(
        &mut self,
        id: &str,
        parameters: &BTreeMap<String, Value>,
        trace: &mut Vec<String>,
    ) -> Result<Arc<ResourceConstraint>> {
        if trace.iter().any(|visited| visited == id) {
            let mut cycle = trace.clone();
            cycle.push(id.to_string());
            return Err(AuthzError::CyclicResourceReference(cycle.join(" -> ")));
        }
        if parameters.is_empty() {
            if let Some(cached) = self.parameterless.get(id) {
                return Ok(cached.clone());
            }
        }

        let document = self.document;
        let definition = document.resources.get(id).ok_or_else(|| AuthzError::UnknownResourceReference {
            resource: id.to_string(),
            referenced_by: trace
                .last()
                .map(|parent| format!("resource \"{}\"", parent))
                .unwrap_or_else(|| "the policy".to_string()),
        })?;
        if definition.is_wildcard() {
            return Err(AuthzError::InvalidPolicy(format!(
                "wildcard resource \"{}\" cannot be used as a sub-constraint",
                id
            )));
        }

        let text = substitute(id, definition, parameters)?;
        let compiled = self.compiler.compile(&text)?;
        let entity_type = compiled.entity_type()?.to_string();
        if let Some(declared) = &definition.entity_type {
            if *declared != entity_type {
                return Err(AuthzError::EntityTypeMismatch {
                    tagged: entity_type,
                    target: declared.clone(),
                });
            }
        }

        let mut condition = compiled.condition.clone();
        trace.push(id.to_string());
        for sub in &definition.sub_constraints {
            let referenced = document.resources.get(&sub.resource).ok_or_else(|| {
                AuthzError::UnknownResourceReference {
                    resource: sub.resource.clone(),
                    referenced_by: format!("resource \"{}\"", id),
                }
            })?;
            if !referenced.parameters.is_empty() {
                return Err(AuthzError::InvalidPolicy(format!(
                    "resource \"{}\" takes parameters and cannot be a sub-constraint of \"{}\"",
                    sub.resource, id
                )));
            }
            let sub_constraint = self.constraint(&sub.resource, &BTreeMap::new(), trace)?;
            if sub_constraint.entity_type != entity_type {
                return Err(AuthzError::EntityTypeMismatch {
                    tagged: sub_constraint.entity_type.clone(),
                    target: entity_type,
                });
            }
            condition = combine(condition, sub.operator, sub_constraint.condition.clone());
        }
        trace.pop();

        let mut hasher = blake3::Hasher::new();
        hasher.update(entity_type.as_bytes());
        hasher.update(&[0]);
        hasher.update(&serde_json::to_vec(&condition)?);
        let constraint = Arc::new(ResourceConstraint {
            entity_type,
            condition,
            key: *hasher.finalize().as_bytes(),
        });

        if parameters.is_empty() {
            self.parameterless.insert(id.to_string(), constraint.clone());
        }
        Ok(constraint)
    }
}

fn combine(base: ConditionNode, operator: SubConstraintOperator, sub: ConditionNode) -> ConditionNode {
    match operator {
        SubConstraintOperator::And => ConditionNode::And(vec![base, sub]),
        SubConstraintOperator::AndNot => ConditionNode::And(vec![base, ConditionNode::negate(sub)]),
        SubConstraintOperator::Or => ConditionNode::Or(vec![base, sub]),
        SubConstraintOperator::OrNot => ConditionNode::Or(vec![base, ConditionNode::negate(sub)]),
    }
}

/// Fill `{name}` placeholders of the matcher with privilege parameter values
fn substitute(id: &str, definition: &ResourceDefinition, values: &BTreeMap<String, Value>) -> Result<String> {
    if let Some(missing) = definition.parameters.iter().find(|name| !values.contains_key(*name)) {
        return Err(AuthzError::InvalidPolicy(format!(
            "missing value for parameter \"{}\" of resource \"{}\"",
            missing, id
        )));
    }
    if let Some(unknown) = values.keys().find(|name| !definition.parameters.contains(name)) {
        return Err(AuthzError::InvalidPolicy(format!(
            "resource \"{}\" has no parameter \"{}\"",
            id, unknown
        )));
    }

    let mut text = definition.matcher.clone();
    for (name, value) in values {
        let replacement = match value {
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        };
        text = text.replace(&format!("{{{}}}", name), &replacement);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Combinator, OperandSource, Operator, StaticFrontEnd};
    use crate::policy::{PrivilegeDefinition, RoleDefinition};

    const OWN: &str = "isType(\"Document\") && property(\"owner\").equals(context.user.id)";
    const ARCHIVED: &str = "isType(\"Document\") && property(\"archived\").equals(true)";
    const TENANT_ACME: &str = "isType(\"Document\") && property(\"tenant\").equals(\"acme\")";
    const UNTYPED: &str = "property(\"title\").equals(\"x\")";

    fn front_end() -> StaticFrontEnd {
        let typed = |entity: &str, property: &str, operand: OperandSource| {
            vec![
                Combinator::is_type(entity),
                Combinator::property(property),
                Combinator::compare(Operator::Eq, operand),
                Combinator::and(2),
            ]
        };
        StaticFrontEnd::new()
            .with_rule(OWN, typed("Document", "owner", OperandSource::global("user", "id")))
            .with_rule(ARCHIVED, typed("Document", "archived", OperandSource::literal(true)))
            .with_rule(TENANT_ACME, typed("Document", "tenant", OperandSource::literal("acme")))
            .with_rule(
                UNTYPED,
                vec![
                    Combinator::property("title"),
                    Combinator::compare(Operator::Eq, OperandSource::literal("x")),
                ],
            )
    }

    fn build(document: &PolicyDocument) -> Result<PolicyIndex> {
        let compiler = ExpressionCompiler::new(Arc::new(front_end()));
        PolicyIndex::build(document, &compiler, &CelEngine::new(), &SystemRoles::default())
    }

    #[test]
    fn test_everybody_abstains_by_default() {
        let document = PolicyDocument::new()
            .with_resource("Acme:Own", ResourceDefinition::matching(OWN))
            .with_resource("Acme:AllInvoices", ResourceDefinition::any("Invoice"))
            .with_role("Acme:Editor", RoleDefinition::new().with("Acme:Own", Effect::Grant));
        let index = build(&document).unwrap();

        let everybody = &SystemRoles::default().everybody;
        assert_eq!(index.entry("Acme:Own", everybody).unwrap().effect, Effect::Abstain);
        assert_eq!(index.entry("Acme:AllInvoices", everybody).unwrap().effect, Effect::Abstain);
        assert_eq!(index.entry("Acme:Own", "Acme:Editor").unwrap().effect, Effect::Grant);

        assert_eq!(index.wildcard_resources("Invoice"), vec!["Acme:AllInvoices"]);
        let document_entries: Vec<_> = index.constraint_entries("Document").map(|(_, role, _)| role.as_str()).collect();
        assert_eq!(document_entries, vec!["Acme:Editor", everybody.as_str()]);
        assert_eq!(index.entity_types().into_iter().collect::<Vec<_>>(), vec!["Document", "Invoice"]);
    }

    #[test]
    fn test_sub_constraints_expand() {
        let document = PolicyDocument::new()
            .with_resource(
                "Acme:OwnActive",
                ResourceDefinition::matching(OWN).with_sub_constraint(SubConstraintOperator::AndNot, "Acme:Archived"),
            )
            .with_resource("Acme:Archived", ResourceDefinition::matching(ARCHIVED));
        let index = build(&document).unwrap();

        let everybody = &SystemRoles::default().everybody;
        let constraint = index
            .entry("Acme:OwnActive", everybody)
            .and_then(|entry| entry.constraint.clone())
            .unwrap();
        assert_eq!(
            constraint.condition,
            ConditionNode::And(vec![
                ConditionNode::compare("owner", Operator::Eq, OperandSource::global("user", "id")),
                ConditionNode::negate(ConditionNode::compare("archived", Operator::Eq, OperandSource::literal(true))),
            ])
        );
    }

    #[test]
    fn test_cyclic_and_unknown_sub_constraints() {
        let cyclic = PolicyDocument::new()
            .with_resource(
                "Acme:A",
                ResourceDefinition::matching(OWN).with_sub_constraint(SubConstraintOperator::And, "Acme:B"),
            )
            .with_resource(
                "Acme:B",
                ResourceDefinition::matching(ARCHIVED).with_sub_constraint(SubConstraintOperator::Or, "Acme:A"),
            );
        match build(&cyclic).unwrap_err() {
            AuthzError::CyclicResourceReference(path) => assert_eq!(path, "Acme:A -> Acme:B -> Acme:A"),
            other => panic!("expected cycle, got {:?}", other),
        }

        let unknown = PolicyDocument::new().with_resource(
            "Acme:A",
            ResourceDefinition::matching(OWN).with_sub_constraint(SubConstraintOperator::And, "Acme:Missing"),
        );
        assert!(matches!(
            build(&unknown),
            Err(AuthzError::UnknownResourceReference { ref resource, .. }) if resource == "Acme:Missing"
        ));
    }

    #[test]
    fn test_parameterized_resource() {
        let document = PolicyDocument::new()
            .with_resource(
                "Acme:TenantDocuments",
                ResourceDefinition::matching("isType(\"Document\") && property(\"tenant\").equals(\"{tenant}\")")
                    .with_parameter("tenant"),
            )
            .with_role(
                "Acme:AcmeStaff",
                RoleDefinition::new().with_privilege(
                    PrivilegeDefinition::new("Acme:TenantDocuments", Effect::Grant).with_parameter("tenant", "acme"),
                ),
            );
        let index = build(&document).unwrap();

        let entry = index.entry("Acme:TenantDocuments", "Acme:AcmeStaff").unwrap();
        assert_eq!(
            entry.constraint.as_ref().unwrap().condition,
            ConditionNode::compare("tenant", Operator::Eq, OperandSource::literal("acme"))
        );
        // Parameterized resources get no implicit entry
        assert!(index.entry("Acme:TenantDocuments", &SystemRoles::default().everybody).is_none());

        let missing = PolicyDocument::new()
            .with_resource(
                "Acme:TenantDocuments",
                ResourceDefinition::matching("isType(\"Document\")").with_parameter("tenant"),
            )
            .with_role("Acme:Staff", RoleDefinition::new().with("Acme:TenantDocuments", Effect::Grant));
        assert!(matches!(build(&missing), Err(AuthzError::InvalidPolicy(_))));
    }

    #[test]
    fn test_build_time_validation() {
        let untyped = PolicyDocument::new().with_resource("Acme:Untyped", ResourceDefinition::matching(UNTYPED));
        assert!(matches!(build(&untyped), Err(AuthzError::EntityTypeUndetermined(_))));

        let unknown_resource =
            PolicyDocument::new().with_role("Acme:Editor", RoleDefinition::new().with("Acme:Nope", Effect::Deny));
        assert!(matches!(build(&unknown_resource), Err(AuthzError::UnknownResourceReference { .. })));

        let unknown_parent =
            PolicyDocument::new().with_role("Acme:Editor", RoleDefinition::new().with_parent("Acme:Ghost"));
        assert!(matches!(build(&unknown_parent), Err(AuthzError::UnknownRole { .. })));

        let cyclic_roles = PolicyDocument::new()
            .with_role("Acme:A", RoleDefinition::new().with_parent("Acme:B"))
            .with_role("Acme:B", RoleDefinition::new().with_parent("Acme:A"));
        assert!(matches!(build(&cyclic_roles), Err(AuthzError::CyclicRoleInheritance(_))));

        let bad_id = PolicyDocument::new().with_role("Editor", RoleDefinition::new());
        assert!(matches!(build(&bad_id), Err(AuthzError::InvalidPolicy(_))));

        let duplicate = PolicyDocument::new()
            .with_resource("Acme:Own", ResourceDefinition::matching(OWN))
            .with_role(
                "Acme:Editor",
                RoleDefinition::new().with("Acme:Own", Effect::Grant).with("Acme:Own", Effect::Deny),
            );
        assert!(matches!(build(&duplicate), Err(AuthzError::InvalidPolicy(_))));

        let bad_condition = PolicyDocument::new()
            .with_resource("Acme:Own", ResourceDefinition::matching(OWN))
            .with_role(
                "Acme:Editor",
                RoleDefinition::new().with_privilege(
                    PrivilegeDefinition::new("Acme:Own", Effect::Grant).with_condition("principal.id ==="),
                ),
            );
        assert!(matches!(build(&bad_condition), Err(AuthzError::InvalidPolicy(_))));

        let mismatched = PolicyDocument::new()
            .with_resource("Acme:Own", ResourceDefinition::matching(OWN).with_entity_type("Invoice"));
        assert!(matches!(build(&mismatched), Err(AuthzError::EntityTypeMismatch { .. })));
    }

    #[test]
    fn test_roles_for_principal() {
        let document = PolicyDocument::new()
            .with_role("Acme:Editor", RoleDefinition::new().with_parent("Acme:Reader"))
            .with_role("Acme:Reader", RoleDefinition::new());
        let index = build(&document).unwrap();
        let system = SystemRoles::default();

        let roles = index.roles_for(&Principal::new("alice").with_role("Acme:Editor")).unwrap();
        assert!(roles.contains("Acme:Reader"));
        assert!(roles.contains(&system.everybody));
        assert!(roles.contains(&system.authenticated_user));
        assert!(!roles.contains(&system.anonymous));

        let roles = index.roles_for(&Principal::anonymous()).unwrap();
        assert_eq!(roles.len(), 2);
        assert!(roles.contains(&system.anonymous));

        assert!(matches!(
            index.roles_for(&Principal::new("bob").with_role("Acme:Ghost")),
            Err(AuthzError::UnknownRole { .. })
        ));
    }
}
