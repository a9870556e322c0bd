//! Effect combination through the public engine API
//!
//! Role effects → wildcard gate → exclusion combination → rendered fragment

use rowguard_authz::{
    CombinationMode, Combinator, Effect, EngineConfig, EntityMapping, FilterOutcome, GlobalObjects,
    OperandSource, Operator, PolicyDocument, Principal, ResourceDefinition, RoleDefinition, RowFilterEngine,
    SecurityContext, StaticFrontEnd, StaticMetadata,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

const OWN: &str = r#"isType("Document") && property("owner").equals(context.user.id)"#;
const FOREIGN: &str = r#"isType("Document") && property("owner").notEquals(context.user.id)"#;
const DRAFTS: &str = r#"isType("Document") && property("status").equals("draft")"#;
const DRAFTS_AGAIN: &str = r#"isType("Document") && property("status") == "draft""#;
const LARGE_INVOICES: &str = r#"isType("Invoice") && property("total") > 1000"#;

fn front_end() -> StaticFrontEnd {
    let document_rule = |property: &str, operator: Operator, operand: OperandSource| {
        vec![
            Combinator::is_type("Document"),
            Combinator::property(property),
            Combinator::compare(operator, operand),
            Combinator::and(2),
        ]
    };
    StaticFrontEnd::new()
        .with_rule(OWN, document_rule("owner", Operator::Eq, OperandSource::global("user", "id")))
        .with_rule(FOREIGN, document_rule("owner", Operator::Ne, OperandSource::global("user", "id")))
        .with_rule(DRAFTS, document_rule("status", Operator::Eq, OperandSource::literal("draft")))
        .with_rule(DRAFTS_AGAIN, document_rule("status", Operator::Eq, OperandSource::literal("draft")))
        .with_rule(
            LARGE_INVOICES,
            vec![
                Combinator::is_type("Invoice"),
                Combinator::property("total"),
                Combinator::compare(Operator::Gt, OperandSource::literal(1000)),
                Combinator::and(2),
            ],
        )
}

fn metadata() -> StaticMetadata {
    StaticMetadata::new()
        .with_entity(
            "Document",
            EntityMapping::new("documents")
                .with_field("owner", "owner_id")
                .with_field("status", "status"),
        )
        .with_entity("Invoice", EntityMapping::new("invoices").with_field("total", "total"))
}

fn engine(document: PolicyDocument) -> RowFilterEngine {
    engine_with(EngineConfig::default(), document)
}

fn engine_with(config: EngineConfig, document: PolicyDocument) -> RowFilterEngine {
    RowFilterEngine::new(config, &document, Arc::new(front_end()), Arc::new(metadata())).unwrap()
}

/// Context whose `context.user` is `{"id": 42}`
fn context(principal: Principal) -> SecurityContext {
    let globals = GlobalObjects::new().with("user", |_: &SecurityContext| Ok(json!({"id": 42})));
    SecurityContext::new(principal, globals)
}

fn roles(engine: &RowFilterEngine, context: &SecurityContext) -> BTreeSet<String> {
    context.active_roles(engine.index()).unwrap().clone()
}

// ============================================================================
// DOCUMENT OWNER SCENARIO
// ============================================================================

#[test]
fn test_owner_scenario_restricts_documents_only() {
    let engine = engine(
        PolicyDocument::new()
            .with_resource("Acme:OwnDocuments", ResourceDefinition::matching(OWN))
            .with_resource("Acme:ForeignDocuments", ResourceDefinition::matching(FOREIGN))
            .with_role("Acme:Editor", RoleDefinition::new().with("Acme:OwnDocuments", Effect::Grant)),
    );
    let editor = context(Principal::new("u42").with_role("Acme:Editor"));
    let roles = roles(&engine, &editor);

    let filter = engine.render_filter("Document", "d", &roles, &editor).unwrap().unwrap();
    assert_eq!(filter.sql, "NOT (d.owner_id <> :p0)");
    assert_eq!(filter.params, vec![("p0".to_string(), json!(42))]);

    assert!(engine.render_filter("Invoice", "i", &roles, &editor).unwrap().is_none());
    assert!(engine.render_filter("Tag", "t", &roles, &editor).unwrap().is_none());
}

#[test]
fn test_granted_owner_rule_leaves_no_filter() {
    let engine = engine(
        PolicyDocument::new()
            .with_resource("Acme:OwnDocuments", ResourceDefinition::matching(OWN))
            .with_role("Acme:Editor", RoleDefinition::new().with("Acme:OwnDocuments", Effect::Grant)),
    );

    let editor = context(Principal::new("u42").with_role("Acme:Editor"));
    assert!(engine
        .render_filter("Document", "d", &roles(&engine, &editor), &editor)
        .unwrap()
        .is_none());

    let visitor = context(Principal::new("u7"));
    let filter = engine
        .render_filter("Document", "d", &roles(&engine, &visitor), &visitor)
        .unwrap()
        .unwrap();
    assert_eq!(filter.sql, "NOT (d.owner_id = :p0)");
}

// ============================================================================
// WILDCARD GATE
// ============================================================================

#[test]
fn test_admin_only_invoices_refused_for_guest() {
    let engine = engine(
        PolicyDocument::new()
            .with_resource("Acme:AdminOnly", ResourceDefinition::any("Invoice"))
            .with_role("Acme:Guest", RoleDefinition::new().with("Acme:AdminOnly", Effect::Deny))
            .with_role("Acme:Editor", RoleDefinition::new())
            .with_role("Acme:Admin", RoleDefinition::new().with("Acme:AdminOnly", Effect::Grant)),
    );

    let both = context(Principal::new("u1").with_role("Acme:Guest").with_role("Acme:Editor"));
    let roles_both = roles(&engine, &both);
    assert_eq!(
        engine.evaluate("Invoice", "i", &roles_both, &both).unwrap(),
        FilterOutcome::Refused
    );
    assert_eq!(
        engine.render_filter("Invoice", "i", &roles_both, &both).unwrap().unwrap().sql,
        "(1 = 0)"
    );

    // ABSTAIN only: still refused
    let editor = context(Principal::new("u2").with_role("Acme:Editor"));
    assert_eq!(
        engine.evaluate("Invoice", "i", &roles(&engine, &editor), &editor).unwrap(),
        FilterOutcome::Refused
    );

    let admin = context(Principal::new("u3").with_role("Acme:Admin"));
    assert_eq!(
        engine.evaluate("Invoice", "i", &roles(&engine, &admin), &admin).unwrap(),
        FilterOutcome::Unrestricted
    );

    let admin_guest = context(Principal::new("u4").with_role("Acme:Admin").with_role("Acme:Guest"));
    assert_eq!(
        engine
            .evaluate("Invoice", "i", &roles(&engine, &admin_guest), &admin_guest)
            .unwrap(),
        FilterOutcome::Refused
    );

    // no wildcard for documents
    assert_eq!(
        engine.evaluate("Document", "d", &roles_both, &both).unwrap(),
        FilterOutcome::Unrestricted
    );
}

#[test]
fn test_inherited_wildcard_grant() {
    let engine = engine(
        PolicyDocument::new()
            .with_resource("Acme:AllInvoices", ResourceDefinition::any("Invoice"))
            .with_role("Acme:Accountant", RoleDefinition::new().with("Acme:AllInvoices", Effect::Grant))
            .with_role("Acme:ChiefAccountant", RoleDefinition::new().with_parent("Acme:Accountant")),
    );
    let chief = context(Principal::new("u1").with_role("Acme:ChiefAccountant"));
    assert_eq!(
        engine.evaluate("Invoice", "i", &roles(&engine, &chief), &chief).unwrap(),
        FilterOutcome::Unrestricted
    );
}

#[test]
fn test_wildcard_gate_ignores_row_grants() {
    let engine = engine(
        PolicyDocument::new()
            .with_resource("Acme:AllInvoices", ResourceDefinition::any("Invoice"))
            .with_resource("Acme:LargeInvoices", ResourceDefinition::matching(LARGE_INVOICES))
            .with_role("Acme:Clerk", RoleDefinition::new().with("Acme:LargeInvoices", Effect::Grant))
            .with_role(
                "Acme:Accountant",
                RoleDefinition::new()
                    .with("Acme:AllInvoices", Effect::Grant)
                    .with("Acme:LargeInvoices", Effect::Grant),
            ),
    );

    // Row grant without a wildcard grant: the gate stays closed
    let clerk = context(Principal::new("u3").with_role("Acme:Clerk"));
    let clerk_roles = roles(&engine, &clerk);
    assert_eq!(
        engine.evaluate("Invoice", "i", &clerk_roles, &clerk).unwrap(),
        FilterOutcome::Refused
    );
    assert_eq!(
        engine.render_filter("Invoice", "i", &clerk_roles, &clerk).unwrap().unwrap().sql,
        "(1 = 0)"
    );

    let accountant = context(Principal::new("u4").with_role("Acme:Accountant"));
    assert_eq!(
        engine
            .evaluate("Invoice", "i", &roles(&engine, &accountant), &accountant)
            .unwrap(),
        FilterOutcome::Unrestricted
    );
}

// ============================================================================
// DENY OVER GRANT
// ============================================================================

#[test]
fn test_two_grants_and_one_deny_keep_exclusion() {
    let engine = engine(
        PolicyDocument::new()
            .with_resource("Acme:OwnDocuments", ResourceDefinition::matching(OWN))
            .with_role("Acme:Editor", RoleDefinition::new().with("Acme:OwnDocuments", Effect::Grant))
            .with_role("Acme:Reviewer", RoleDefinition::new().with("Acme:OwnDocuments", Effect::Grant))
            .with_role("Acme:Suspended", RoleDefinition::new().with("Acme:OwnDocuments", Effect::Deny)),
    );

    let granted = context(Principal::new("u1").with_role("Acme:Editor").with_role("Acme:Reviewer"));
    assert!(engine
        .render_filter("Document", "d", &roles(&engine, &granted), &granted)
        .unwrap()
        .is_none());

    let suspended = context(
        Principal::new("u1")
            .with_role("Acme:Editor")
            .with_role("Acme:Reviewer")
            .with_role("Acme:Suspended"),
    );
    let filter = engine
        .render_filter("Document", "d", &roles(&engine, &suspended), &suspended)
        .unwrap()
        .unwrap();
    assert_eq!(filter.sql, "NOT (d.owner_id = :p0)");
    assert_eq!(filter.params, vec![("p0".to_string(), json!(42))]);
}

#[test]
fn test_deny_matches_by_rendered_text_across_resources() {
    let engine = engine(
        PolicyDocument::new()
            .with_resource("Acme:Drafts", ResourceDefinition::matching(DRAFTS))
            .with_resource("Acme:DraftsAgain", ResourceDefinition::matching(DRAFTS_AGAIN))
            .with_role("Acme:Author", RoleDefinition::new().with("Acme:Drafts", Effect::Grant))
            .with_role("Acme:Intern", RoleDefinition::new().with("Acme:DraftsAgain", Effect::Deny)),
    );

    let intern = context(Principal::new("u1").with_role("Acme:Author").with_role("Acme:Intern"));
    let filter = engine
        .render_filter("Document", "d", &roles(&engine, &intern), &intern)
        .unwrap()
        .unwrap();
    assert_eq!(filter.sql, "NOT (d.status = :p0)");
}

// ============================================================================
// COMBINATION MODES
// ============================================================================

#[test]
fn test_bucket_mode_discrepancy_is_pinned() {
    let document = PolicyDocument::new()
        .with_resource("Acme:Drafts", ResourceDefinition::matching(DRAFTS))
        .with_resource("Acme:DraftsAgain", ResourceDefinition::matching(DRAFTS_AGAIN))
        .with_role("Acme:Author", RoleDefinition::new().with("Acme:Drafts", Effect::Grant));
    let author = context(Principal::new("u1").with_role("Acme:Author"));

    let text = engine(document.clone());
    assert_eq!(
        text.evaluate("Document", "d", &roles(&text, &author), &author).unwrap(),
        FilterOutcome::Unrestricted
    );

    let buckets = engine_with(
        EngineConfig {
            combination: CombinationMode::ResourceBuckets,
            ..Default::default()
        },
        document,
    );
    let filter = buckets
        .render_filter("Document", "d", &roles(&buckets, &author), &author)
        .unwrap()
        .unwrap();
    assert_eq!(filter.sql, "(NOT (d.status = :p0))");
    assert_eq!(filter.params, vec![("p0".to_string(), json!("draft"))]);
}

#[test]
fn test_bucket_mode_deny_beats_grant_per_resource() {
    let document = PolicyDocument::new()
        .with_resource("Acme:Drafts", ResourceDefinition::matching(DRAFTS))
        .with_role("Acme:Author", RoleDefinition::new().with("Acme:Drafts", Effect::Grant))
        .with_role("Acme:Intern", RoleDefinition::new().with("Acme:Drafts", Effect::Deny));
    let buckets = engine_with(
        EngineConfig {
            combination: CombinationMode::ResourceBuckets,
            ..Default::default()
        },
        document,
    );

    let author = context(Principal::new("u1").with_role("Acme:Author"));
    assert!(buckets
        .render_filter("Document", "d", &roles(&buckets, &author), &author)
        .unwrap()
        .is_none());

    let intern = context(Principal::new("u2").with_role("Acme:Author").with_role("Acme:Intern"));
    assert!(buckets
        .render_filter("Document", "d", &roles(&buckets, &intern), &intern)
        .unwrap()
        .is_some());
}

// ============================================================================
// RUNTIME PREDICATES AND SYSTEM ROLES
// ============================================================================

#[test]
fn test_privilege_predicate_is_evaluated_per_request() {
    use rowguard_authz::PrivilegeDefinition;

    let engine = engine(
        PolicyDocument::new()
            .with_resource("Acme:Drafts", ResourceDefinition::matching(DRAFTS))
            .with_role(
                "Acme:Author",
                RoleDefinition::new().with_privilege(
                    PrivilegeDefinition::new("Acme:Drafts", Effect::Grant).with_condition("P.attributes.level >= 3"),
                ),
            ),
    );

    let senior = context(Principal::new("u1").with_role("Acme:Author").with_attribute("level", 5));
    assert!(engine
        .render_filter("Document", "d", &roles(&engine, &senior), &senior)
        .unwrap()
        .is_none());

    let junior = context(Principal::new("u2").with_role("Acme:Author").with_attribute("level", 1));
    assert!(engine
        .render_filter("Document", "d", &roles(&engine, &junior), &junior)
        .unwrap()
        .is_some());
}

#[test]
fn test_anonymous_role_grants() {
    let engine = engine(
        PolicyDocument::new()
            .with_resource("Acme:Drafts", ResourceDefinition::matching(DRAFTS))
            .with_role(
                "Rowguard:Anonymous",
                RoleDefinition::new().with("Acme:Drafts", Effect::Grant),
            ),
    );

    let anonymous = context(Principal::anonymous());
    assert!(engine
        .render_filter("Document", "d", &roles(&engine, &anonymous), &anonymous)
        .unwrap()
        .is_none());

    let member = context(Principal::new("u1"));
    assert!(engine
        .render_filter("Document", "d", &roles(&engine, &member), &member)
        .unwrap()
        .is_some());
}
