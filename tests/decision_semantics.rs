//! Decision tests: wildcards, denials, aggregation, hierarchy, prerequisites,
//! expiry, scopes, context rules and access rules

use chrono::{Duration, TimeZone, Utc};
use rolegate::{
    AccessRules, AuthorizerBuilder, Authorizer, ContextRules, Day, EntityStore, EvaluationContext, MemoryStore,
    Permission, Role, TimeWindow,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

fn setup() -> (Authorizer, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let authz = AuthorizerBuilder::new().store(store.clone()).build().unwrap();
    (authz, store)
}

/// Insert a role and link it to the named permissions, creating them as needed
fn role_with(store: &MemoryStore, role: Role, permissions: &[&str]) -> Role {
    let role = store.insert_role(role).unwrap();
    for name in permissions {
        let permission = match store.find_permission_by_name(name, Some("web")).unwrap() {
            Some(existing) => existing,
            None => store.create_permission(name, "web").unwrap(),
        };
        store.attach_role_permission(role.id, permission.id).unwrap();
    }
    role
}

#[test]
fn test_wildcard_permission_held_by_role() {
    let (authz, store) = setup();
    let manager = role_with(&store, Role::new(0, "project-manager", "web"), &["project.*"]);
    let ctx = EvaluationContext::new(1);
    authz.attach_role(&ctx, manager.id, None).unwrap();

    assert!(authz.can(&ctx, &["project.1"], false, None, None));
    assert!(authz.can(&ctx, &["project.1.task.5"], false, None, None));
    assert!(!authz.can(&ctx, &["projectx"], false, None, None));
}

#[test]
fn test_wildcard_role_lookup() {
    let (authz, store) = setup();
    let role = store.create_role("team-lead", "web").unwrap();
    let ctx = EvaluationContext::new(1);
    authz.attach_role(&ctx, role.id, None).unwrap();

    assert!(authz.has_role(&ctx, &["team-lead"], false, None));
    assert!(authz.has_role(&ctx, &["team-*"], false, None));
    assert!(!authz.has_role(&ctx, &["team-lead"], false, Some("api")));
    assert!(!authz.has_role(&ctx, &["admin"], false, None));
}

#[test]
fn test_denial_overrides_role_grant() {
    let (authz, store) = setup();
    let editor = role_with(&store, Role::new(0, "editor", "web"), &["posts-delete"]);
    let ctx = EvaluationContext::new(1);
    authz.attach_role(&ctx, editor.id, None).unwrap();
    assert!(authz.can(&ctx, &["posts-delete"], false, None, None));

    let permission = authz.permission_named("posts-delete").unwrap();
    authz.attach_permission(&ctx, permission.id, true).unwrap();

    assert!(!authz.can(&ctx, &["posts-delete"], false, None, None));
    assert!(!authz.can(&ctx, &["posts-delete"], false, Some("web"), None));
    assert!(!authz.can_inherited(&ctx, "posts-delete", None));
}

#[test]
fn test_wildcard_denial_covers_concrete_lookup() {
    let (authz, store) = setup();
    let editor = role_with(&store, Role::new(0, "editor", "web"), &["billing.view", "billing.export"]);
    let blanket = store.create_permission("billing.*", "web").unwrap();
    let ctx = EvaluationContext::new(1);
    authz.attach_role(&ctx, editor.id, None).unwrap();
    authz.attach_permission(&ctx, blanket.id, true).unwrap();

    assert!(!authz.can(&ctx, &["billing.view"], false, None, None));
    assert!(!authz.can(&ctx, &["billing.export"], false, None, None));
}

#[test]
fn test_require_all_semantics() {
    let (authz, store) = setup();
    let a = store.create_role("a", "web").unwrap();
    store.create_role("b", "web").unwrap();
    let ctx = EvaluationContext::new(1);
    authz.attach_role(&ctx, a.id, None).unwrap();

    assert!(authz.has_role(&ctx, &["a", "b"], false, None));
    assert!(!authz.has_role(&ctx, &["a", "b"], true, None));
    assert!(authz.has_role(&ctx, &["a"], true, None));
    assert!(!authz.has_role(&ctx, &["b"], false, None));

    // Vacuous truth for an empty AND list
    let none: [&str; 0] = [];
    assert!(authz.has_role(&ctx, &none, true, None));
    assert!(!authz.has_role(&ctx, &none, false, None));
    assert!(authz.can(&ctx, &none, true, None, None));
}

#[test]
fn test_hierarchy_inheritance() {
    let (authz, store) = setup();
    let grandparent = role_with(&store, Role::new(0, "staff", "web"), &["x"]);
    let parent = role_with(&store, Role::new(0, "senior", "web").with_parent(grandparent.id), &[]);
    let child = role_with(&store, Role::new(0, "junior", "web").with_parent(parent.id), &["y"]);

    assert!(authz.role_has_permission(&child, &["x"], false, None));
    assert!(authz.role_has_permission(&child, &["x", "y"], true, None));
    assert!(!authz.role_has_permission(&grandparent, &["y"], false, None));

    let ctx = EvaluationContext::new(1);
    authz.attach_role(&ctx, child.id, None).unwrap();
    assert!(authz.can(&ctx, &["x"], false, None, None));
}

#[test]
fn test_hierarchy_cycle_fails_closed() {
    let (authz, store) = setup();
    let a = store.create_role("loop-a", "web").unwrap();
    let b = store
        .insert_role(Role::new(0, "loop-b", "web").with_parent(a.id))
        .unwrap();
    store.update_role(a.clone().with_parent(b.id)).unwrap();

    let ctx = EvaluationContext::new(1);
    authz.attach_role(&ctx, a.id, None).unwrap();
    assert!(!authz.can(&ctx, &["anything"], false, None, None));
    assert!(!authz.role_has_permission(&b, &["anything"], false, None));
}

#[test]
fn test_dependency_chain() {
    let (authz, store) = setup();
    store.create_permission("build", "web").unwrap();
    let deploy = store
        .insert_permission(Permission::new(0, "deploy", "web").with_depends_on(["build"]))
        .unwrap();
    let ctx = EvaluationContext::new(1);
    authz.attach_permission(&ctx, deploy.id, false).unwrap();

    // Directly granted, but the prerequisite is missing
    assert!(!authz.can(&ctx, &["deploy"], false, None, None));

    let build = authz.permission_named("build").unwrap();
    authz.attach_permission(&ctx, build.id, false).unwrap();
    assert!(authz.can(&ctx, &["deploy"], false, None, None));

    // Denying the prerequisite denies the dependent
    authz.attach_permission(&ctx, build.id, true).unwrap();
    assert!(!authz.can(&ctx, &["deploy"], false, None, None));
}

#[test]
fn test_dependency_cycle_fails_closed() {
    let (authz, store) = setup();
    let ping = store
        .insert_permission(Permission::new(0, "ping", "web").with_depends_on(["pong"]))
        .unwrap();
    let pong = store
        .insert_permission(Permission::new(0, "pong", "web").with_depends_on(["ping"]))
        .unwrap();
    let ctx = EvaluationContext::new(1);
    authz.attach_permission(&ctx, ping.id, false).unwrap();
    authz.attach_permission(&ctx, pong.id, false).unwrap();

    assert!(!authz.can(&ctx, &["ping"], false, None, None));
    assert!(!authz.can(&ctx, &["pong"], false, None, None));
}

#[test]
fn test_expired_assignment_excluded() {
    let (authz, store) = setup();
    let temp = role_with(&store, Role::new(0, "contractor", "web"), &["timesheets-submit"]);
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    let ctx = EvaluationContext::new(1).at_utc(start);

    authz
        .attach_role(&ctx, temp.id, Some(start + Duration::days(30)))
        .unwrap();
    assert!(authz.has_role(&ctx, &["contractor"], false, None));
    assert!(authz.can(&ctx, &["timesheets-submit"], false, None, None));

    let later = ctx.clone().at_utc(start + Duration::days(31));
    assert!(!authz.has_role(&later, &["contractor"], false, None));
    assert!(!authz.can(&later, &["timesheets-submit"], false, None, None));

    // The raw assignment is still stored
    assert_eq!(store.assignments().len(), 1);
}

#[test]
fn test_team_scopes() {
    let (authz, store) = setup();
    let owner = store.create_role("owner", "web").unwrap();
    let member = store.create_role("member", "web").unwrap();

    authz
        .attach_role(&EvaluationContext::new(1).with_scope(Some(10)), owner.id, None)
        .unwrap();
    authz.attach_role(&EvaluationContext::new(1), member.id, None).unwrap();

    let team_10 = EvaluationContext::new(1).with_scope(Some(10));
    let team_11 = EvaluationContext::new(1).with_scope(Some(11));
    let global = EvaluationContext::new(1);

    assert!(authz.has_role(&team_10, &["owner"], false, None));
    assert!(!authz.has_role(&team_11, &["owner"], false, None));
    assert!(authz.has_role(&team_11, &["member"], false, None));
    assert!(authz.has_role(&global, &["owner", "member"], true, None));
}

#[test]
fn test_can_inherited_dotted_fallback() {
    let (authz, store) = setup();
    let project = store.create_permission("project.1", "web").unwrap();
    let ctx = EvaluationContext::new(1);

    assert!(!authz.can_inherited(&ctx, "project.1.task.5", None));

    authz.attach_permission(&ctx, project.id, false).unwrap();
    assert!(authz.can_inherited(&ctx, "project.1.task.5", None));
    assert!(authz.can_inherited(&ctx, "project.1", None));
    assert!(!authz.can_inherited(&ctx, "project.2.task.5", None));
    assert!(!authz.can_inherited(&ctx, "reports", None));
}

#[test]
fn test_context_rules() {
    let (authz, store) = setup();
    let edit = store
        .insert_permission(
            Permission::new(0, "posts-edit-own", "web").with_context_rules(ContextRules::new().require("id", "author_id")),
        )
        .unwrap();

    let mut principal = HashMap::new();
    principal.insert("id".to_string(), json!(7));
    let ctx = EvaluationContext::new(7).with_attributes(Arc::new(principal));
    authz.attach_permission(&ctx, edit.id, false).unwrap();

    let own_post = json!({"author_id": 7});
    let other_post = json!({"author_id": 8});
    let string_id = json!({"author_id": "7"});

    assert!(authz.can(&ctx, &["posts-edit-own"], false, None, Some(&own_post)));
    assert!(!authz.can(&ctx, &["posts-edit-own"], false, None, Some(&other_post)));
    assert!(!authz.can(&ctx, &["posts-edit-own"], false, None, Some(&string_id)));

    // No context supplied: rules are not evaluated
    assert!(authz.can(&ctx, &["posts-edit-own"], false, None, None));
}

#[test]
fn test_context_rules_null_equals_null() {
    let (authz, store) = setup();
    let edit = store
        .insert_permission(
            Permission::new(0, "docs-edit", "web").with_context_rules(ContextRules::new().require("department", "department")),
        )
        .unwrap();
    let ctx = EvaluationContext::new(1);
    authz.attach_permission(&ctx, edit.id, false).unwrap();

    // Neither side has the attribute: both resolve to null and match
    let doc = json!({"title": "handbook"});
    assert!(authz.can(&ctx, &["docs-edit"], false, None, Some(&doc)));
}

#[test]
fn test_access_rules_gate_role() {
    let (authz, store) = setup();
    let rules = AccessRules::new()
        .allow_ip("10.0.*")
        .allow_window(Day::Monday, TimeWindow::parse("09:00", "17:00").unwrap());
    let office = role_with(
        &store,
        Role::new(0, "office-staff", "web").with_access_rules(rules),
        &["payroll-view"],
    );

    // 2024-01-01 is a Monday
    let monday_noon = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let ctx = EvaluationContext::new(1).at_utc(monday_noon).with_ip("10.0.3.4");
    authz.attach_role(&ctx, office.id, None).unwrap();

    assert!(authz.can(&ctx, &["payroll-view"], false, None, None));

    let outside = ctx.clone().with_ip("192.168.1.5");
    assert!(!authz.can(&outside, &["payroll-view"], false, None, None));

    let evening = ctx.clone().at_utc(Utc.with_ymd_and_hms(2024, 1, 1, 17, 1, 0).unwrap());
    assert!(!authz.can(&evening, &["payroll-view"], false, None, None));

    let tuesday = ctx.clone().at_utc(Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap());
    assert!(!authz.can(&tuesday, &["payroll-view"], false, None, None));

    // Access rules gate permissions, not role membership
    assert!(authz.has_role(&outside, &["office-staff"], false, None));
}

#[test]
fn test_unknown_names_fail_closed() {
    let (authz, _) = setup();
    let ctx = EvaluationContext::new(404);

    assert!(!authz.has_role(&ctx, &["ghost"], false, None));
    assert!(!authz.can(&ctx, &["ghost"], false, None, None));
    assert!(!authz.can_inherited(&ctx, "ghost.child", None));
}
