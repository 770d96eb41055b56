//! Concurrent decisions and mutations against one shared authorizer

use rand::Rng;
use rolegate::{AuthorizerBuilder, Authorizer, EntityStore, EvaluationContext, MemoryStore, PermissionId, RoleId};
use std::sync::Arc;
use std::thread;

const USERS: u64 = 20;

/// Roles "reader" (documents-read) and "writer" (documents-*), every user a reader
fn setup() -> (Arc<Authorizer>, RoleId, PermissionId) {
    let store = Arc::new(MemoryStore::new());
    let reader = store.create_role("reader", "web").unwrap();
    let writer = store.create_role("writer", "web").unwrap();
    let read = store.create_permission("documents-read", "web").unwrap();
    let all = store.create_permission("documents-*", "web").unwrap();
    let delete = store.create_permission("documents-delete", "web").unwrap();
    store.attach_role_permission(reader.id, read.id).unwrap();
    store.attach_role_permission(writer.id, all.id).unwrap();

    let authz = AuthorizerBuilder::new().store(store).build().unwrap();
    for user in 0..USERS {
        authz
            .attach_role(&EvaluationContext::new(user), reader.id, None)
            .unwrap();
    }
    (Arc::new(authz), writer.id, delete.id)
}

#[test]
fn test_concurrent_reads() {
    let (authz, _, _) = setup();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let authz = authz.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..500 {
                    let ctx = EvaluationContext::new(rng.gen_range(0..USERS));
                    assert!(authz.has_role(&ctx, &["reader"], false, None));
                    assert!(authz.can(&ctx, &["documents-read"], false, None, None));
                    assert!(!authz.can(&ctx, &["documents-delete"], false, None, None));
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_reads_during_mutations() {
    let (authz, writer, delete) = setup();

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let authz = authz.clone();
            thread::spawn(move || {
                for round in 0..100 {
                    let ctx = EvaluationContext::new(t);
                    if round % 2 == 0 {
                        authz.attach_role(&ctx, writer, None).unwrap();
                    } else {
                        authz.detach_role(&ctx, writer).unwrap();
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let authz = authz.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..500 {
                    let ctx = EvaluationContext::new(rng.gen_range(0..USERS));
                    // Reader membership never changes
                    assert!(authz.can(&ctx, &["documents-read"], false, None, None));
                }
            })
        })
        .collect();

    for h in writers.into_iter().chain(readers) {
        h.join().unwrap();
    }

    // Every writer thread ended on a detach
    for user in 0..4 {
        let ctx = EvaluationContext::new(user);
        assert!(!authz.has_role(&ctx, &["writer"], false, None));
        assert!(!authz.can(&ctx, &["documents-delete"], false, None, None));
    }

    // Denial overrides the wildcard grant from "writer"
    let ctx = EvaluationContext::new(5);
    authz.attach_role(&ctx, writer, None).unwrap();
    assert!(authz.can(&ctx, &["documents-delete"], false, None, None));
    authz.attach_permission(&ctx, delete, true).unwrap();
    assert!(!authz.can(&ctx, &["documents-delete"], false, None, None));
}
