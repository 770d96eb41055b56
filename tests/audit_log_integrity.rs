//! Audit trail integrity through the background logger

use parking_lot::Mutex;
use rolegate::{
    AccessKind, AuditEvent, AuditEventKind, AuditLogger, AuthorizerBuilder, EvaluationContext, MemoryStore,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn collecting_logger(capacity: usize) -> (AuditLogger, Arc<Mutex<Vec<AuditEvent>>>) {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = collected.clone();

    let mut logger = AuditLogger::new(capacity, Duration::from_millis(10)).unwrap();
    logger.start(move |batch: &[AuditEvent]| sink.lock().extend_from_slice(batch));
    (logger, collected)
}

#[test]
fn test_engine_events_reach_the_flush_callback() {
    let (logger, collected) = collecting_logger(1000);
    let logger = Arc::new(logger);

    let store = Arc::new(MemoryStore::new());
    let editor = store.create_role("editor", "web").unwrap();
    let export = store.create_permission("reports-export", "web").unwrap();
    let authz = AuthorizerBuilder::new()
        .store(store)
        .audit(logger.clone())
        .build()
        .unwrap();

    let ctx = EvaluationContext::new(3).with_scope(Some(9)).acting_as(1);
    authz.attach_role(&ctx, editor.id, None).unwrap();
    authz.attach_permission(&ctx, export.id, true).unwrap();
    authz.detach_role(&ctx, editor.id).unwrap();
    let request = authz
        .request_access(&ctx, AccessKind::Role, "editor", Some("needs publishing"))
        .unwrap();
    authz.reject_access_request(&EvaluationContext::new(1), request).unwrap();

    // Dropping the last handle stops the flush thread after a final drain
    drop(authz);
    drop(logger);

    let events = collected.lock();
    let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            AuditEventKind::RoleAttached,
            AuditEventKind::PermissionAttached,
            AuditEventKind::RoleDetached,
            AuditEventKind::AccessRequested,
            AuditEventKind::AccessRejected,
        ]
    );

    let attached = &events[0];
    assert_eq!(attached.actor, Some(1));
    assert_eq!(attached.target_user, Some(3));
    assert_eq!(attached.role, Some(editor.id));
    assert_eq!(attached.team, Some(9));

    assert_eq!(events[1].metadata["is_denied"], true);
}

#[test]
fn test_overflow_drops_oldest_and_counts() {
    let logger = AuditLogger::new(10, Duration::from_secs(60)).unwrap();

    for user in 0..25 {
        logger.log(AuditEvent::new(AuditEventKind::UserRemoved, chrono::Utc::now()).for_user(user));
    }

    let (queued, dropped) = logger.stats();
    assert_eq!(queued, 10);
    assert_eq!(dropped, 15);
}

#[test]
fn test_concurrent_logging() {
    let (mut logger, collected) = collecting_logger(10_000);
    let logger_ref = &logger;

    thread::scope(|s| {
        for t in 0..4u64 {
            s.spawn(move || {
                for i in 0..100 {
                    logger_ref.log(
                        AuditEvent::new(AuditEventKind::RoleAttached, chrono::Utc::now())
                            .for_user(t * 1000 + i)
                            .with_role(1),
                    );
                }
            });
        }
    });

    logger.stop();
    assert_eq!(collected.lock().len(), 400);
    assert_eq!(logger.stats(), (0, 0));
}

#[test]
fn test_events_serialize_to_json() {
    let event = AuditEvent::new(AuditEventKind::AccessApproved, chrono::Utc::now())
        .by(Some(1))
        .for_user(7)
        .with_metadata(serde_json::json!({ "request": 4, "item": "auditor" }));

    let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
    assert_eq!(json["kind"], "access_approved");
    assert_eq!(json["target_user"], 7);
    assert_eq!(json["metadata"]["item"], "auditor");
}

struct RejectingSink;

impl rolegate::AuditSink for RejectingSink {
    fn record(&self, _event: &AuditEvent) -> rolegate::Result<()> {
        Err(rolegate::AuthzError::AuditUnavailable("disk full".to_string()))
    }
}

#[test]
fn test_failing_sink_does_not_block_mutations() {
    let store = Arc::new(MemoryStore::new());
    let editor = store.create_role("editor", "web").unwrap();
    let authz = AuthorizerBuilder::new()
        .store(store)
        .audit(Arc::new(RejectingSink))
        .build()
        .unwrap();

    let ctx = EvaluationContext::new(1);
    authz.attach_role(&ctx, editor.id, None).unwrap();
    assert!(authz.has_role(&ctx, &["editor"], false, None));
}
