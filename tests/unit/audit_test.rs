//! Tests for audit sink

use std::sync::Arc;

use prometheus_gates::config::SchedulerConfig;
use prometheus_gates::core::{build_audit_event, AuditSink, InMemoryAuditSink};
use prometheus_gates::Scheduler;

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    let event = build_audit_event("evt1", 1, "scheduler", "submit", Some("detail".to_string()));

    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].event_id, "evt1");
    assert_eq!(events[0].task_id, 1);
    assert_eq!(events[0].action, "submit");
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event("evt1", 1, "scheduler", "submit", None));
    sink.record(build_audit_event("evt2", 2, "scheduler", "submit", None));
    sink.record(build_audit_event("evt3", 3, "scheduler", "submit", None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_id, "evt2"); // First one popped
    assert_eq!(events[1].event_id, "evt3");
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event("evt1", 9, "workers", "fail", Some("boom".to_string()));

    assert_eq!(event.event_id, "evt1");
    assert_eq!(event.task_id, 9);
    assert_eq!(event.gate, "workers");
    assert_eq!(event.action, "fail");
    assert_eq!(event.detail, Some("boom".to_string()));
    assert!(event.created_at_ms > 0);
}

#[tokio::test]
async fn test_scheduler_records_lifecycle() {
    let sink = Arc::new(parking_lot::Mutex::new(InMemoryAuditSink::new(64)));
    let scheduler = Scheduler::with_tokio(SchedulerConfig::new().with_max_concurrency(1))
        .unwrap()
        .with_audit(Box::new(Arc::clone(&sink)));

    let ok = scheduler.submit(|| async { Ok::<_, anyhow::Error>(1) }).unwrap();
    let ok_id = ok.id();
    let bad = scheduler
        .submit(|| async { Err::<u32, _>(anyhow::anyhow!("broken")) })
        .unwrap();
    let bad_id = bad.id();

    assert_eq!(ok.await.unwrap(), 1);
    assert!(bad.await.is_err());
    scheduler.drain().await;

    let sink = sink.lock();
    assert_eq!(sink.actions_for(ok_id), vec!["submit", "admit", "complete"]);
    assert_eq!(sink.actions_for(bad_id), vec!["submit", "admit", "fail"]);
    let fail = sink
        .events()
        .into_iter()
        .find(|e| e.task_id == bad_id && e.action == "fail")
        .unwrap();
    assert!(fail.detail.unwrap().contains("broken"));
}
