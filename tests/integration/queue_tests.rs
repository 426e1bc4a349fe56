//! Queue consumption through the orchestrator

use crate::common::{script_demo, Harness};
use quota_harvest::queue::{LineQueue, QueueDispatcher};
use quota_harvest::source::{SourceError, SourceOp};
use quota_harvest::state::EntityStatus;
use quota_harvest::storage::Storage;
use std::io::Cursor;

#[test]
fn test_consume_routes_and_settles_messages() {
    let h = Harness::new(&[10_000]);
    script_demo(&h.source);
    let input = [
        r#"{"action":"PARENT_INFO","body":{"externalId":"A"}}"#,
        "not json",
        r#"{"action":"CHILD_INFO","body":{"alternateKey":"https://youtu.be/v3"}}"#,
        r#"{"action":"PARENT_INFO","body":{"alternateKey":"@nobody"}}"#,
        r#"{"action":"CHILD_INFO","body":{}}"#,
    ]
    .join("\n");
    let mut queue = LineQueue::new(Cursor::new(input.as_str()), 3);
    let orchestrator = h.orchestrator();
    let dispatcher = QueueDispatcher::new(&orchestrator);

    let summary = dispatcher.consume(&mut queue).unwrap();

    // The unknown key cannot succeed later, so it is dropped like bad input
    assert_eq!(summary.acked, 2);
    assert_eq!(summary.rejected, 3);
    assert_eq!(summary.requeued, 0);
    assert!(!summary.stopped_exhausted);
    assert_eq!(summary.report.parents, 1);
    assert_eq!(summary.report.children, 3);
    assert_eq!(summary.report.leaves, 7);
    assert_eq!(
        h.storage.get_child("v3").unwrap().unwrap().status,
        EntityStatus::CrawledLeaf
    );
}

#[test]
fn test_exhausted_message_is_requeued_and_completes_after_reset() {
    // Parent details and one expand page, then nothing
    let h = Harness::new(&[2]);
    script_demo(&h.source);
    let input = [
        r#"{"action":"PARENT_INFO","body":{"externalId":"A"}}"#,
        r#"{"action":"PARENT_INFO","body":{"externalId":"B"}}"#,
    ]
    .join("\n");
    let mut queue = LineQueue::new(Cursor::new(input.as_str()), 3);
    let orchestrator = h.orchestrator();
    let dispatcher = QueueDispatcher::new(&orchestrator);

    let first = dispatcher.consume(&mut queue).unwrap();
    assert!(first.stopped_exhausted);
    assert_eq!(first.requeued, 1);
    assert_eq!(first.acked, 0);
    assert_eq!(
        h.storage.get_parent("A").unwrap().unwrap().status,
        EntityStatus::CrawledParent
    );

    h.reset_quota(10_000);

    // B is still unread; A comes back after it
    let second = dispatcher.consume(&mut queue).unwrap();
    assert_eq!(second.acked, 2);
    assert!(!second.stopped_exhausted);
    assert_eq!(second.report.expanded, 2);
    assert_eq!(second.report.leaves, 7);
    for id in ["A", "B"] {
        assert_eq!(
            h.storage.get_parent(id).unwrap().unwrap().status,
            EntityStatus::CrawledChildren
        );
    }
}

#[test]
fn test_transient_child_failure_is_requeued_and_retried() {
    let h = Harness::new(&[10_000]);
    script_demo(&h.source);
    // Every attempt at v1's first leaf page fails on the first delivery
    for nth in 1..=3 {
        h.source.fail_call(
            SourceOp::LeafPage,
            nth,
            SourceError::Transient("503 Service Unavailable".to_string()),
        );
    }
    let input = r#"{"action":"CHILD_INFO","body":{"externalId":"v1"}}"#;
    let mut queue = LineQueue::new(Cursor::new(input), 3);
    let orchestrator = h.orchestrator();
    let dispatcher = QueueDispatcher::new(&orchestrator);

    let summary = dispatcher.consume(&mut queue).unwrap();

    assert_eq!(summary.requeued, 1);
    assert_eq!(summary.acked, 1);
    assert_eq!(summary.rejected, 0);
    // The failure from the first delivery is kept in the totals
    assert_eq!(summary.report.entity_errors.len(), 1);
    assert!(summary.report.entity_errors[0].retryable);
    assert_eq!(summary.report.leaves, 5);
    assert_eq!(
        h.storage.get_child("v1").unwrap().unwrap().status,
        EntityStatus::CrawledLeaf
    );
    assert_eq!(h.storage.count_leaves_for_child("v1").unwrap(), 5);
}

#[test]
fn test_persistent_child_failure_stops_at_redelivery_limit() {
    let h = Harness::new(&[10_000]);
    script_demo(&h.source);
    h.source.fail_always(
        SourceOp::LeafPage,
        SourceError::Transient("503 Service Unavailable".to_string()),
    );
    let input = r#"{"action":"CHILD_INFO","body":{"externalId":"v1"}}"#;
    let mut queue = LineQueue::new(Cursor::new(input), 1);
    let orchestrator = h.orchestrator();
    let dispatcher = QueueDispatcher::new(&orchestrator);

    let summary = dispatcher.consume(&mut queue).unwrap();

    // Delivered twice, never acked, then dropped by the queue
    assert_eq!(summary.acked, 0);
    assert_eq!(summary.requeued, 2);
    assert_eq!(summary.report.entity_errors.len(), 2);
    assert_eq!(h.source.call_count(SourceOp::LeafPage), 6);
    assert_eq!(
        h.storage.get_child("v1").unwrap().unwrap().status,
        EntityStatus::Error
    );
}
