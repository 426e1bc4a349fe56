//! End-to-end pipeline runs over a scripted source

use crate::common::{script_demo, Harness};
use quota_harvest::config::CrawlerConfig;
use quota_harvest::credentials::{Credential, CredentialStatus};
use quota_harvest::crawler::Orchestrator;
use quota_harvest::entity::{ChildEntity, EntityKind, LeafEntity, LeafThread, ParentEntity};
use quota_harvest::source::{
    Page, ScriptedSource, SearchHit, SourceClient, SourceError, SourceOp, SourceResult,
};
use quota_harvest::state::{EntityStatus, TargetStatus};
use quota_harvest::storage::Storage;
use quota_harvest::HarvestError;
use std::sync::atomic::{AtomicUsize, Ordering};

fn parent_status(h: &Harness, id: &str) -> EntityStatus {
    h.storage.get_parent(id).unwrap().expect("parent stored").status
}

fn child_status(h: &Harness, id: &str) -> EntityStatus {
    h.storage.get_child(id).unwrap().expect("child stored").status
}

#[test]
fn test_demo_keyword_end_to_end() {
    let h = Harness::new(&[10_000]);
    script_demo(&h.source);

    let report = h.orchestrator().run_for_keyword("demo").unwrap();

    assert_eq!(report.discovered, 2);
    assert_eq!(report.parents, 2);
    assert_eq!(report.expanded, 2);
    assert_eq!(report.children, 3);
    assert_eq!(report.leaves, 7);
    // 2 parents + 3 children + 7 leaves stored for the first time
    assert_eq!(report.inserted, 12);
    assert!(report.entity_errors.is_empty());

    // search 100, parent details 1, expand A 2 pages + B 1, child details 1,
    // leaf pages 3 + 1 + 1
    assert_eq!(report.quota.total(), 110);
    assert_eq!(h.pool.remaining("k1"), Some(9_890));

    // Zero children still completes an expansion
    assert_eq!(parent_status(&h, "A"), EntityStatus::CrawledChildren);
    assert_eq!(parent_status(&h, "B"), EntityStatus::CrawledChildren);
    for id in ["v1", "v2", "v3"] {
        assert_eq!(child_status(&h, id), EntityStatus::CrawledLeaf);
    }
    assert_eq!(h.storage.count_leaves_for_child("v1").unwrap(), 5);
    assert_eq!(h.storage.count_leaves_for_child("v2").unwrap(), 0);
    assert_eq!(h.storage.count_leaves_for_child("v3").unwrap(), 2);

    // Enrichment merged the detail fields into the bare search records
    let a = h.storage.get_parent("A").unwrap().unwrap();
    assert_eq!(a.title.as_deref(), Some("Channel A"));
    assert_eq!(a.collection_id.as_deref(), Some("UUA"));

    let target = h.storage.get_target("demo").unwrap().unwrap();
    assert_eq!(target.status, TargetStatus::Crawled);

    // Spend is persisted and audited
    assert_eq!(
        h.storage.usage_totals().unwrap(),
        vec![("k1".to_string(), 110)]
    );
    let stored = h.storage.load_credentials().unwrap();
    assert_eq!(stored[0].remaining_budget, 9_890);
}

#[test]
fn test_crawled_keyword_is_not_redispatched() {
    let h = Harness::new(&[10_000]);
    script_demo(&h.source);
    let orchestrator = h.orchestrator();

    orchestrator.run_for_keyword("demo").unwrap();
    let calls_after_first = h.source.calls().len();
    let second = orchestrator.run_for_keyword("demo").unwrap();

    assert_eq!(second.parents, 0);
    assert_eq!(second.quota.total(), 0);
    assert_eq!(h.source.calls().len(), calls_after_first);
    assert_eq!(h.source.call_count(SourceOp::Search), 1);
}

#[test]
fn test_budget_exceeded_rotates_and_repeats_same_request() {
    let settings = CrawlerConfig {
        detail_batch_size: 1,
        ..CrawlerConfig::default()
    };
    let h = Harness::with_settings(&[100, 100], settings);
    for id in ["P1", "P2", "P3"] {
        h.source.add_parent(ParentEntity::discovered(id));
    }
    h.source.fail_call(
        SourceOp::ParentDetails,
        2,
        SourceError::BudgetExceeded {
            reason: "403 Forbidden (quotaExceeded)".to_string(),
        },
    );

    let ids: Vec<String> = ["P1", "P2", "P3"].iter().map(|s| s.to_string()).collect();
    let report = h.orchestrator().run_for_parent_ids(&ids).unwrap();

    let details: Vec<_> = h
        .source
        .calls()
        .into_iter()
        .filter(|c| c.op == SourceOp::ParentDetails)
        .collect();
    let subjects: Vec<&str> = details.iter().map(|c| c.subject.as_str()).collect();
    assert_eq!(subjects, vec!["P1", "P2", "P2", "P3"]);

    // Call 2 was repeated with the other credential, call 3 stayed on it
    let exhausted = details[1].credential_id.clone();
    assert_ne!(details[2].credential_id, exhausted);
    assert_eq!(details[3].credential_id, details[2].credential_id);

    // Only the untouched credential is handed out from here on
    let remaining = details[2].credential_id.clone();
    for _ in 0..3 {
        assert_eq!(h.pool.acquire().map(|c| c.id), Some(remaining.clone()));
    }

    assert_eq!(report.parents, 3);
    assert_eq!(report.inserted, 3);
    for id in ["P1", "P2", "P3"] {
        assert_eq!(parent_status(&h, id), EntityStatus::CrawledChildren);
    }

    let stored = h.storage.load_credentials().unwrap();
    let flagged = stored.iter().find(|c| c.id == exhausted).unwrap();
    assert_eq!(flagged.status, CredentialStatus::Exhausted);
}

#[test]
fn test_exhaustion_aborts_unit_and_backlogs_resume_it() {
    // Enough for search (100), parent details (1) and A's two expand pages
    let h = Harness::new(&[103]);
    script_demo(&h.source);
    let orchestrator = h.orchestrator();

    let err = orchestrator.run_for_keyword("demo").unwrap_err();
    assert!(matches!(err, HarvestError::CredentialsExhausted { .. }));

    // Everything written before the abort is kept
    let target = h.storage.get_target("demo").unwrap().unwrap();
    assert_eq!(target.status, TargetStatus::Error);
    assert!(target.error_message.is_some());
    assert_eq!(parent_status(&h, "A"), EntityStatus::CrawledChildren);
    assert_eq!(parent_status(&h, "B"), EntityStatus::CrawledParent);
    for id in ["v1", "v2", "v3"] {
        assert_eq!(child_status(&h, id), EntityStatus::ToCrawl);
    }
    assert_eq!(h.pool.total_remaining(), 0);
    assert_eq!(h.storage.usage_totals().unwrap(), vec![("k1".to_string(), 103)]);

    h.reset_quota(10_000);

    let expanded = orchestrator.drain_expand_backlog().unwrap();
    assert_eq!(expanded.succeeded, 1);
    assert_eq!(expanded.total.expanded, 1);
    assert_eq!(parent_status(&h, "B"), EntityStatus::CrawledChildren);

    let detailed = orchestrator.drain_detail_backlog().unwrap();
    assert!(detailed.errors.is_empty());
    assert_eq!(detailed.total.children, 3);
    assert_eq!(detailed.total.leaves, 7);

    let leaves = orchestrator.drain_leaf_backlog().unwrap();
    assert_eq!(leaves.succeeded, 0);

    for id in ["v1", "v2", "v3"] {
        assert_eq!(child_status(&h, id), EntityStatus::CrawledLeaf);
    }
    assert_eq!(h.storage.count_entities(EntityKind::Leaf).unwrap(), 7);

    // The errored keyword is only retried after a reset, and finds nothing left to do
    assert_eq!(orchestrator.run_for_keyword("demo").unwrap().discovered, 0);
    assert_eq!(h.storage.reset_targets(&[TargetStatus::Error]).unwrap(), 1);
    let rerun = orchestrator.run_for_keyword("demo").unwrap();
    assert_eq!(rerun.discovered, 2);
    assert_eq!(rerun.parents, 0);
    assert_eq!(rerun.leaves, 0);
    assert_eq!(
        h.storage.get_target("demo").unwrap().unwrap().status,
        TargetStatus::Crawled
    );
}

#[test]
fn test_leaf_backlog_picks_up_detailed_children() {
    let h = Harness::new(&[10_000]);
    script_demo(&h.source);
    let orchestrator = h.orchestrator();

    // Store children already detailed, as an interrupted run would leave them
    let children: Vec<ChildEntity> = ["v1", "v2", "v3"]
        .iter()
        .map(|id| ChildEntity::discovered(*id, "A"))
        .collect();
    h.storage.upsert_children(&children).unwrap();
    let ids: Vec<String> = ["v1", "v3"].iter().map(|s| s.to_string()).collect();
    h.storage
        .advance_status(
            EntityKind::Child,
            &ids,
            &[EntityStatus::ToCrawl],
            EntityStatus::CrawledDetail,
        )
        .unwrap();

    let outcome = orchestrator.drain_leaf_backlog().unwrap();

    assert_eq!(outcome.succeeded, 2);
    assert_eq!(outcome.total.leaves, 7);
    assert_eq!(child_status(&h, "v1"), EntityStatus::CrawledLeaf);
    assert_eq!(child_status(&h, "v3"), EntityStatus::CrawledLeaf);
    assert_eq!(child_status(&h, "v2"), EntityStatus::ToCrawl);
    assert_eq!(h.source.call_count(SourceOp::ChildDetails), 0);
}

#[test]
fn test_missing_record_does_not_stop_siblings() {
    let h = Harness::new(&[10_000]);
    script_demo(&h.source);

    let ids = vec!["v1".to_string(), "ghost".to_string(), "v3".to_string()];
    let report = h.orchestrator().run_for_child_ids(&ids).unwrap();

    assert_eq!(report.children, 2);
    assert_eq!(report.leaves, 7);
    assert_eq!(report.entity_errors.len(), 1);
    assert_eq!(report.entity_errors[0].external_id, "ghost");
    assert_eq!(report.entity_errors[0].kind, EntityKind::Child);
    assert_eq!(child_status(&h, "v1"), EntityStatus::CrawledLeaf);
    assert_eq!(child_status(&h, "v3"), EntityStatus::CrawledLeaf);
}

#[test]
fn test_stage_failure_marks_entity_error_and_reset_recovers_it() {
    let h = Harness::new(&[10_000]);
    script_demo(&h.source);
    // The retry policy makes three attempts; all of v1's fail
    for nth in 1..=3 {
        h.source.fail_call(
            SourceOp::LeafPage,
            nth,
            SourceError::Transient("503 Service Unavailable".to_string()),
        );
    }
    let orchestrator = h.orchestrator();

    let ids = vec!["v1".to_string(), "v3".to_string()];
    let report = orchestrator.run_for_child_ids(&ids).unwrap();

    assert_eq!(report.entity_errors.len(), 1);
    assert_eq!(report.entity_errors[0].external_id, "v1");
    assert_eq!(child_status(&h, "v1"), EntityStatus::Error);
    assert_eq!(child_status(&h, "v3"), EntityStatus::CrawledLeaf);
    // Every attempt was charged: details 1, v1 3 failed attempts, v3 1 page
    assert_eq!(report.quota.total(), 5);

    assert_eq!(h.storage.reset_errors(EntityKind::Child).unwrap(), 1);
    let retry = orchestrator.run_for_child_id("v1").unwrap();
    assert_eq!(retry.leaves, 5);
    assert_eq!(child_status(&h, "v1"), EntityStatus::CrawledLeaf);
}

#[test]
fn test_parent_key_resolves_then_crawls() {
    let h = Harness::new(&[10_000]);
    script_demo(&h.source);
    h.source.add_alternate_key("@channel-a", "A");
    let orchestrator = h.orchestrator();

    let report = orchestrator.run_for_parent_key("@channel-a").unwrap();
    assert_eq!(report.parents, 1);
    assert_eq!(report.children, 3);
    assert_eq!(report.leaves, 7);
    assert_eq!(h.source.call_count(SourceOp::ResolveParent), 1);

    let err = orchestrator.run_for_parent_key("@nobody").unwrap_err();
    assert!(matches!(err, HarvestError::NotFound(_)));
}

#[test]
fn test_child_locators() {
    let h = Harness::new(&[10_000]);
    script_demo(&h.source);
    let orchestrator = h.orchestrator();

    let single = orchestrator
        .run_for_child_locator("https://youtu.be/v3")
        .unwrap();
    assert_eq!(single.children, 1);
    assert_eq!(single.leaves, 2);

    // A collection is expanded and every child in it crawled
    let collection = orchestrator
        .run_for_child_locator("https://www.youtube.com/playlist?list=UUA")
        .unwrap();
    assert_eq!(collection.children, 2);
    assert_eq!(collection.leaves, 5);
    assert_eq!(child_status(&h, "v2"), EntityStatus::CrawledLeaf);
    assert!(h.storage.get_parent("A").unwrap().is_none());

    let calls_before = h.source.calls().len();
    let err = orchestrator
        .run_for_child_locator("https://example.com/watch?v=v1")
        .unwrap_err();
    assert!(matches!(err, HarvestError::Malformed(_)));
    assert_eq!(h.source.calls().len(), calls_before);
}

#[test]
fn test_keywords_across_worker_pool() {
    let h = Harness::new(&[10_000, 10_000]);
    script_demo(&h.source);
    h.source.add_parent(ParentEntity::discovered("C"));
    h.source.add_child(ChildEntity::discovered("w1", "C"));
    h.source.add_leaves("w1", 3);
    h.source.set_search(
        "other",
        vec![SearchHit::Child(ChildEntity::discovered("w1", "C"))],
    );

    let keywords = vec!["demo".to_string(), "other".to_string()];
    let outcome = h.orchestrator().run_for_keywords(&keywords);

    assert_eq!(outcome.succeeded, 2);
    assert!(outcome.errors.is_empty());
    assert_eq!(outcome.total.parents, 3);
    assert_eq!(outcome.total.children, 4);
    assert_eq!(outcome.total.leaves, 10);
    assert_eq!(child_status(&h, "w1"), EntityStatus::CrawledLeaf);
    assert_eq!(parent_status(&h, "C"), EntityStatus::CrawledChildren);
}

#[test]
fn test_parent_without_collection_completes_expansion() {
    let h = Harness::new(&[10_000]);
    h.storage
        .upsert_parents(&[ParentEntity::discovered("NC")])
        .unwrap();
    h.storage
        .advance_status(
            EntityKind::Parent,
            &["NC".to_string()],
            &[EntityStatus::ToCrawl],
            EntityStatus::CrawledParent,
        )
        .unwrap();

    let outcome = h.orchestrator().drain_expand_backlog().unwrap();

    assert_eq!(outcome.succeeded, 1);
    assert_eq!(outcome.total.expanded, 1);
    assert!(outcome.total.entity_errors.is_empty());
    assert_eq!(parent_status(&h, "NC"), EntityStatus::CrawledChildren);
    assert_eq!(h.source.call_count(SourceOp::ExpandPage), 0);
    assert_eq!(h.storage.reset_errors(EntityKind::Parent).unwrap(), 0);
}

/// Scripted source whose collections repeat children across pages
///
/// `PLX` lists v1 v2, then v2 again, then v3. `PLLOOP` hands back the same
/// cursor forever.
struct OverlappingCollections {
    inner: ScriptedSource,
    expand_calls: AtomicUsize,
}

impl SourceClient for OverlappingCollections {
    fn search(
        &self,
        credential: &Credential,
        keyword: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> SourceResult<Page<SearchHit>> {
        self.inner.search(credential, keyword, cursor, page_size)
    }

    fn parent_details(
        &self,
        credential: &Credential,
        external_ids: &[String],
    ) -> SourceResult<Page<ParentEntity>> {
        self.inner.parent_details(credential, external_ids)
    }

    fn child_details(
        &self,
        credential: &Credential,
        external_ids: &[String],
    ) -> SourceResult<Page<ChildEntity>> {
        self.inner.child_details(credential, external_ids)
    }

    fn expand_page(
        &self,
        _credential: &Credential,
        collection_id: &str,
        cursor: Option<&str>,
    ) -> SourceResult<Page<ChildEntity>> {
        self.expand_calls.fetch_add(1, Ordering::SeqCst);
        let (ids, next) = match (collection_id, cursor) {
            ("PLX", None) => (vec!["v1", "v2"], Some("p2")),
            ("PLX", Some("p2")) => (vec!["v2"], Some("p3")),
            ("PLX", Some("p3")) => (vec!["v3"], None),
            ("PLLOOP", _) => (vec!["v1"], Some("again")),
            _ => return Err(SourceError::NotFound(collection_id.to_string())),
        };
        Ok(Page {
            items: ids
                .into_iter()
                .map(|id| ChildEntity::discovered(id, "A"))
                .collect(),
            cost: 1,
            next_cursor: next.map(str::to_string),
        })
    }

    fn leaf_page(
        &self,
        credential: &Credential,
        child_external_id: &str,
        cursor: Option<&str>,
    ) -> SourceResult<Page<LeafThread>> {
        self.inner.leaf_page(credential, child_external_id, cursor)
    }

    fn sub_leaf_page(
        &self,
        credential: &Credential,
        parent_leaf_id: &str,
        cursor: Option<&str>,
    ) -> SourceResult<Page<LeafEntity>> {
        self.inner.sub_leaf_page(credential, parent_leaf_id, cursor)
    }

    fn resolve_parent(
        &self,
        credential: &Credential,
        alternate_key: &str,
    ) -> SourceResult<Page<String>> {
        self.inner.resolve_parent(credential, alternate_key)
    }
}

#[test]
fn test_collection_paging_follows_cursor_past_repeated_children() {
    let h = Harness::new(&[10_000]);
    let source = OverlappingCollections {
        inner: ScriptedSource::new(),
        expand_calls: AtomicUsize::new(0),
    };
    script_demo(&source.inner);
    let orchestrator = Orchestrator::new(&h.storage, &h.pool, &source, &h.retry, &h.settings);

    let report = orchestrator
        .run_for_child_locator("https://www.youtube.com/playlist?list=PLX")
        .unwrap();

    // The middle page only repeats v2, and v3 still follows it
    assert_eq!(source.expand_calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.children, 3);
    assert_eq!(report.leaves, 7);
    assert_eq!(child_status(&h, "v3"), EntityStatus::CrawledLeaf);
}

#[test]
fn test_collection_paging_stops_on_repeated_cursor() {
    let h = Harness::new(&[10_000]);
    let source = OverlappingCollections {
        inner: ScriptedSource::new(),
        expand_calls: AtomicUsize::new(0),
    };
    script_demo(&source.inner);
    let orchestrator = Orchestrator::new(&h.storage, &h.pool, &source, &h.retry, &h.settings);

    let report = orchestrator
        .run_for_child_locator("https://www.youtube.com/playlist?list=PLLOOP")
        .unwrap();

    assert_eq!(source.expand_calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.children, 1);
    assert_eq!(report.leaves, 5);
}
