//! Shared fixtures for the integration tests

use quota_harvest::config::CrawlerConfig;
use quota_harvest::credentials::{Credential, CredentialPool};
use quota_harvest::crawler::Orchestrator;
use quota_harvest::entity::{ChildEntity, ParentEntity};
use quota_harvest::retry::RetryPolicy;
use quota_harvest::source::{ScriptedSource, SearchHit};
use quota_harvest::storage::{SqliteStorage, Storage};
use std::time::Duration;
use tempfile::TempDir;

/// Storage, pool and source wired the way `main` wires them
pub struct Harness {
    // Held so the database outlives the test
    _dir: TempDir,
    pub storage: SqliteStorage,
    pub pool: CredentialPool,
    pub source: ScriptedSource,
    pub retry: RetryPolicy,
    pub settings: CrawlerConfig,
}

impl Harness {
    /// Creates a harness with one stored credential per budget (`k1`, `k2`, ...)
    pub fn new(budgets: &[i64]) -> Self {
        Self::with_settings(budgets, CrawlerConfig::default())
    }

    pub fn with_settings(budgets: &[i64], settings: CrawlerConfig) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let storage =
            SqliteStorage::new(&dir.path().join("harvest.db")).expect("Failed to open storage");
        for (i, budget) in budgets.iter().enumerate() {
            storage
                .add_credential(&Credential::new(format!("k{}", i + 1), "secret", *budget))
                .expect("Failed to add credential");
        }
        let pool = CredentialPool::from_records(storage.load_credentials().unwrap());

        Self {
            _dir: dir,
            storage,
            pool,
            source: ScriptedSource::new(),
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
            settings,
        }
    }

    pub fn orchestrator(&self) -> Orchestrator<'_> {
        Orchestrator::new(
            &self.storage,
            &self.pool,
            &self.source,
            &self.retry,
            &self.settings,
        )
    }

    /// Daily reset: stored rows first, then the live pool adopts them
    pub fn reset_quota(&self, budget: i64) {
        self.storage.reset_credentials(budget).unwrap();
        self.pool.refresh(&self.storage.load_credentials().unwrap());
    }
}

/// Scripts the "demo" keyword: parents A and B, A has children v1..v3 with
/// 5, 0 and 2 leaves, B has no children
pub fn script_demo(source: &ScriptedSource) {
    let mut a = ParentEntity::discovered("A");
    a.title = Some("Channel A".to_string());
    let mut b = ParentEntity::discovered("B");
    b.title = Some("Channel B".to_string());
    source.add_parent(a).add_parent(b);

    for id in ["v1", "v2", "v3"] {
        let mut child = ChildEntity::discovered(id, "A");
        child.title = Some(format!("Video {}", id));
        source.add_child(child);
    }
    source.add_leaves("v1", 5).add_leaves("v3", 2);

    source.set_search(
        "demo",
        vec![
            SearchHit::Parent(ParentEntity::discovered("A")),
            SearchHit::Parent(ParentEntity::discovered("B")),
        ],
    );
}
