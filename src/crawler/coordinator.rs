//! Orchestrator - sequences the stages for one unit of work
//!
//! A unit of work is a keyword, a batch of parent or child ids, a locator, or
//! a page of backlog. For each unit the orchestrator:
//! - runs Discover, Enrich, Expand and LeafFetch in order, picking up every
//!   entity from the status it is currently in
//! - contains record-level failures by moving that entity to `error`
//! - aborts the unit on `CredentialsExhausted` or a storage failure,
//!   keeping everything already written
//! - records the quota spent and persists the credential pool afterwards

use crate::config::CrawlerConfig;
use crate::credentials::CredentialPool;
use crate::crawler::fetcher::{call_source, StageContext};
use crate::crawler::stages::{
    discover, enrich_children, enrich_parents, expand_collection, expand_parent, fetch_leaves,
    mark_error,
};
use crate::crawler::worker_pool::{PoolOutcome, WorkerPool};
use crate::crawler::RunReport;
use crate::entity::EntityKind;
use crate::retry::RetryPolicy;
use crate::source::{parse_locator, Locator, SourceClient, SourceError, SourceOp};
use crate::state::{EntityStatus, TargetStatus};
use crate::storage::Storage;
use crate::{HarvestError, Result};

/// Sequences pipeline stages over shared store, pool and source handles
pub struct Orchestrator<'a> {
    ctx: StageContext<'a>,
    workers: WorkerPool,
}

impl<'a> Orchestrator<'a> {
    /// Creates an orchestrator over explicitly constructed collaborators
    ///
    /// # Arguments
    ///
    /// * `store` - Entity, target and credential storage
    /// * `pool` - Credential pool charged by every source call
    /// * `source` - Remote content API
    /// * `retry` - Backoff policy for storage and source calls
    /// * `settings` - Worker count, batch sizes and caps
    pub fn new(
        store: &'a dyn Storage,
        pool: &'a CredentialPool,
        source: &'a dyn SourceClient,
        retry: &'a RetryPolicy,
        settings: &'a CrawlerConfig,
    ) -> Self {
        Self {
            ctx: StageContext {
                store,
                pool,
                source,
                retry,
                settings,
            },
            workers: WorkerPool::new(settings.workers),
        }
    }

    pub fn worker_pool(&self) -> &WorkerPool {
        &self.workers
    }

    // ===== Entry points =====

    /// Crawls one keyword end to end
    ///
    /// The keyword's target is claimed `to_crawl -> crawling` first; a target
    /// in any other status is skipped. On success the target becomes
    /// `crawled`, on failure `error` so a later reset can retry it.
    pub fn run_for_keyword(&self, keyword: &str) -> Result<RunReport> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(HarvestError::Malformed("empty keyword".to_string()));
        }

        let target = self
            .ctx
            .write("ensure_target", || self.ctx.store.ensure_target(keyword))?;
        if target.status != TargetStatus::ToCrawl {
            tracing::info!(keyword, status = %target.status, "Target not dispatchable, skipping");
            return Ok(RunReport::default());
        }
        if !self
            .ctx
            .write("claim_target", || self.ctx.store.claim_target(keyword))?
        {
            tracing::info!(keyword, "Target claimed elsewhere, skipping");
            return Ok(RunReport::default());
        }

        let result = self.run_unit(&format!("keyword:{}", keyword), |report| {
            let found = discover(&self.ctx, report, keyword)?;
            self.process_parents(report, &found.parent_ids)?;
            self.process_children(report, &found.child_ids)
        });

        let finished = match &result {
            Ok(_) => self.ctx.write("finish_target", || {
                self.ctx
                    .store
                    .finish_target(keyword, TargetStatus::Crawled, None)
            }),
            Err(e) => {
                let message = e.to_string();
                self.ctx.write("finish_target", || {
                    self.ctx
                        .store
                        .finish_target(keyword, TargetStatus::Error, Some(&message))
                })
            }
        };
        if let Err(e) = finished {
            tracing::error!(keyword, error = %e, "Failed to record target status");
        }

        result
    }

    /// Crawls many keywords across the worker pool
    pub fn run_for_keywords(&self, keywords: &[String]) -> PoolOutcome<RunReport> {
        self.workers.run(keywords, |keyword| self.run_for_keyword(keyword))
    }

    /// Crawls one parent: detail, expansion, then each child's detail and leaves
    pub fn run_for_parent_id(&self, external_id: &str) -> Result<RunReport> {
        self.run_for_parent_ids(&[external_id.to_string()])
    }

    /// Crawls a batch of parents as one unit of work
    ///
    /// Listed parents left in `error` by an earlier run are retried.
    pub fn run_for_parent_ids(&self, external_ids: &[String]) -> Result<RunReport> {
        self.run_unit(&unit_label("parent", external_ids), |report| {
            self.reopen(EntityKind::Parent, external_ids)?;
            self.process_parents(report, external_ids)
        })
    }

    /// Resolves an alternate key to a parent id, then crawls that parent
    pub fn run_for_parent_key(&self, alternate_key: &str) -> Result<RunReport> {
        self.run_unit(&format!("parent_key:{}", alternate_key), |report| {
            let page = call_source(
                &self.ctx,
                report,
                "resolve",
                SourceOp::ResolveParent,
                |credential| self.ctx.source.resolve_parent(credential, alternate_key),
            )
            .map_err(|e| match e {
                HarvestError::Source(SourceError::NotFound(_)) => {
                    HarvestError::NotFound(format!("parent for {}", alternate_key))
                }
                other => other,
            })?;
            let external_id = page
                .items
                .into_iter()
                .next()
                .ok_or_else(|| HarvestError::NotFound(format!("parent for {}", alternate_key)))?;

            tracing::info!(alternate_key, parent = %external_id, "Resolved alternate key");
            let external_ids = [external_id];
            self.reopen(EntityKind::Parent, &external_ids)?;
            self.process_parents(report, &external_ids)
        })
    }

    /// Crawls one child: detail, then leaves
    pub fn run_for_child_id(&self, external_id: &str) -> Result<RunReport> {
        self.run_for_child_ids(&[external_id.to_string()])
    }

    /// Crawls a batch of children as one unit of work
    ///
    /// Listed children left in `error` by an earlier run are retried.
    pub fn run_for_child_ids(&self, external_ids: &[String]) -> Result<RunReport> {
        self.run_unit(&unit_label("child", external_ids), |report| {
            self.reopen(EntityKind::Child, external_ids)?;
            self.process_children(report, external_ids)
        })
    }

    /// Crawls whatever a URL-like locator points at
    ///
    /// A child locator crawls that child; a collection locator expands the
    /// collection and crawls every child in it; parent locators crawl the
    /// parent. Unparseable locators fail with `Malformed` before any call.
    pub fn run_for_child_locator(&self, locator: &str) -> Result<RunReport> {
        let parsed = parse_locator(locator).map_err(|e| HarvestError::Malformed(e.to_string()))?;
        tracing::debug!(locator, parsed = ?parsed, "Parsed locator");

        match parsed {
            Locator::Child(id) => self.run_for_child_id(&id),
            Locator::Parent(id) => self.run_for_parent_id(&id),
            Locator::ParentKey(key) => self.run_for_parent_key(&key),
            Locator::Collection(collection_id) => {
                self.run_unit(&format!("collection:{}", collection_id), |report| {
                    let child_ids = expand_collection(&self.ctx, report, &collection_id, None)?;
                    self.process_children(report, &child_ids)
                })
            }
        }
    }

    // ===== Backlog drains =====

    /// Crawls every parent and child still at `to_crawl`
    pub fn drain_detail_backlog(&self) -> Result<PoolOutcome<RunReport>> {
        let batch = self.ctx.settings.detail_batch_size.max(1);
        let mut outcome = self.drain(EntityKind::Parent, EntityStatus::ToCrawl, batch, |ids| {
            self.run_for_parent_ids(ids)
        })?;
        if !outcome.credentials_exhausted() {
            outcome.absorb(
                self.drain(EntityKind::Child, EntityStatus::ToCrawl, batch, |ids| {
                    self.run_for_child_ids(ids)
                })?,
            );
        }
        Ok(outcome)
    }

    /// Expands every parent at `crawled_parent`
    pub fn drain_expand_backlog(&self) -> Result<PoolOutcome<RunReport>> {
        self.drain(EntityKind::Parent, EntityStatus::CrawledParent, 1, |ids| {
            self.run_for_parent_ids(ids)
        })
    }

    /// Fetches leaves for every child at `crawled_detail`
    pub fn drain_leaf_backlog(&self) -> Result<PoolOutcome<RunReport>> {
        self.drain(EntityKind::Child, EntityStatus::CrawledDetail, 1, |ids| {
            self.run_for_child_ids(ids)
        })
    }

    /// Pages through records in `status` and runs each page over the pool
    ///
    /// The page is re-queried every iteration. Records a worker advanced drop
    /// out of the listing on their own; `skip` only grows by the records the
    /// page left behind in `status`, so nothing is processed twice.
    fn drain<F>(
        &self,
        kind: EntityKind,
        status: EntityStatus,
        batch: usize,
        unit: F,
    ) -> Result<PoolOutcome<RunReport>>
    where
        F: Fn(&[String]) -> Result<RunReport> + Sync,
    {
        let page_size = self.ctx.settings.backlog_page_size.max(1);
        let mut outcome = PoolOutcome::<RunReport>::default();
        let mut skip = 0;
        let mut pages = 0;

        loop {
            let ids = self.ctx.write("list_by_status", || {
                self.ctx.store.list_by_status(kind, status, skip, page_size)
            })?;
            if ids.is_empty() {
                break;
            }
            pages += 1;

            let batches: Vec<&[String]> = ids.chunks(batch).collect();
            let page = self.workers.run(&batches, |ids| unit(ids));
            let exhausted = page.credentials_exhausted();
            outcome.absorb(page);

            if exhausted {
                tracing::warn!(kind = %kind, status = %status, pages, "Credentials exhausted, stopping backlog");
                break;
            }

            let statuses = self
                .ctx
                .write("statuses_of", || self.ctx.store.statuses_of(kind, &ids))?;
            let left_behind = ids
                .iter()
                .filter(|id| statuses.get(id.as_str()) == Some(&status))
                .count();
            skip += left_behind;

            tracing::info!(
                kind = %kind,
                status = %status,
                page = pages,
                listed = ids.len(),
                left_behind,
                "Backlog page processed"
            );
        }

        Ok(outcome)
    }

    // ===== Stage sequencing =====

    /// Details, expands and descends into the given parents by their status
    fn process_parents(&self, report: &mut RunReport, external_ids: &[String]) -> Result<()> {
        if external_ids.is_empty() {
            return Ok(());
        }
        let statuses = self.ctx.write("statuses_of", || {
            self.ctx.store.statuses_of(EntityKind::Parent, external_ids)
        })?;

        let mut to_detail = Vec::new();
        let mut to_expand = Vec::new();
        for id in external_ids {
            match statuses.get(id) {
                None | Some(EntityStatus::ToCrawl) => to_detail.push(id.clone()),
                Some(EntityStatus::CrawledParent) => to_expand.push(id.clone()),
                Some(status) => {
                    tracing::debug!(parent = %id, status = %status, "Parent needs no work");
                }
            }
        }

        to_expand.extend(enrich_parents(&self.ctx, report, &to_detail)?);

        for parent_id in &to_expand {
            match expand_parent(&self.ctx, report, parent_id) {
                Ok(child_ids) => self.process_children(report, &child_ids)?,
                Err(e) => self.contain(report, EntityKind::Parent, parent_id, e)?,
            }
        }
        Ok(())
    }

    /// Details and fetches leaves for the given children by their status
    fn process_children(&self, report: &mut RunReport, external_ids: &[String]) -> Result<()> {
        if external_ids.is_empty() {
            return Ok(());
        }
        let statuses = self.ctx.write("statuses_of", || {
            self.ctx.store.statuses_of(EntityKind::Child, external_ids)
        })?;

        let mut to_detail = Vec::new();
        let mut to_fetch = Vec::new();
        for id in external_ids {
            match statuses.get(id) {
                None | Some(EntityStatus::ToCrawl) => to_detail.push(id.clone()),
                Some(EntityStatus::CrawledDetail) => to_fetch.push(id.clone()),
                Some(_) => {}
            }
        }

        to_fetch.extend(enrich_children(&self.ctx, report, &to_detail)?);

        for child_id in &to_fetch {
            if let Err(e) = fetch_leaves(&self.ctx, report, child_id) {
                self.contain(report, EntityKind::Child, child_id, e)?;
            }
        }
        Ok(())
    }

    /// Puts explicitly requested records back at `to_crawl` if they failed before
    fn reopen(&self, kind: EntityKind, external_ids: &[String]) -> Result<()> {
        let reopened = self.ctx.write("reopen_errors", || {
            self.ctx.store.reopen_errors(kind, external_ids)
        })?;
        if reopened > 0 {
            tracing::info!(kind = %kind, reopened, "Retrying records left in error");
        }
        Ok(())
    }

    /// Turns a record-level failure into an `error` status
    ///
    /// Exhausted credentials, storage failures and anything else that is not
    /// about this one record are handed back to abort the unit.
    fn contain(
        &self,
        report: &mut RunReport,
        kind: EntityKind,
        external_id: &str,
        error: HarvestError,
    ) -> Result<()> {
        match error {
            HarvestError::StageFailure { .. }
            | HarvestError::Source(_)
            | HarvestError::Validation(_)
            | HarvestError::NotFound(_) => mark_error(
                &self.ctx,
                report,
                kind,
                &[external_id.to_string()],
                &error.to_string(),
                error.is_resumable(),
            ),
            other => Err(other),
        }
    }

    // ===== Bookkeeping =====

    /// Runs one unit of work and settles its quota whether or not it succeeded
    fn run_unit<F>(&self, unit: &str, work: F) -> Result<RunReport>
    where
        F: FnOnce(&mut RunReport) -> Result<()>,
    {
        let span = tracing::info_span!("unit", unit);
        let _entered = span.enter();

        let mut report = RunReport::default();
        let result = work(&mut report);
        self.settle(unit, &report);

        match result {
            Ok(()) => {
                report.log_summary(unit);
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(
                    unit,
                    error = %e,
                    quota = report.quota.total(),
                    resumable = e.is_resumable(),
                    "Unit of work aborted"
                );
                Err(e)
            }
        }
    }

    /// Records quota usage and syncs the credential pool with storage
    fn settle(&self, unit: &str, report: &RunReport) {
        let store = self.ctx.store;
        if let Err(e) = self
            .ctx
            .write("record_usage", || store.record_usage(unit, &report.quota))
        {
            tracing::warn!(unit, error = %e, "Failed to record quota usage");
        }

        let snapshot = self.ctx.pool.snapshot();
        if let Err(e) = self
            .ctx
            .write("save_credential_snapshot", || {
                store.save_credential_snapshot(&snapshot)
            })
        {
            tracing::warn!(unit, error = %e, "Failed to persist credential budgets");
        }

        match self
            .ctx
            .write("load_credentials", || store.load_credentials())
        {
            Ok(records) => {
                self.ctx.pool.refresh(&records);
            }
            Err(e) => tracing::warn!(unit, error = %e, "Failed to reload credentials"),
        }
    }
}

fn unit_label(prefix: &str, ids: &[String]) -> String {
    match ids {
        [] => prefix.to_string(),
        [only] => format!("{}:{}", prefix, only),
        [first, rest @ ..] => format!("{}:{}+{}", prefix, first, rest.len()),
    }
}
