//! Enrich: batched detail fetches for parents and children

use super::{mark_error, record_outcome};
use crate::credentials::Credential;
use crate::crawler::fetcher::call_source;
use crate::crawler::{RunReport, StageContext};
use crate::entity::{ChildEntity, Entity, EntityKind, ParentEntity};
use crate::source::{Page, SourceError, SourceOp, SourceResult};
use crate::state::EntityStatus;
use crate::storage::{StorageResult, UpsertOutcome};
use crate::{HarvestError, Result};
use std::collections::HashSet;

/// Fetches parent details and advances them `to_crawl -> crawled_parent`
///
/// # Returns
///
/// The ids the source returned details for. Ids it did not return are
/// marked `error` and reported as entity errors.
pub(crate) fn enrich_parents(
    ctx: &StageContext<'_>,
    report: &mut RunReport,
    external_ids: &[String],
) -> Result<Vec<String>> {
    enrich(
        ctx,
        report,
        external_ids,
        SourceOp::ParentDetails,
        EntityStatus::CrawledParent,
        |credential, batch| ctx.source.parent_details(credential, batch),
        |records: &[ParentEntity]| ctx.store.upsert_parents(records),
    )
}

/// Fetches child details and advances them `to_crawl -> crawled_detail`
pub(crate) fn enrich_children(
    ctx: &StageContext<'_>,
    report: &mut RunReport,
    external_ids: &[String],
) -> Result<Vec<String>> {
    enrich(
        ctx,
        report,
        external_ids,
        SourceOp::ChildDetails,
        EntityStatus::CrawledDetail,
        |credential, batch| ctx.source.child_details(credential, batch),
        |records: &[ChildEntity]| ctx.store.upsert_children(records),
    )
}

fn enrich<R, F, U>(
    ctx: &StageContext<'_>,
    report: &mut RunReport,
    external_ids: &[String],
    op: SourceOp,
    detailed: EntityStatus,
    fetch: F,
    upsert: U,
) -> Result<Vec<String>>
where
    R: Entity,
    F: Fn(&Credential, &[String]) -> SourceResult<Page<R>>,
    U: Fn(&[R]) -> StorageResult<UpsertOutcome>,
{
    let kind = R::KIND;
    let batch_size = ctx.settings.detail_batch_size.max(1);
    let mut enriched = Vec::with_capacity(external_ids.len());

    for batch in external_ids.chunks(batch_size) {
        let records = match call_source(ctx, report, "enrich", op, |credential| {
            fetch(credential, batch)
        }) {
            Ok(page) => page.items,
            Err(HarvestError::Source(SourceError::NotFound(reason))) => {
                tracing::debug!(kind = %kind, reason = %reason, "Detail batch not found");
                Vec::new()
            }
            Err(e @ HarvestError::StageFailure { .. })
            | Err(e @ HarvestError::Source(SourceError::Malformed(_))) => {
                mark_error(ctx, report, kind, batch, &e.to_string(), e.is_resumable())?;
                continue;
            }
            Err(e) => return Err(e),
        };

        let requested: HashSet<&str> = batch.iter().map(String::as_str).collect();
        let records: Vec<R> = records
            .into_iter()
            .filter(|r| requested.contains(r.external_id()))
            .collect();

        let outcome = ctx.write("upsert_details", || upsert(&records))?;
        let rejected: HashSet<String> = outcome
            .rejected
            .iter()
            .map(|r| r.external_id.clone())
            .collect();
        let accepted = record_outcome(report, kind, records.len(), outcome);

        let returned: HashSet<&str> = records.iter().map(|r| r.external_id()).collect();
        let missing: Vec<String> = batch
            .iter()
            .filter(|id| !returned.contains(id.as_str()))
            .cloned()
            .collect();
        mark_error(ctx, report, kind, &missing, "not found at source", false)?;

        let stored: Vec<String> = records
            .iter()
            .map(|r| r.external_id().to_string())
            .filter(|id| !rejected.contains(id))
            .collect();
        let advanced = ctx.write("advance_status", || {
            ctx.store
                .advance_status(kind, &stored, &[EntityStatus::ToCrawl], detailed)
        })?;

        tracing::debug!(
            kind = %kind,
            requested = batch.len(),
            accepted,
            advanced,
            missing = missing.len(),
            "Detail batch stored"
        );

        match kind {
            EntityKind::Parent => report.parents += stored.len(),
            _ => report.children += stored.len(),
        }
        enriched.extend(stored);
    }

    Ok(enriched)
}
