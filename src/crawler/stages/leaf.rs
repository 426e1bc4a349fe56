//! LeafFetch: leaves and their replies for one child

use super::record_outcome;
use crate::crawler::fetcher::call_source;
use crate::crawler::{RunReport, StageContext};
use crate::entity::{EntityKind, LeafEntity};
use crate::source::{SourceError, SourceOp};
use crate::state::EntityStatus;
use crate::{HarvestError, Result};
use std::collections::HashSet;

/// Fetches every leaf of a child and retires the child
///
/// Threads whose reply count exceeds what the source inlined are completed
/// with sub-leaf pages. A child with leaves disabled or removed counts as
/// fetched with zero leaves. The child advances
/// `crawled_detail -> crawled_leaf` once every page is stored.
///
/// # Returns
///
/// The number of distinct leaves stored
pub(crate) fn fetch_leaves(
    ctx: &StageContext<'_>,
    report: &mut RunReport,
    child_external_id: &str,
) -> Result<usize> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut stored = 0;
    let mut cursor: Option<String> = None;

    loop {
        let page = match call_source(ctx, report, "leaf_fetch", SourceOp::LeafPage, |credential| {
            ctx.source
                .leaf_page(credential, child_external_id, cursor.as_deref())
        }) {
            Ok(page) => page,
            Err(HarvestError::Source(SourceError::NotFound(reason))) => {
                tracing::info!(child = child_external_id, reason = %reason, "Leaves unavailable");
                break;
            }
            Err(e) => return Err(e),
        };

        let mut batch: Vec<LeafEntity> = Vec::new();
        let mut incomplete: Vec<String> = Vec::new();
        for thread in page.items {
            if thread.has_more_replies() {
                incomplete.push(thread.top.external_id.clone());
            }
            batch.push(thread.top);
            batch.extend(thread.replies);
        }
        stored += write_leaves(ctx, report, child_external_id, None, batch, &mut seen)?;

        for top in incomplete {
            stored += fetch_replies(ctx, report, child_external_id, &top, &mut seen)?;
        }

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    ctx.write("advance_status", || {
        ctx.store.advance_status(
            EntityKind::Child,
            &[child_external_id.to_string()],
            &[EntityStatus::CrawledDetail],
            EntityStatus::CrawledLeaf,
        )
    })?;
    report.leaves += stored;

    tracing::debug!(child = child_external_id, leaves = stored, "Leaf fetch finished");
    Ok(stored)
}

/// Pages through the replies of one top-level leaf
fn fetch_replies(
    ctx: &StageContext<'_>,
    report: &mut RunReport,
    child_external_id: &str,
    top_external_id: &str,
    seen: &mut HashSet<String>,
) -> Result<usize> {
    let mut stored = 0;
    let mut cursor: Option<String> = None;

    loop {
        let page = match call_source(
            ctx,
            report,
            "leaf_fetch",
            SourceOp::SubLeafPage,
            |credential| {
                ctx.source
                    .sub_leaf_page(credential, top_external_id, cursor.as_deref())
            },
        ) {
            Ok(page) => page,
            Err(HarvestError::Source(SourceError::NotFound(reason))) => {
                tracing::debug!(leaf = top_external_id, reason = %reason, "Replies unavailable");
                break;
            }
            Err(e) => return Err(e),
        };

        stored += write_leaves(
            ctx,
            report,
            child_external_id,
            Some(top_external_id),
            page.items,
            seen,
        )?;

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(stored)
}

/// Stores leaves not yet seen for this child, filling in missing links
fn write_leaves(
    ctx: &StageContext<'_>,
    report: &mut RunReport,
    child_external_id: &str,
    parent_leaf_id: Option<&str>,
    leaves: Vec<LeafEntity>,
    seen: &mut HashSet<String>,
) -> Result<usize> {
    let fresh: Vec<LeafEntity> = leaves
        .into_iter()
        .filter(|leaf| seen.insert(leaf.external_id.clone()))
        .map(|mut leaf| {
            if leaf.child_external_id.is_empty() {
                leaf.child_external_id = child_external_id.to_string();
            }
            if leaf.parent_leaf_id.is_none() {
                leaf.parent_leaf_id = parent_leaf_id.map(str::to_string);
            }
            leaf
        })
        .collect();
    if fresh.is_empty() {
        return Ok(0);
    }

    let outcome = ctx.write("upsert_leaves", || ctx.store.upsert_leaves(&fresh))?;
    Ok(record_outcome(report, EntityKind::Leaf, fresh.len(), outcome))
}
