//! Expand: paginating a parent's child collection

use super::record_outcome;
use crate::crawler::fetcher::call_source;
use crate::crawler::{RunReport, StageContext};
use crate::entity::{ChildEntity, EntityKind};
use crate::source::{SourceError, SourceOp};
use crate::state::EntityStatus;
use crate::{HarvestError, Result};
use std::collections::HashSet;

/// Lists every child of a parent and retires the parent
///
/// The parent advances `crawled_parent -> crawled_children` once its
/// collection is exhausted, including when the collection is empty, gone, or
/// was never published.
///
/// # Returns
///
/// The ids of the children listed, in collection order
pub(crate) fn expand_parent(
    ctx: &StageContext<'_>,
    report: &mut RunReport,
    parent_external_id: &str,
) -> Result<Vec<String>> {
    let parent = ctx.write("get_parent", || ctx.store.get_parent(parent_external_id))?;
    let collection_id = parent.and_then(|p| p.collection_id);

    let child_ids = match &collection_id {
        Some(collection_id) => {
            expand_collection(ctx, report, collection_id, Some(parent_external_id))?
        }
        None => {
            // A parent that never published anything has nothing to list
            tracing::info!(parent = parent_external_id, "Parent has no child collection");
            Vec::new()
        }
    };

    let advanced = ctx.write("advance_status", || {
        ctx.store.advance_status(
            EntityKind::Parent,
            &[parent_external_id.to_string()],
            &[EntityStatus::CrawledParent],
            EntityStatus::CrawledChildren,
        )
    })?;
    if advanced > 0 {
        report.expanded += 1;
    }

    tracing::info!(
        parent = parent_external_id,
        collection = collection_id.as_deref().unwrap_or("-"),
        children = child_ids.len(),
        "Expansion finished"
    );
    Ok(child_ids)
}

/// Pages through a child collection, writing children at `to_crawl`
///
/// # Arguments
///
/// * `collection_id` - Collection to list
/// * `owner` - Parent to attribute the children to; when `None` the owner
///   reported by the source is kept
pub(crate) fn expand_collection(
    ctx: &StageContext<'_>,
    report: &mut RunReport,
    collection_id: &str,
    owner: Option<&str>,
) -> Result<Vec<String>> {
    let mut child_ids = Vec::new();
    let mut seen = HashSet::new();
    let mut seen_cursors = HashSet::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = match call_source(ctx, report, "expand", SourceOp::ExpandPage, |credential| {
            ctx.source
                .expand_page(credential, collection_id, cursor.as_deref())
        }) {
            Ok(page) => page,
            Err(HarvestError::Source(SourceError::NotFound(reason))) => {
                // A missing collection lists nothing
                tracing::info!(collection = collection_id, reason = %reason, "Collection not found");
                break;
            }
            Err(e) => return Err(e),
        };

        let listed = page.items.len();
        let mut children: Vec<ChildEntity> = page
            .items
            .into_iter()
            .filter(|child| seen.insert(child.external_id.clone()))
            .collect();
        for child in &mut children {
            if let Some(owner) = owner {
                child.parent_external_id = owner.to_string();
            }
            if child.collection_id.is_none() {
                child.collection_id = Some(collection_id.to_string());
            }
        }

        if !children.is_empty() {
            let outcome = ctx.write("upsert_children", || ctx.store.upsert_children(&children))?;
            let rejected: HashSet<String> =
                outcome.rejected.iter().map(|r| r.external_id.clone()).collect();
            record_outcome(report, EntityKind::Child, children.len(), outcome);
            child_ids.extend(
                children
                    .iter()
                    .map(|c| c.external_id.clone())
                    .filter(|id| !rejected.contains(id)),
            );
        }

        // Pages may repeat children already listed; only the cursor decides
        // whether more follow
        match page.next_cursor {
            Some(next) if seen_cursors.insert(next.clone()) => cursor = Some(next),
            Some(next) => {
                tracing::warn!(
                    collection = collection_id,
                    cursor = %next,
                    listed,
                    "Collection cursor repeated, stopping"
                );
                break;
            }
            None => break,
        }
    }

    Ok(child_ids)
}
