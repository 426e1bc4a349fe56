//! Discover: keyword search

use super::record_outcome;
use crate::crawler::fetcher::call_source;
use crate::crawler::{RunReport, StageContext};
use crate::entity::{ChildEntity, EntityKind, ParentEntity};
use crate::source::{SearchHit, SourceOp, SEARCH_PAGE_SIZE};
use crate::Result;
use std::collections::HashSet;

/// Ids found by a search, in the order the source returned them
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Discovered {
    pub parent_ids: Vec<String>,
    pub child_ids: Vec<String>,
}

/// Pages through a keyword search until the cursor runs out or the
/// configured result cap is reached
///
/// Parents and children are written at `to_crawl` page by page. A child hit
/// also records its parent, since a child cannot be stored without one.
pub(crate) fn discover(
    ctx: &StageContext<'_>,
    report: &mut RunReport,
    keyword: &str,
) -> Result<Discovered> {
    let cap = ctx.settings.search_max_results;
    let mut found = Discovered::default();
    let mut seen_parents = HashSet::new();
    let mut seen_children = HashSet::new();
    let mut returned = 0;
    let mut cursor: Option<String> = None;

    while returned < cap {
        let page_size = (cap - returned).min(SEARCH_PAGE_SIZE);
        let page = call_source(ctx, report, "discover", SourceOp::Search, |credential| {
            ctx.source
                .search(credential, keyword, cursor.as_deref(), page_size)
        })?;
        returned += page.items.len();
        let page_was_empty = page.items.is_empty();

        let mut parents: Vec<ParentEntity> = Vec::new();
        let mut children: Vec<ChildEntity> = Vec::new();
        for hit in page.items {
            match hit {
                SearchHit::Parent(parent) => {
                    if seen_parents.insert(parent.external_id.clone()) {
                        found.parent_ids.push(parent.external_id.clone());
                        parents.push(parent);
                    }
                }
                SearchHit::Child(child) => {
                    if !seen_children.insert(child.external_id.clone()) {
                        continue;
                    }
                    if seen_parents.insert(child.parent_external_id.clone()) {
                        found.parent_ids.push(child.parent_external_id.clone());
                        parents.push(ParentEntity::discovered(child.parent_external_id.clone()));
                    }
                    found.child_ids.push(child.external_id.clone());
                    children.push(child);
                }
            }
        }

        let outcome = ctx.write("upsert_parents", || ctx.store.upsert_parents(&parents))?;
        record_outcome(report, EntityKind::Parent, parents.len(), outcome);
        let outcome = ctx.write("upsert_children", || ctx.store.upsert_children(&children))?;
        record_outcome(report, EntityKind::Child, children.len(), outcome);

        tracing::debug!(
            keyword,
            parents = parents.len(),
            children = children.len(),
            "Search page stored"
        );

        match page.next_cursor {
            Some(next) if !page_was_empty => cursor = Some(next),
            _ => break,
        }
    }

    report.discovered += seen_children.len() + found.parent_ids.len();
    tracing::info!(
        keyword,
        parents = found.parent_ids.len(),
        children = found.child_ids.len(),
        "Discovery finished"
    );
    Ok(found)
}
