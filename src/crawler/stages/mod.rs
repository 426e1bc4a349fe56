//! Pipeline stages
//!
//! Each stage pages through one kind of source call, writes what it gets
//! through the store, and advances the status of the entity it worked on:
//!
//! | Stage | Call | Writes | Advances |
//! |-------|------|--------|----------|
//! | Discover | search | parents, children at `to_crawl` | - |
//! | Enrich | parent/child details | full records | `to_crawl -> crawled_parent / crawled_detail` |
//! | Expand | collection pages | children at `to_crawl` | parent `crawled_parent -> crawled_children` |
//! | LeafFetch | leaf and sub-leaf pages | leaves | child `crawled_detail -> crawled_leaf` |

mod discover;
mod enrich;
mod expand;
mod leaf;

pub(crate) use discover::{discover, Discovered};
pub(crate) use enrich::{enrich_children, enrich_parents};
pub(crate) use expand::{expand_collection, expand_parent};
pub(crate) use leaf::fetch_leaves;

use crate::crawler::{RunReport, StageContext};
use crate::entity::EntityKind;
use crate::state::EntityStatus;
use crate::storage::UpsertOutcome;
use crate::Result;

/// Folds an upsert outcome into the report, returning the accepted count
fn record_outcome(
    report: &mut RunReport,
    kind: EntityKind,
    submitted: usize,
    outcome: UpsertOutcome,
) -> usize {
    let accepted = outcome.accepted(submitted);
    report.inserted += outcome.inserted_count;
    for rejected in outcome.rejected {
        report.entity_error(kind, &rejected.external_id, rejected.reason, false);
    }
    accepted
}

/// Moves the given entities into `error` from wherever they are
///
/// `retryable` records that the failure was transient, so an explicit
/// request for the same entities may succeed later.
pub(crate) fn mark_error(
    ctx: &StageContext<'_>,
    report: &mut RunReport,
    kind: EntityKind,
    external_ids: &[String],
    message: &str,
    retryable: bool,
) -> Result<()> {
    if external_ids.is_empty() {
        return Ok(());
    }
    let from: Vec<EntityStatus> = EntityStatus::for_kind(kind)
        .into_iter()
        .filter(|s| *s != EntityStatus::Error)
        .collect();
    ctx.write("advance_status", || {
        ctx.store
            .advance_status(kind, external_ids, &from, EntityStatus::Error)
    })?;
    for id in external_ids {
        report.entity_error(kind, id, message, retryable);
    }
    Ok(())
}
