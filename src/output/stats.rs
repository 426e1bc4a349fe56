//! Statistics generation from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! pipeline progress, credential budgets and quota spend from the storage
//! layer.

use crate::credentials::{Credential, CredentialStatus};
use crate::entity::EntityKind;
use crate::state::{EntityStatus, TargetStatus};
use crate::storage::{RunRecord, Storage};
use crate::Result;
use std::collections::BTreeMap;

/// Record counts for one entity kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindStatistics {
    pub total: u64,

    /// Count per status, in pipeline order; empty for leaves
    pub by_status: Vec<(EntityStatus, u64)>,
}

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    pub parents: KindStatistics,
    pub children: KindStatistics,
    pub leaves: KindStatistics,

    /// Count of crawl targets by status
    pub targets_by_status: Vec<(TargetStatus, u64)>,

    /// Every stored credential with its remaining budget
    pub credentials: Vec<Credential>,

    /// Total quota recorded per credential across all runs
    pub usage_totals: BTreeMap<String, i64>,

    pub latest_run: Option<RunRecord>,
}

impl HarvestStatistics {
    /// Sum of the remaining budget of every active credential
    pub fn remaining_budget(&self) -> i64 {
        self.credentials
            .iter()
            .filter(|c| c.status == CredentialStatus::Active)
            .map(|c| c.remaining_budget)
            .sum()
    }

    /// Records that ended in `error`, over parents and children
    pub fn errors(&self) -> u64 {
        [&self.parents, &self.children]
            .iter()
            .flat_map(|k| k.by_status.iter())
            .filter(|(status, _)| *status == EntityStatus::Error)
            .map(|(_, count)| count)
            .sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<HarvestStatistics> {
    let parents = load_kind(storage, EntityKind::Parent)?;
    let children = load_kind(storage, EntityKind::Child)?;
    let leaves = load_kind(storage, EntityKind::Leaf)?;

    let mut targets_by_status = Vec::new();
    for status in TargetStatus::all_statuses() {
        targets_by_status.push((status, storage.count_targets_by_status(status)?));
    }

    let credentials = storage.load_credentials()?;
    let usage_totals = storage.usage_totals()?.into_iter().collect();
    let latest_run = storage.get_latest_run()?;

    Ok(HarvestStatistics {
        parents,
        children,
        leaves,
        targets_by_status,
        credentials,
        usage_totals,
        latest_run,
    })
}

fn load_kind(storage: &dyn Storage, kind: EntityKind) -> Result<KindStatistics> {
    let total = storage.count_entities(kind)?;
    let mut by_status = Vec::new();
    if kind.has_status() {
        for status in EntityStatus::for_kind(kind) {
            by_status.push((status, storage.count_by_status(kind, status)?));
        }
    }
    Ok(KindStatistics { total, by_status })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    if let Some(run) = &stats.latest_run {
        println!(
            "Latest run: #{} {} ({}) started {}",
            run.id,
            run.command,
            run.status.to_db_string(),
            run.started_at
        );
        println!();
    }

    for (label, kind) in [
        ("Parents", &stats.parents),
        ("Children", &stats.children),
        ("Leaves", &stats.leaves),
    ] {
        println!("{}: {}", label, kind.total);
        for (status, count) in &kind.by_status {
            let percentage = if kind.total > 0 {
                (*count as f64 / kind.total as f64) * 100.0
            } else {
                0.0
            };
            println!("  {}: {} ({:.1}%)", status, count, percentage);
        }
    }
    println!();

    println!("Targets:");
    for (status, count) in &stats.targets_by_status {
        println!("  {}: {}", status, count);
    }
    println!();

    println!("Credentials ({}):", stats.credentials.len());
    for credential in &stats.credentials {
        let spent = stats.usage_totals.get(&credential.id).copied().unwrap_or(0);
        println!(
            "  {}: {} remaining, {} ({} spent overall)",
            credential.id,
            credential.remaining_budget,
            credential.status.to_db_string(),
            spent
        );
    }
    println!("Remaining budget: {}", stats.remaining_budget());

    if stats.errors() > 0 {
        println!();
        println!(
            "{} records in error; `reset-errors` returns them to to_crawl",
            stats.errors()
        );
    }
}
