//! Output module for reporting harvest progress
//!
//! This module handles:
//! - Loading entity, target and credential statistics from storage
//! - Printing them for the `stats` command

pub mod stats;

pub use stats::{load_statistics, print_statistics, HarvestStatistics, KindStatistics};
