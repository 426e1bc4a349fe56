//! Crawler module for quota-aware pipeline execution
//!
//! This module contains the core crawling logic, including:
//! - Credential-charging source calls with rotation and retry
//! - The Discover, Enrich, Expand and LeafFetch stages
//! - Per-unit orchestration and backlog draining
//! - A bounded worker pool for fanning units out

mod coordinator;
mod fetcher;
mod report;
mod stages;
mod worker_pool;

pub use coordinator::Orchestrator;
pub use fetcher::StageContext;
pub use report::{EntityError, RunReport};
pub use worker_pool::{partition, PartitionResult, PoolOutcome, Tally, WorkerPool};
