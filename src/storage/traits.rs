//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::credentials::{Credential, QuotaLedger};
use crate::entity::{ChildEntity, EntityKind, LeafEntity, ParentEntity};
use crate::retry::IsRetryable;
use crate::state::{EntityStatus, TargetStatus};
use crate::storage::{RunRecord, RunStatus, TargetRecord, UpsertOutcome};
use rusqlite::ErrorCode;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Invalid status transition for {kind}: {from} -> {to}")]
    InvalidTransition {
        kind: EntityKind,
        from: EntityStatus,
        to: EntityStatus,
    },

    #[error("{kind} records do not support {operation}")]
    Unsupported {
        kind: EntityKind,
        operation: &'static str,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl IsRetryable for StorageError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::SystemIoFailure
            ),
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all database operations needed by the pipeline.
/// Implementations must be shareable across worker threads; every
/// operation is individually atomic.
pub trait Storage: Send + Sync {
    // ===== Run Management =====

    /// Creates a new run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    /// * `command` - The CLI command that started the run
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&self, config_hash: &str, command: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Marks a run finished with the given status
    fn finish_run(&self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Crawl Targets =====

    /// Creates the target in `to_crawl` if it does not exist and returns it
    fn ensure_target(&self, key: &str) -> StorageResult<TargetRecord>;

    /// Gets a target by key
    fn get_target(&self, key: &str) -> StorageResult<Option<TargetRecord>>;

    /// Moves a target `to_crawl -> crawling`
    ///
    /// Returns false when another worker claimed it first or it is not `to_crawl`.
    fn claim_target(&self, key: &str) -> StorageResult<bool>;

    /// Records the final status of a claimed target
    fn finish_target(
        &self,
        key: &str,
        status: TargetStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()>;

    /// Returns targets in any of `from` to `to_crawl`
    fn reset_targets(&self, from: &[TargetStatus]) -> StorageResult<usize>;

    /// Counts targets in a status
    fn count_targets_by_status(&self, status: TargetStatus) -> StorageResult<u64>;

    // ===== Entities =====

    /// Inserts new parents and merges non-null fields into existing ones
    ///
    /// The whole batch runs in one transaction. A record's stored status is
    /// never lowered by an upsert.
    fn upsert_parents(&self, records: &[ParentEntity]) -> StorageResult<UpsertOutcome>;

    /// Inserts new children and merges non-null fields into existing ones
    fn upsert_children(&self, records: &[ChildEntity]) -> StorageResult<UpsertOutcome>;

    /// Inserts new leaves and merges non-null fields into existing ones
    fn upsert_leaves(&self, records: &[LeafEntity]) -> StorageResult<UpsertOutcome>;

    /// Gets a parent by external id
    fn get_parent(&self, external_id: &str) -> StorageResult<Option<ParentEntity>>;

    /// Gets a child by external id
    fn get_child(&self, external_id: &str) -> StorageResult<Option<ChildEntity>>;

    /// Gets a leaf by external id
    fn get_leaf(&self, external_id: &str) -> StorageResult<Option<LeafEntity>>;

    /// Moves records currently in one of `from_any_of` to `to`
    ///
    /// # Arguments
    ///
    /// * `kind` - Parent or child (leaves carry no status)
    /// * `external_ids` - Records to advance
    /// * `from_any_of` - Statuses a record must currently hold to be advanced
    /// * `to` - The new status; must be forward of every `from_any_of`
    ///
    /// # Returns
    ///
    /// The number of records actually advanced
    fn advance_status(
        &self,
        kind: EntityKind,
        external_ids: &[String],
        from_any_of: &[EntityStatus],
        to: EntityStatus,
    ) -> StorageResult<usize>;

    /// Looks up the current status of each id; missing ids are absent from the map
    fn statuses_of(
        &self,
        kind: EntityKind,
        external_ids: &[String],
    ) -> StorageResult<HashMap<String, EntityStatus>>;

    /// Pages through the ids of records in a status, in insertion order
    fn list_by_status(
        &self,
        kind: EntityKind,
        status: EntityStatus,
        skip: usize,
        limit: usize,
    ) -> StorageResult<Vec<String>>;

    /// Returns `error` records of a kind to `to_crawl`
    fn reset_errors(&self, kind: EntityKind) -> StorageResult<usize>;

    /// Returns the listed records of a kind to `to_crawl` if they are in `error`
    ///
    /// Records in any other status are left alone.
    fn reopen_errors(&self, kind: EntityKind, external_ids: &[String]) -> StorageResult<usize>;

    // ===== Credentials =====

    /// Stores a new credential; returns false if the id already exists
    fn add_credential(&self, credential: &Credential) -> StorageResult<bool>;

    /// Loads every stored credential
    fn load_credentials(&self) -> StorageResult<Vec<Credential>>;

    /// Writes an in-memory snapshot back
    ///
    /// Stored budgets only ever go down through this call, and rows reset
    /// since the snapshot's generation are left alone.
    fn save_credential_snapshot(&self, snapshot: &[Credential]) -> StorageResult<()>;

    /// Restores every credential to `budget` and bumps its generation
    fn reset_credentials(&self, budget: i64) -> StorageResult<usize>;

    /// Appends one usage row per credential in the ledger
    fn record_usage(&self, unit: &str, ledger: &QuotaLedger) -> StorageResult<()>;

    /// Total recorded usage per credential
    fn usage_totals(&self) -> StorageResult<Vec<(String, i64)>>;

    // ===== Statistics =====

    /// Counts records of a kind in a status
    fn count_by_status(&self, kind: EntityKind, status: EntityStatus) -> StorageResult<u64>;

    /// Counts all records of a kind
    fn count_entities(&self, kind: EntityKind) -> StorageResult<u64>;

    /// Counts leaves stored for one child
    fn count_leaves_for_child(&self, child_external_id: &str) -> StorageResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_database_is_retryable() {
        let busy = StorageError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_retryable());

        let constraint = StorageError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        ));
        assert!(!constraint.is_retryable());
    }

    #[test]
    fn test_logic_errors_not_retryable() {
        let err = StorageError::InvalidTransition {
            kind: EntityKind::Child,
            from: EntityStatus::CrawledLeaf,
            to: EntityStatus::ToCrawl,
        };
        assert!(!err.is_retryable());
        assert!(!StorageError::LockPoisoned.is_retryable());
    }
}
