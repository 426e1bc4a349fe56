//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Idempotent bulk upserts of parents, children and leaves
//! - Status-conditioned advances that keep the pipeline resumable
//! - Crawl target claiming
//! - Credential budgets and quota usage history
//! - Run tracking

mod records;
mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::TargetStatus;
use crate::HarvestError;

use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(HarvestError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, HarvestError> {
    SqliteStorage::new(path)
}

/// Result of one `upsert_*` batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted_count: usize,
    /// Existing records where at least one stored value changed
    pub updated_count: usize,
    pub inserted_ids: Vec<String>,
    /// Records refused at the store boundary, with the reason
    pub rejected: Vec<RejectedRecord>,
}

impl UpsertOutcome {
    pub fn absorb(&mut self, other: UpsertOutcome) {
        self.inserted_count += other.inserted_count;
        self.updated_count += other.updated_count;
        self.inserted_ids.extend(other.inserted_ids);
        self.rejected.extend(other.rejected);
    }

    /// Number of records written or confirmed by the batch
    pub fn accepted(&self, submitted: usize) -> usize {
        submitted.saturating_sub(self.rejected.len())
    }
}

/// A record that failed validation and was not written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub external_id: String,
    pub reason: String,
}

/// Represents a crawl target (keyword or seed id) in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRecord {
    pub key: String,
    pub status: TargetStatus,
    pub error_message: Option<String>,
    pub created_at: String,
    pub last_updated: String,
}

/// Represents a CLI run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub command: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
