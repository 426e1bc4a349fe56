//! Quota-Harvest: a quota-aware crawler for rate-limited content APIs
//!
//! This crate rotates across many rate-limited credentials without exceeding
//! their budgets, drives channels, videos and comments through a resumable
//! status machine, and fans work out across a bounded worker pool or a
//! message queue consumer.

pub mod config;
pub mod crawler;
pub mod credentials;
pub mod entity;
pub mod output;
pub mod queue;
pub mod retry;
pub mod source;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Quota-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Source error: {0}")]
    Source(#[from] source::SourceError),

    #[error("Invalid record: {0}")]
    Validation(#[from] entity::ValidationError),

    /// No credential has budget left for the pending call
    #[error("All credentials exhausted while calling {operation}")]
    CredentialsExhausted { operation: &'static str },

    /// A stage gave up after its retries ran out
    #[error("Stage {stage} failed: {message}")]
    StageFailure { stage: &'static str, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error("Worker panicked while processing partition {partition}")]
    WorkerPanicked { partition: usize },

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    /// Returns true when the failure should leave the owning target in `error`
    /// and be retried on a later pass rather than dropped
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Self::CredentialsExhausted { .. }
                | Self::StageFailure { .. }
                | Self::Storage(_)
                | Self::WorkerPanicked { .. }
        )
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Quota-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Orchestrator, RunReport, WorkerPool};
pub use credentials::{Credential, CredentialPool, QuotaLedger};
pub use entity::{ChildEntity, EntityKind, LeafEntity, ParentEntity};
pub use state::{EntityStatus, TargetStatus};
