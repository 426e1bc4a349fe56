//! Rate-limited credentials and their quota budgets
//!
//! - `CredentialPool`: in-memory, lock-free budget accounting shared by every worker
//! - `QuotaLedger`: per-run record of what each credential spent

mod ledger;
mod pool;

pub use ledger::QuotaLedger;
pub use pool::CredentialPool;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Whether a credential may still be handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialStatus {
    Active,
    Exhausted,
}

impl CredentialStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Exhausted => "exhausted",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "exhausted" => Some(Self::Exhausted),
            _ => None,
        }
    }
}

/// A point-in-time view of one credential
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub id: String,
    /// API key sent with each request
    pub secret: String,
    pub remaining_budget: i64,
    pub status: CredentialStatus,
    pub last_updated: DateTime<Utc>,
    /// Bumped by every stored daily reset
    pub generation: i64,
}

impl Credential {
    pub fn new(id: impl Into<String>, secret: impl Into<String>, budget: i64) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
            remaining_budget: budget.max(0),
            status: if budget > 0 {
                CredentialStatus::Active
            } else {
                CredentialStatus::Exhausted
            },
            last_updated: Utc::now(),
            generation: 0,
        }
    }

    /// Builds a credential whose id is a fingerprint of the secret
    ///
    /// The id is stable for a given key and safe to log.
    pub fn from_secret(secret: impl Into<String>, budget: i64) -> Self {
        let secret = secret.into();
        let digest = hex::encode(Sha256::digest(secret.as_bytes()));
        Self::new(format!("key-{}", &digest[..12]), secret, budget)
    }

    pub fn is_usable(&self) -> bool {
        self.status == CredentialStatus::Active && self.remaining_budget > 0
    }
}
