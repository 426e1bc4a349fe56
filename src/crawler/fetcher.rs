//! Quota-aware source calls
//!
//! Every remote call made by a stage goes through [`call_source`], which:
//! - acquires the least-recently-used credential that can afford the call
//! - charges the credential before each attempt
//! - retries transient failures with the configured backoff
//! - on a budget-exceeded signal, marks the credential exhausted and repeats
//!   the same request (same cursor) with the next credential
//! - reconciles calls that cost more than their up-front price

use crate::config::CrawlerConfig;
use crate::credentials::{Credential, CredentialPool};
use crate::crawler::RunReport;
use crate::retry::{IsRetryable, RetryPolicy};
use crate::source::{Page, SourceClient, SourceError, SourceOp, SourceResult};
use crate::storage::{Storage, StorageResult};
use crate::{HarvestError, Result};
use std::fmt;

/// Everything a stage needs, passed by reference from the orchestrator
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub store: &'a dyn Storage,
    pub pool: &'a CredentialPool,
    pub source: &'a dyn SourceClient,
    pub retry: &'a RetryPolicy,
    pub settings: &'a CrawlerConfig,
}

impl<'a> StageContext<'a> {
    /// Runs a storage operation under the retry policy
    pub(crate) fn write<T, F>(&self, label: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> StorageResult<T>,
    {
        Ok(self.retry.run(label, operation)?)
    }
}

/// Outcome of a single attempt with one credential
#[derive(Debug)]
enum Attempt {
    /// Another worker spent the budget between acquire and charge
    Outbid,
    Source(SourceError),
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbid => f.write_str("credential budget taken by another worker"),
            Self::Source(e) => write!(f, "{}", e),
        }
    }
}

impl IsRetryable for Attempt {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Outbid => false,
            Self::Source(e) => e.is_retryable(),
        }
    }
}

/// Makes one logical source call, rotating credentials as needed
///
/// # Arguments
///
/// * `ctx` - Stage context holding the pool, source and retry policy
/// * `report` - Receives the quota spent, per credential
/// * `stage` - Stage name, used for `StageFailure`
/// * `op` - Operation being called, sets the up-front price
/// * `call` - Performs the call with the given credential
///
/// # Returns
///
/// * `Ok(Page)` - The call succeeded
/// * `Err(CredentialsExhausted)` - No credential can afford the call
/// * `Err(StageFailure)` - Transient failures outlasted the retry policy
/// * `Err(Source(_))` - NotFound or Malformed, for the caller to classify
pub(crate) fn call_source<T, F>(
    ctx: &StageContext<'_>,
    report: &mut RunReport,
    stage: &'static str,
    op: SourceOp,
    mut call: F,
) -> Result<Page<T>>
where
    F: FnMut(&Credential) -> SourceResult<Page<T>>,
{
    let price = op.cost();

    loop {
        let credential = ctx
            .pool
            .acquire_with(price)
            .ok_or(HarvestError::CredentialsExhausted {
                operation: op.name(),
            })?;

        let outcome = ctx.retry.run(op.name(), || {
            if !ctx.pool.charge(&credential.id, price) {
                return Err(Attempt::Outbid);
            }
            report.quota.add(&credential.id, price);
            call(&credential).map_err(Attempt::Source)
        });

        match outcome {
            Ok(page) => {
                let extra = page.cost - price;
                if extra > 0 {
                    report.quota.add(&credential.id, extra);
                    if !ctx.pool.charge(&credential.id, extra) {
                        // The remote side already spent it; stop handing this one out
                        ctx.pool.mark_exhausted(&credential.id);
                    }
                }
                return Ok(page);
            }
            Err(Attempt::Outbid) => {
                tracing::debug!(call = %op, credential = %credential.id, "Charge lost, rotating");
            }
            Err(Attempt::Source(SourceError::BudgetExceeded { reason })) => {
                tracing::warn!(
                    call = %op,
                    credential = %credential.id,
                    reason = %reason,
                    "Source reported budget exceeded, rotating credential"
                );
                ctx.pool.mark_exhausted(&credential.id);
            }
            Err(Attempt::Source(e @ SourceError::Transient(_))) => {
                return Err(HarvestError::StageFailure {
                    stage,
                    message: format!("{} failed: {}", op, e),
                });
            }
            Err(Attempt::Source(e)) => return Err(e.into()),
        }
    }
}
