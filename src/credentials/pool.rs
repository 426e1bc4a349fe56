use crate::credentials::{Credential, CredentialStatus};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Per-credential accounting slot
///
/// `remaining` only ever changes through a compare-and-swap, so two workers
/// charging the same credential can never spend more than it holds.
struct Slot {
    id: String,
    secret: String,
    remaining: AtomicI64,
    exhausted: AtomicBool,
    /// Logical clock tick of the last hand-out, lower is older
    last_used: AtomicU64,
    generation: AtomicI64,
    last_updated: Mutex<DateTime<Utc>>,
}

impl Slot {
    fn from_credential(credential: &Credential, tick: u64) -> Self {
        let exhausted =
            credential.status == CredentialStatus::Exhausted || credential.remaining_budget <= 0;
        Self {
            id: credential.id.clone(),
            secret: credential.secret.clone(),
            remaining: AtomicI64::new(credential.remaining_budget.max(0)),
            exhausted: AtomicBool::new(exhausted),
            last_used: AtomicU64::new(tick),
            generation: AtomicI64::new(credential.generation),
            last_updated: Mutex::new(credential.last_updated),
        }
    }

    fn is_usable(&self, min_budget: i64) -> bool {
        !self.exhausted.load(Ordering::Acquire)
            && self.remaining.load(Ordering::Acquire) >= min_budget.max(1)
    }

    fn touch(&self) {
        if let Ok(mut stamp) = self.last_updated.lock() {
            *stamp = Utc::now();
        }
    }

    fn snapshot(&self) -> Credential {
        let remaining = self.remaining.load(Ordering::Acquire);
        let status = if self.exhausted.load(Ordering::Acquire) || remaining <= 0 {
            CredentialStatus::Exhausted
        } else {
            CredentialStatus::Active
        };
        let last_updated = self
            .last_updated
            .lock()
            .map(|stamp| *stamp)
            .unwrap_or_else(|poisoned| *poisoned.into_inner());
        Credential {
            id: self.id.clone(),
            secret: self.secret.clone(),
            remaining_budget: remaining,
            status,
            last_updated,
            generation: self.generation.load(Ordering::Acquire),
        }
    }
}

/// Shared pool of rate-limited credentials
///
/// Constructed once at process start and passed by reference to every
/// worker. All operations take `&self`.
pub struct CredentialPool {
    slots: Vec<Slot>,
    clock: AtomicU64,
}

impl CredentialPool {
    /// Builds a pool from stored credentials
    ///
    /// Credentials updated longest ago are handed out first.
    pub fn from_records(mut records: Vec<Credential>) -> Self {
        records.sort_by(|a, b| a.last_updated.cmp(&b.last_updated));
        let slots: Vec<Slot> = records
            .iter()
            .enumerate()
            .map(|(tick, credential)| Slot::from_credential(credential, tick as u64))
            .collect();
        let clock = AtomicU64::new(slots.len() as u64);
        Self { slots, clock }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the least-recently-used active credential with budget left
    pub fn acquire(&self) -> Option<Credential> {
        self.acquire_with(1)
    }

    /// Returns the least-recently-used active credential holding at least `min_budget`
    ///
    /// Acquiring does not reserve budget; callers must still `charge`, which
    /// may fail if another worker got there first.
    pub fn acquire_with(&self, min_budget: i64) -> Option<Credential> {
        let slot = self
            .slots
            .iter()
            .filter(|slot| slot.is_usable(min_budget))
            .min_by_key(|slot| slot.last_used.load(Ordering::Acquire))?;

        let tick = self.clock.fetch_add(1, Ordering::AcqRel) + 1;
        slot.last_used.store(tick, Ordering::Release);
        debug!(credential = %slot.id, min_budget, "Acquired credential");
        Some(slot.snapshot())
    }

    /// Atomically takes `cost` from a credential's budget
    ///
    /// # Returns
    ///
    /// * `true` - Budget was decremented; the credential flips to exhausted if it hit zero
    /// * `false` - Unknown id, exhausted credential, negative cost, or `cost` above the
    ///   remaining budget. Nothing changes.
    pub fn charge(&self, credential_id: &str, cost: i64) -> bool {
        if cost < 0 {
            return false;
        }
        let Some(slot) = self.find(credential_id) else {
            warn!(credential = credential_id, "Charge against unknown credential");
            return false;
        };
        if slot.exhausted.load(Ordering::Acquire) {
            return false;
        }

        let charged = slot
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                (remaining >= cost).then(|| remaining - cost)
            });

        match charged {
            Ok(previous) => {
                slot.touch();
                if previous - cost == 0 {
                    slot.exhausted.store(true, Ordering::Release);
                    info!(credential = credential_id, "Credential budget spent");
                }
                true
            }
            Err(remaining) => {
                debug!(credential = credential_id, cost, remaining, "Charge rejected");
                false
            }
        }
    }

    /// Forces a credential to exhausted after the remote side reported it over budget
    pub fn mark_exhausted(&self, credential_id: &str) {
        match self.find(credential_id) {
            Some(slot) => {
                if !slot.exhausted.swap(true, Ordering::AcqRel) {
                    slot.touch();
                    warn!(
                        credential = credential_id,
                        remaining = slot.remaining.load(Ordering::Acquire),
                        "Credential marked exhausted"
                    );
                }
            }
            None => warn!(credential = credential_id, "Cannot mark unknown credential exhausted"),
        }
    }

    /// Restores every credential to active with `new_budget`
    pub fn reset_all(&self, new_budget: i64) {
        let budget = new_budget.max(0);
        for slot in &self.slots {
            slot.remaining.store(budget, Ordering::Release);
            slot.exhausted.store(budget == 0, Ordering::Release);
            slot.touch();
        }
        info!(credentials = self.slots.len(), budget, "Credential budgets reset");
    }

    /// Adopts stored credentials that were reset after this pool loaded them
    ///
    /// A stored row with a newer generation replaces the in-memory budget and
    /// status. Rows for unknown ids are ignored until the next restart.
    ///
    /// # Returns
    ///
    /// The number of credentials refreshed
    pub fn refresh(&self, records: &[Credential]) -> usize {
        let mut refreshed = 0;
        for record in records {
            let Some(slot) = self.find(&record.id) else {
                debug!(credential = %record.id, "Ignoring credential added after start");
                continue;
            };
            let known = slot.generation.load(Ordering::Acquire);
            if record.generation > known
                && slot
                    .generation
                    .compare_exchange(known, record.generation, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                slot.remaining
                    .store(record.remaining_budget.max(0), Ordering::Release);
                slot.exhausted.store(!record.is_usable(), Ordering::Release);
                slot.touch();
                refreshed += 1;
            }
        }
        if refreshed > 0 {
            info!(refreshed, "Adopted reset credential budgets");
        }
        refreshed
    }

    pub fn remaining(&self, credential_id: &str) -> Option<i64> {
        self.find(credential_id)
            .map(|slot| slot.remaining.load(Ordering::Acquire))
    }

    pub fn total_remaining(&self) -> i64 {
        self.slots
            .iter()
            .map(|slot| slot.remaining.load(Ordering::Acquire))
            .sum()
    }

    /// Current view of every credential, for persistence and reporting
    pub fn snapshot(&self) -> Vec<Credential> {
        self.slots.iter().map(Slot::snapshot).collect()
    }

    fn find(&self, credential_id: &str) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.id == credential_id)
    }
}
