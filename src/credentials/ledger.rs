use std::collections::BTreeMap;

/// Quota spent per credential during one unit of work or run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaLedger {
    spent: BTreeMap<String, i64>,
}

impl QuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, credential_id: &str, cost: i64) {
        if cost == 0 {
            return;
        }
        *self.spent.entry(credential_id.to_string()).or_insert(0) += cost;
    }

    /// Folds another ledger into this one
    pub fn absorb(&mut self, other: &QuotaLedger) {
        for (credential_id, cost) in &other.spent {
            self.add(credential_id, *cost);
        }
    }

    pub fn spent_by(&self, credential_id: &str) -> i64 {
        self.spent.get(credential_id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> i64 {
        self.spent.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.spent.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.spent.iter().map(|(id, cost)| (id.as_str(), *cost))
    }
}
