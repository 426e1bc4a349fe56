//! Aggregate counts for a unit of work or a whole run

use crate::credentials::QuotaLedger;
use crate::entity::EntityKind;
use std::fmt;

/// A record-level failure that did not abort its unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityError {
    pub kind: EntityKind,
    pub external_id: String,
    pub message: String,
    /// The failure was transient and the record was left for another attempt
    pub retryable: bool,
}

impl fmt::Display for EntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.external_id, self.message)
    }
}

/// What a unit of work (or several, summed) accomplished
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Distinct records returned by keyword searches
    pub discovered: usize,
    /// Parents whose detail was fetched
    pub parents: usize,
    /// Parents whose child collection was fully listed
    pub expanded: usize,
    /// Children whose detail was fetched
    pub children: usize,
    /// Distinct leaves written
    pub leaves: usize,
    /// Records stored for the first time, any kind
    pub inserted: usize,
    /// Quota spent per credential
    pub quota: QuotaLedger,
    pub entity_errors: Vec<EntityError>,
}

impl RunReport {
    pub fn absorb(&mut self, other: RunReport) {
        self.discovered += other.discovered;
        self.parents += other.parents;
        self.expanded += other.expanded;
        self.children += other.children;
        self.leaves += other.leaves;
        self.inserted += other.inserted;
        self.quota.absorb(&other.quota);
        self.entity_errors.extend(other.entity_errors);
    }

    /// True if some record failed in a way a redelivery may fix
    pub fn has_retryable_errors(&self) -> bool {
        self.entity_errors.iter().any(|e| e.retryable)
    }

    pub(crate) fn entity_error(
        &mut self,
        kind: EntityKind,
        external_id: &str,
        message: impl Into<String>,
        retryable: bool,
    ) {
        let error = EntityError {
            kind,
            external_id: external_id.to_string(),
            message: message.into(),
            retryable,
        };
        tracing::warn!(
            kind = %kind,
            external_id,
            message = %error.message,
            retryable,
            "Entity error"
        );
        self.entity_errors.push(error);
    }

    /// Logs the report as one structured line
    pub fn log_summary(&self, unit: &str) {
        tracing::info!(
            unit,
            discovered = self.discovered,
            parents = self.parents,
            expanded = self.expanded,
            children = self.children,
            leaves = self.leaves,
            inserted = self.inserted,
            quota = self.quota.total(),
            entity_errors = self.entity_errors.len(),
            "Unit of work finished"
        );
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Discovered:      {}", self.discovered)?;
        writeln!(f, "Parents:         {}", self.parents)?;
        writeln!(f, "Expanded:        {}", self.expanded)?;
        writeln!(f, "Children:        {}", self.children)?;
        writeln!(f, "Leaves:          {}", self.leaves)?;
        writeln!(f, "New records:     {}", self.inserted)?;
        writeln!(f, "Quota spent:     {}", self.quota.total())?;
        for (credential, cost) in self.quota.iter() {
            writeln!(f, "  {:<14} {}", credential, cost)?;
        }
        write!(f, "Entity errors:   {}", self.entity_errors.len())?;
        for error in &self.entity_errors {
            write!(f, "\n  {}", error)?;
        }
        Ok(())
    }
}
