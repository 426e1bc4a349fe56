/// Entity status definitions for tracking crawl progress
///
/// Parents move `to_crawl -> crawled_parent -> crawled_children`, children
/// move `to_crawl -> crawled_detail -> crawled_leaf`. Either may drop into
/// `error`, which only an explicit reset takes back to `to_crawl`.
use crate::entity::EntityKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current crawl status of a parent or child entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    // ===== Shared =====
    /// Observed but not yet detailed
    ToCrawl,

    // ===== Parent States =====
    /// Detail fetched, children not yet listed
    CrawledParent,

    /// Child collection fully listed (possibly empty)
    CrawledChildren,

    // ===== Child States =====
    /// Detail fetched, leaves not yet fetched
    CrawledDetail,

    /// Leaves fully fetched (possibly none)
    CrawledLeaf,

    // ===== Terminal Error State =====
    /// Unrecoverable failure for this generation
    Error,
}

impl EntityStatus {
    /// Forward rank used to keep status monotonic
    ///
    /// Upserts never lower a stored rank; `error` ranks above everything so a
    /// rediscovered failing record stays failed until it is reset.
    pub fn rank(&self) -> i64 {
        match self {
            Self::ToCrawl => 0,
            Self::CrawledParent | Self::CrawledDetail => 1,
            Self::CrawledChildren | Self::CrawledLeaf => 2,
            Self::Error => 9,
        }
    }

    /// Returns true if this status is valid for the given entity kind
    pub fn applies_to(&self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::Parent => matches!(
                self,
                Self::ToCrawl | Self::CrawledParent | Self::CrawledChildren | Self::Error
            ),
            EntityKind::Child => matches!(
                self,
                Self::ToCrawl | Self::CrawledDetail | Self::CrawledLeaf | Self::Error
            ),
            EntityKind::Leaf => false,
        }
    }

    /// Returns true if moving from `self` to `to` goes forward
    pub fn can_advance_to(&self, to: EntityStatus) -> bool {
        to.rank() > self.rank()
    }

    /// Returns true if no stage will pick this record up again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CrawledChildren | Self::CrawledLeaf | Self::Error)
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::ToCrawl => "to_crawl",
            Self::CrawledParent => "crawled_parent",
            Self::CrawledChildren => "crawled_children",
            Self::CrawledDetail => "crawled_detail",
            Self::CrawledLeaf => "crawled_leaf",
            Self::Error => "error",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "to_crawl" => Some(Self::ToCrawl),
            "crawled_parent" => Some(Self::CrawledParent),
            "crawled_children" => Some(Self::CrawledChildren),
            "crawled_detail" => Some(Self::CrawledDetail),
            "crawled_leaf" => Some(Self::CrawledLeaf),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Returns every status valid for a kind, in pipeline order
    pub fn for_kind(kind: EntityKind) -> Vec<Self> {
        Self::all_statuses()
            .into_iter()
            .filter(|s| s.applies_to(kind))
            .collect()
    }

    /// Returns all possible statuses
    pub fn all_statuses() -> Vec<Self> {
        vec![
            Self::ToCrawl,
            Self::CrawledParent,
            Self::CrawledChildren,
            Self::CrawledDetail,
            Self::CrawledLeaf,
            Self::Error,
        ]
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
