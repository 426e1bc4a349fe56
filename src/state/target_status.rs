use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a crawl target (a search keyword or an explicit seed id)
///
/// A target moves `to_crawl -> crawling -> crawled | error`. Only targets in
/// `to_crawl` are ever dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    ToCrawl,
    Crawling,
    Crawled,
    Error,
}

impl TargetStatus {
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::ToCrawl)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::ToCrawl => "to_crawl",
            Self::Crawling => "crawling",
            Self::Crawled => "crawled",
            Self::Error => "error",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "to_crawl" => Some(Self::ToCrawl),
            "crawling" => Some(Self::Crawling),
            "crawled" => Some(Self::Crawled),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn all_statuses() -> [Self; 4] {
        [Self::ToCrawl, Self::Crawling, Self::Crawled, Self::Error]
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
