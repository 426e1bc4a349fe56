//! Remote content source
//!
//! This module defines the boundary between the pipeline and the
//! quota-limited API it crawls:
//! - `SourceClient`: the blocking calls every stage makes
//! - `SourceError`: the failure classes the pipeline reacts to
//! - `YouTubeClient`: the HTTP implementation
//! - `ScriptedSource`: an in-memory implementation with fault injection
//! - `locator`: parsing of URL-like locators into ids

pub mod locator;
mod scripted;
mod youtube;

pub use locator::{parse_locator, Locator};
pub use scripted::{ScriptedSource, SourceCall};
pub use youtube::YouTubeClient;

use crate::credentials::Credential;
use crate::entity::{ChildEntity, LeafEntity, LeafThread, ParentEntity};
use crate::retry::IsRetryable;
use std::fmt;
use thiserror::Error;

/// Maximum results the API returns per search page
pub const SEARCH_PAGE_SIZE: usize = 50;

/// Errors a source call can raise
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// The credential used for the call is over its remote budget
    #[error("Budget exceeded: {reason}")]
    BudgetExceeded { reason: String },

    /// The requested record is gone, private, or has leaves disabled
    #[error("Not found: {0}")]
    NotFound(String),

    /// Timeouts, resets and server errors
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The request or the response could not be interpreted
    #[error("Malformed: {0}")]
    Malformed(String),
}

impl IsRetryable for SourceError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result type for source calls
pub type SourceResult<T> = Result<T, SourceError>;

/// One page of results together with what it cost
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Quota units the call consumed
    pub cost: i64,
    /// Cursor for the next page, `None` once the listing is exhausted
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// A final page
    pub fn last(items: Vec<T>, cost: i64) -> Self {
        Self {
            items,
            cost,
            next_cursor: None,
        }
    }

    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// A record returned by a keyword search
#[derive(Debug, Clone, PartialEq)]
pub enum SearchHit {
    Parent(ParentEntity),
    Child(ChildEntity),
}

/// The kinds of remote call, used for pricing and log fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceOp {
    Search,
    ParentDetails,
    ChildDetails,
    ExpandPage,
    LeafPage,
    SubLeafPage,
    ResolveParent,
}

impl SourceOp {
    /// Quota units charged before the call is made
    pub fn cost(&self) -> i64 {
        match self {
            Self::Search => 100,
            _ => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::ParentDetails => "parent_details",
            Self::ChildDetails => "child_details",
            Self::ExpandPage => "expand_page",
            Self::LeafPage => "leaf_page",
            Self::SubLeafPage => "sub_leaf_page",
            Self::ResolveParent => "resolve_parent",
        }
    }
}

impl fmt::Display for SourceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Blocking client for the remote content API
///
/// Every call is made with the credential the pipeline acquired for it and
/// reports its own cost. Implementations must be shareable across workers.
pub trait SourceClient: Send + Sync {
    /// Searches for parents and children matching a keyword
    ///
    /// # Arguments
    ///
    /// * `credential` - Credential to authenticate the call with
    /// * `keyword` - Search terms
    /// * `cursor` - Cursor returned by the previous page, `None` for the first
    /// * `page_size` - Results to request, at most `SEARCH_PAGE_SIZE`
    fn search(
        &self,
        credential: &Credential,
        keyword: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> SourceResult<Page<SearchHit>>;

    /// Fetches full parent records; ids the source does not know are omitted
    fn parent_details(
        &self,
        credential: &Credential,
        external_ids: &[String],
    ) -> SourceResult<Page<ParentEntity>>;

    /// Fetches full child records; ids the source does not know are omitted
    fn child_details(
        &self,
        credential: &Credential,
        external_ids: &[String],
    ) -> SourceResult<Page<ChildEntity>>;

    /// Lists one page of a parent's child collection
    fn expand_page(
        &self,
        credential: &Credential,
        collection_id: &str,
        cursor: Option<&str>,
    ) -> SourceResult<Page<ChildEntity>>;

    /// Lists one page of leaf threads for a child
    fn leaf_page(
        &self,
        credential: &Credential,
        child_external_id: &str,
        cursor: Option<&str>,
    ) -> SourceResult<Page<LeafThread>>;

    /// Lists one page of replies under a leaf
    fn sub_leaf_page(
        &self,
        credential: &Credential,
        parent_leaf_id: &str,
        cursor: Option<&str>,
    ) -> SourceResult<Page<LeafEntity>>;

    /// Resolves an alternate key (handle, custom name) to a parent id
    ///
    /// The returned page holds exactly one id on success.
    fn resolve_parent(&self, credential: &Credential, alternate_key: &str)
        -> SourceResult<Page<String>>;
}
