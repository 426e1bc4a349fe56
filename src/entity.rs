//! Entity records flowing between pipeline stages
//!
//! The crawl produces a three-level hierarchy: parents (channels), children
//! (videos) and leaves (comments and replies). Each record carries its
//! required identifiers as plain fields and every other attribute as an
//! `Option`, so a partially observed record can be merged into a stored one
//! without overwriting known values.

use crate::state::EntityStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The three entity tables the pipeline writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Parent,
    Child,
    Leaf,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Child => "child",
            Self::Leaf => "leaf",
        }
    }

    /// Leaves are terminal and carry no status column
    pub fn has_status(&self) -> bool {
        !matches!(self, Self::Leaf)
    }

    pub fn all() -> [Self; 3] {
        [Self::Parent, Self::Child, Self::Leaf]
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a record reaches the store without its required fields
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{kind} record is missing required field `{field}`")]
    MissingField {
        kind: EntityKind,
        field: &'static str,
    },

    #[error("{kind} record {external_id} carries status {status} which does not apply to it")]
    StatusMismatch {
        kind: EntityKind,
        external_id: String,
        status: EntityStatus,
    },
}

/// Common surface for the three record types
pub trait Entity {
    const KIND: EntityKind;

    fn external_id(&self) -> &str;

    /// Checks required fields before the record is written
    fn validate(&self) -> Result<(), ValidationError>;
}

fn require(kind: EntityKind, field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField { kind, field });
    }
    Ok(())
}

fn check_status(
    kind: EntityKind,
    external_id: &str,
    status: EntityStatus,
) -> Result<(), ValidationError> {
    if !status.applies_to(kind) {
        return Err(ValidationError::StatusMismatch {
            kind,
            external_id: external_id.to_string(),
            status,
        });
    }
    Ok(())
}

/// A channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentEntity {
    pub external_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub custom_url: Option<String>,
    /// Unix seconds
    pub published_at: Option<i64>,
    pub country: Option<String>,
    pub subscriber_count: Option<i64>,
    pub video_count: Option<i64>,
    pub view_count: Option<i64>,
    pub topics: Option<Vec<String>>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
    /// Uploads collection, paginated by the expand stage
    pub collection_id: Option<String>,
    pub status: EntityStatus,
}

impl ParentEntity {
    /// A bare record as seen in search results
    pub fn discovered(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            title: None,
            description: None,
            custom_url: None,
            published_at: None,
            country: None,
            subscriber_count: None,
            video_count: None,
            view_count: None,
            topics: None,
            email: None,
            avatar_url: None,
            banner_url: None,
            collection_id: None,
            status: EntityStatus::ToCrawl,
        }
    }
}

impl Entity for ParentEntity {
    const KIND: EntityKind = EntityKind::Parent;

    fn external_id(&self) -> &str {
        &self.external_id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require(Self::KIND, "external_id", &self.external_id)?;
        check_status(Self::KIND, &self.external_id, self.status)
    }
}

/// A video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildEntity {
    pub external_id: String,
    pub parent_external_id: String,
    pub collection_id: Option<String>,
    pub position: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<i64>,
    pub thumbnail_url: Option<String>,
    pub view_count: Option<i64>,
    pub like_count: Option<i64>,
    pub comment_count: Option<i64>,
    pub duration: Option<String>,
    pub tags: Option<Vec<String>>,
    pub category_id: Option<String>,
    pub privacy_status: Option<String>,
    pub made_for_kids: Option<bool>,
    pub status: EntityStatus,
}

impl ChildEntity {
    pub fn discovered(external_id: impl Into<String>, parent_external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            parent_external_id: parent_external_id.into(),
            collection_id: None,
            position: None,
            title: None,
            description: None,
            published_at: None,
            thumbnail_url: None,
            view_count: None,
            like_count: None,
            comment_count: None,
            duration: None,
            tags: None,
            category_id: None,
            privacy_status: None,
            made_for_kids: None,
            status: EntityStatus::ToCrawl,
        }
    }
}

impl Entity for ChildEntity {
    const KIND: EntityKind = EntityKind::Child;

    fn external_id(&self) -> &str {
        &self.external_id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require(Self::KIND, "external_id", &self.external_id)?;
        require(Self::KIND, "parent_external_id", &self.parent_external_id)?;
        check_status(Self::KIND, &self.external_id, self.status)
    }
}

/// A comment, or a reply when `parent_leaf_id` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafEntity {
    pub external_id: String,
    pub child_external_id: String,
    pub parent_leaf_id: Option<String>,
    pub author_name: Option<String>,
    pub author_channel_id: Option<String>,
    pub text: Option<String>,
    pub like_count: Option<i64>,
    pub published_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub reply_count: Option<i64>,
}

impl LeafEntity {
    pub fn new(external_id: impl Into<String>, child_external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            child_external_id: child_external_id.into(),
            parent_leaf_id: None,
            author_name: None,
            author_channel_id: None,
            text: None,
            like_count: None,
            published_at: None,
            updated_at: None,
            reply_count: None,
        }
    }

    pub fn is_reply(&self) -> bool {
        self.parent_leaf_id.is_some()
    }
}

impl Entity for LeafEntity {
    const KIND: EntityKind = EntityKind::Leaf;

    fn external_id(&self) -> &str {
        &self.external_id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require(Self::KIND, "external_id", &self.external_id)?;
        require(Self::KIND, "child_external_id", &self.child_external_id)
    }
}

/// A top-level leaf with the replies the source returned inline
#[derive(Debug, Clone, PartialEq)]
pub struct LeafThread {
    pub top: LeafEntity,
    pub replies: Vec<LeafEntity>,
}

impl LeafThread {
    /// True when the source reported more replies than it inlined
    pub fn has_more_replies(&self) -> bool {
        self.top
            .reply_count
            .map(|total| total > self.replies.len() as i64)
            .unwrap_or(false)
    }
}
