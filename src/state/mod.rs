//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `EntityStatus`: Tracks parents and children through the pipeline (to_crawl, crawled_parent, crawled_leaf, etc.)
//! - `TargetStatus`: Tracks keywords and seed ids from dispatch to completion

mod entity_status;
mod target_status;

// Re-export main types
pub use entity_status::EntityStatus;
pub use target_status::TargetStatus;
