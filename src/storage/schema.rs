//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Quota-Harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track CLI runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    command TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Keywords and seed ids
CREATE TABLE IF NOT EXISTS targets (
    key TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    error_message TEXT,
    created_at TEXT NOT NULL,
    last_updated TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_targets_status ON targets(status);

-- Channels
CREATE TABLE IF NOT EXISTS parents (
    external_id TEXT PRIMARY KEY,
    title TEXT,
    description TEXT,
    custom_url TEXT,
    published_at INTEGER,
    country TEXT,
    subscriber_count INTEGER,
    video_count INTEGER,
    view_count INTEGER,
    topics TEXT,
    email TEXT,
    avatar_url TEXT,
    banner_url TEXT,
    collection_id TEXT,
    status TEXT NOT NULL,
    status_rank INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_parents_status ON parents(status);

-- Videos
CREATE TABLE IF NOT EXISTS children (
    external_id TEXT PRIMARY KEY,
    parent_external_id TEXT NOT NULL,
    collection_id TEXT,
    position INTEGER,
    title TEXT,
    description TEXT,
    published_at INTEGER,
    thumbnail_url TEXT,
    view_count INTEGER,
    like_count INTEGER,
    comment_count INTEGER,
    duration TEXT,
    tags TEXT,
    category_id TEXT,
    privacy_status TEXT,
    made_for_kids INTEGER,
    status TEXT NOT NULL,
    status_rank INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_children_status ON children(status);
CREATE INDEX IF NOT EXISTS idx_children_parent ON children(parent_external_id);

-- Comments and replies
CREATE TABLE IF NOT EXISTS leaves (
    external_id TEXT PRIMARY KEY,
    child_external_id TEXT NOT NULL,
    parent_leaf_id TEXT,
    author_name TEXT,
    author_channel_id TEXT,
    text TEXT,
    like_count INTEGER,
    published_at INTEGER,
    updated_at INTEGER,
    reply_count INTEGER,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_leaves_child ON leaves(child_external_id);

-- API credentials and their remaining budget
CREATE TABLE IF NOT EXISTS credentials (
    id TEXT PRIMARY KEY,
    secret TEXT NOT NULL,
    remaining_budget INTEGER NOT NULL,
    status TEXT NOT NULL,
    generation INTEGER NOT NULL DEFAULT 0,
    last_updated TEXT NOT NULL
);

-- Quota spent per credential per unit of work
CREATE TABLE IF NOT EXISTS quota_usage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    credential_id TEXT NOT NULL,
    unit TEXT NOT NULL,
    cost INTEGER NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_quota_usage_credential ON quota_usage(credential_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
