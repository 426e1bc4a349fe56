//! Mapping between entity records and table rows
//!
//! Each entity type declares its table and the columns merged on conflict.
//! Column order here is the bind order used by the generated statements.

use crate::entity::{ChildEntity, Entity, LeafEntity, ParentEntity};
use crate::state::EntityStatus;
use crate::storage::StorageResult;
use rusqlite::types::{Type, Value};
use rusqlite::Row;

pub(crate) trait SqlRecord: Entity + Sized {
    const TABLE: &'static str;

    /// Columns after `external_id`, excluding status and bookkeeping
    const COLUMNS: &'static [&'static str];

    /// Values for `COLUMNS`, same order
    fn values(&self) -> StorageResult<Vec<Value>>;

    fn status(&self) -> Option<EntityStatus>;

    /// Builds a record from `SELECT external_id, COLUMNS..[, status]`
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

fn text(value: &Option<String>) -> Value {
    value.clone().map(Value::Text).unwrap_or(Value::Null)
}

fn int(value: Option<i64>) -> Value {
    value.map(Value::Integer).unwrap_or(Value::Null)
}

fn flag(value: Option<bool>) -> Value {
    value
        .map(|b| Value::Integer(i64::from(b)))
        .unwrap_or(Value::Null)
}

fn list(value: &Option<Vec<String>>) -> StorageResult<Value> {
    Ok(match value {
        Some(items) => Value::Text(serde_json::to_string(items)?),
        None => Value::Null,
    })
}

fn read_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Vec<String>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|json| {
        serde_json::from_str(&json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn read_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<EntityStatus> {
    let raw: String = row.get(idx)?;
    EntityStatus::from_db_string(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown status '{}'", raw).into(),
        )
    })
}

impl SqlRecord for ParentEntity {
    const TABLE: &'static str = "parents";
    const COLUMNS: &'static [&'static str] = &[
        "title",
        "description",
        "custom_url",
        "published_at",
        "country",
        "subscriber_count",
        "video_count",
        "view_count",
        "topics",
        "email",
        "avatar_url",
        "banner_url",
        "collection_id",
    ];

    fn values(&self) -> StorageResult<Vec<Value>> {
        Ok(vec![
            text(&self.title),
            text(&self.description),
            text(&self.custom_url),
            int(self.published_at),
            text(&self.country),
            int(self.subscriber_count),
            int(self.video_count),
            int(self.view_count),
            list(&self.topics)?,
            text(&self.email),
            text(&self.avatar_url),
            text(&self.banner_url),
            text(&self.collection_id),
        ])
    }

    fn status(&self) -> Option<EntityStatus> {
        Some(self.status)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            external_id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            custom_url: row.get(3)?,
            published_at: row.get(4)?,
            country: row.get(5)?,
            subscriber_count: row.get(6)?,
            video_count: row.get(7)?,
            view_count: row.get(8)?,
            topics: read_list(row, 9)?,
            email: row.get(10)?,
            avatar_url: row.get(11)?,
            banner_url: row.get(12)?,
            collection_id: row.get(13)?,
            status: read_status(row, 14)?,
        })
    }
}

impl SqlRecord for ChildEntity {
    const TABLE: &'static str = "children";
    const COLUMNS: &'static [&'static str] = &[
        "parent_external_id",
        "collection_id",
        "position",
        "title",
        "description",
        "published_at",
        "thumbnail_url",
        "view_count",
        "like_count",
        "comment_count",
        "duration",
        "tags",
        "category_id",
        "privacy_status",
        "made_for_kids",
    ];

    fn values(&self) -> StorageResult<Vec<Value>> {
        Ok(vec![
            Value::Text(self.parent_external_id.clone()),
            text(&self.collection_id),
            int(self.position),
            text(&self.title),
            text(&self.description),
            int(self.published_at),
            text(&self.thumbnail_url),
            int(self.view_count),
            int(self.like_count),
            int(self.comment_count),
            text(&self.duration),
            list(&self.tags)?,
            text(&self.category_id),
            text(&self.privacy_status),
            flag(self.made_for_kids),
        ])
    }

    fn status(&self) -> Option<EntityStatus> {
        Some(self.status)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            external_id: row.get(0)?,
            parent_external_id: row.get(1)?,
            collection_id: row.get(2)?,
            position: row.get(3)?,
            title: row.get(4)?,
            description: row.get(5)?,
            published_at: row.get(6)?,
            thumbnail_url: row.get(7)?,
            view_count: row.get(8)?,
            like_count: row.get(9)?,
            comment_count: row.get(10)?,
            duration: row.get(11)?,
            tags: read_list(row, 12)?,
            category_id: row.get(13)?,
            privacy_status: row.get(14)?,
            made_for_kids: row.get(15)?,
            status: read_status(row, 16)?,
        })
    }
}

impl SqlRecord for LeafEntity {
    const TABLE: &'static str = "leaves";
    const COLUMNS: &'static [&'static str] = &[
        "child_external_id",
        "parent_leaf_id",
        "author_name",
        "author_channel_id",
        "text",
        "like_count",
        "published_at",
        "updated_at",
        "reply_count",
    ];

    fn values(&self) -> StorageResult<Vec<Value>> {
        Ok(vec![
            Value::Text(self.child_external_id.clone()),
            text(&self.parent_leaf_id),
            text(&self.author_name),
            text(&self.author_channel_id),
            text(&self.text),
            int(self.like_count),
            int(self.published_at),
            int(self.updated_at),
            int(self.reply_count),
        ])
    }

    fn status(&self) -> Option<EntityStatus> {
        None
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            external_id: row.get(0)?,
            child_external_id: row.get(1)?,
            parent_leaf_id: row.get(2)?,
            author_name: row.get(3)?,
            author_channel_id: row.get(4)?,
            text: row.get(5)?,
            like_count: row.get(6)?,
            published_at: row.get(7)?,
            updated_at: row.get(8)?,
            reply_count: row.get(9)?,
        })
    }
}

/// `SELECT` list matching `from_row`
pub(crate) fn select_columns<R: SqlRecord>() -> String {
    let mut columns = vec!["external_id"];
    columns.extend_from_slice(R::COLUMNS);
    if R::KIND.has_status() {
        columns.push("status");
    }
    columns.join(", ")
}

/// Builds the merge-on-conflict statement for a record type
///
/// Bind order: `external_id`, `COLUMNS..`, then `status, status_rank` for
/// kinds with a status, then the timestamp used for both bookkeeping columns.
/// The `WHERE` on the update arm makes no-op merges report zero changes.
pub(crate) fn upsert_sql<R: SqlRecord>() -> String {
    let table = R::TABLE;
    let with_status = R::KIND.has_status();

    let mut insert_columns = vec!["external_id".to_string()];
    insert_columns.extend(R::COLUMNS.iter().map(|c| c.to_string()));
    if with_status {
        insert_columns.push("status".to_string());
        insert_columns.push("status_rank".to_string());
    }
    let stamp_param = insert_columns.len() + 1;
    let mut placeholders: Vec<String> = (1..stamp_param).map(|i| format!("?{}", i)).collect();
    insert_columns.push("created_at".to_string());
    insert_columns.push("modified_at".to_string());
    placeholders.push(format!("?{}", stamp_param));
    placeholders.push(format!("?{}", stamp_param));

    let mut assignments: Vec<String> = R::COLUMNS
        .iter()
        .map(|c| format!("{c} = COALESCE(excluded.{c}, {table}.{c})"))
        .collect();
    let mut changed: Vec<String> = R::COLUMNS
        .iter()
        .map(|c| format!("(excluded.{c} IS NOT NULL AND excluded.{c} IS NOT {table}.{c})"))
        .collect();
    if with_status {
        assignments.push(format!(
            "status = CASE WHEN excluded.status_rank > {table}.status_rank \
             THEN excluded.status ELSE {table}.status END"
        ));
        assignments.push(format!(
            "status_rank = MAX(excluded.status_rank, {table}.status_rank)"
        ));
        changed.push(format!("excluded.status_rank > {table}.status_rank"));
    }
    assignments.push("modified_at = excluded.modified_at".to_string());

    format!(
        "INSERT INTO {table} ({}) VALUES ({}) \
         ON CONFLICT(external_id) DO UPDATE SET {} WHERE {}",
        insert_columns.join(", "),
        placeholders.join(", "),
        assignments.join(", "),
        changed.join(" OR ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_counts_match_values() {
        let parent = ParentEntity::discovered("UC1");
        assert_eq!(parent.values().unwrap().len(), ParentEntity::COLUMNS.len());

        let child = ChildEntity::discovered("v1", "UC1");
        assert_eq!(child.values().unwrap().len(), ChildEntity::COLUMNS.len());

        let leaf = LeafEntity::new("c1", "v1");
        assert_eq!(leaf.values().unwrap().len(), LeafEntity::COLUMNS.len());
    }

    #[test]
    fn test_upsert_sql_shape() {
        let sql = upsert_sql::<LeafEntity>();
        assert!(sql.starts_with("INSERT INTO leaves (external_id, child_external_id"));
        assert!(sql.contains("ON CONFLICT(external_id) DO UPDATE SET"));
        assert!(!sql.contains("status_rank"));
        // 1 id + 9 columns, then the shared timestamp
        assert!(sql.contains("?11, ?11"));

        let sql = upsert_sql::<ParentEntity>();
        assert!(sql.contains("status_rank = MAX(excluded.status_rank, parents.status_rank)"));
        assert!(sql.contains("?17, ?17"));
    }

    #[test]
    fn test_select_columns() {
        assert_eq!(
            select_columns::<LeafEntity>().split(", ").count(),
            1 + LeafEntity::COLUMNS.len()
        );
        assert!(select_columns::<ChildEntity>().ends_with("status"));
    }

    #[test]
    fn test_list_encoding() {
        let value = list(&Some(vec!["a".to_string(), "b".to_string()])).unwrap();
        assert_eq!(value, Value::Text("[\"a\",\"b\"]".to_string()));
        assert_eq!(list(&None).unwrap(), Value::Null);
    }
}
