//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.
//! The connection sits behind a mutex so one `SqliteStorage` can be shared by
//! every worker thread; each trait call holds the lock for a single statement
//! or transaction.

use crate::credentials::{Credential, CredentialStatus, QuotaLedger};
use crate::entity::{ChildEntity, EntityKind, LeafEntity, ParentEntity};
use crate::state::{EntityStatus, TargetStatus};
use crate::storage::records::{select_columns, upsert_sql, SqlRecord};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{RejectedRecord, RunRecord, RunStatus, TargetRecord, UpsertOutcome};
use crate::HarvestError;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Ids bound per `IN (...)` lookup
const LOOKUP_CHUNK: usize = 400;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(HarvestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        let conn = Connection::open(path).map_err(StorageError::from)?;

        // Configure SQLite for concurrent writers across processes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )
        .map_err(StorageError::from)?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(StorageError::from)?;

        initialize_schema(&conn).map_err(StorageError::from)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        initialize_schema(&conn).map_err(StorageError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn upsert_records<R: SqlRecord>(&self, records: &[R]) -> StorageResult<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        if records.is_empty() {
            return Ok(outcome);
        }

        let sql = upsert_sql::<R>();
        let exists_sql = format!("SELECT 1 FROM {} WHERE external_id = ?1", R::TABLE);
        let now = Utc::now().to_rfc3339();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut exists = tx.prepare(&exists_sql)?;
            let mut upsert = tx.prepare(&sql)?;

            for record in records {
                if let Err(e) = record.validate() {
                    tracing::warn!(kind = %R::KIND, error = %e, "Rejecting record at store boundary");
                    outcome.rejected.push(RejectedRecord {
                        external_id: record.external_id().to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }

                let existed = exists.exists(params![record.external_id()])?;

                let mut values = Vec::with_capacity(R::COLUMNS.len() + 4);
                values.push(Value::Text(record.external_id().to_string()));
                values.extend(record.values()?);
                if let Some(status) = record.status() {
                    values.push(Value::Text(status.to_db_string().to_string()));
                    values.push(Value::Integer(status.rank()));
                }
                values.push(Value::Text(now.clone()));

                let changed = upsert.execute(params_from_iter(values))?;
                if !existed {
                    outcome.inserted_count += 1;
                    outcome.inserted_ids.push(record.external_id().to_string());
                } else if changed > 0 {
                    outcome.updated_count += 1;
                }
            }
        }
        tx.commit()?;

        tracing::debug!(
            kind = %R::KIND,
            inserted = outcome.inserted_count,
            updated = outcome.updated_count,
            rejected = outcome.rejected.len(),
            "Upserted batch"
        );
        Ok(outcome)
    }

    fn get_record<R: SqlRecord>(&self, external_id: &str) -> StorageResult<Option<R>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE external_id = ?1",
            select_columns::<R>(),
            R::TABLE
        );
        let record = conn
            .query_row(&sql, params![external_id], |row| R::from_row(row))
            .optional()?;
        Ok(record)
    }
}

/// Table holding statuses for a kind, or an error for leaves
fn status_table(kind: EntityKind, operation: &'static str) -> StorageResult<&'static str> {
    match kind {
        EntityKind::Parent => Ok(ParentEntity::TABLE),
        EntityKind::Child => Ok(ChildEntity::TABLE),
        EntityKind::Leaf => Err(StorageError::Unsupported { kind, operation }),
    }
}

fn table_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Parent => ParentEntity::TABLE,
        EntityKind::Child => ChildEntity::TABLE,
        EntityKind::Leaf => LeafEntity::TABLE,
    }
}

fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        command: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        config_hash: row.get(4)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(5)?).unwrap_or(RunStatus::Running),
    })
}

fn target_from_row(row: &Row<'_>) -> rusqlite::Result<TargetRecord> {
    Ok(TargetRecord {
        key: row.get(0)?,
        status: TargetStatus::from_db_string(&row.get::<_, String>(1)?)
            .unwrap_or(TargetStatus::Error),
        error_message: row.get(2)?,
        created_at: row.get(3)?,
        last_updated: row.get(4)?,
    })
}

fn credential_from_row(row: &Row<'_>) -> rusqlite::Result<Credential> {
    let last_updated: String = row.get(5)?;
    Ok(Credential {
        id: row.get(0)?,
        secret: row.get(1)?,
        remaining_budget: row.get(2)?,
        status: CredentialStatus::from_db_string(&row.get::<_, String>(3)?)
            .unwrap_or(CredentialStatus::Exhausted),
        generation: row.get(4)?,
        last_updated: DateTime::parse_from_rfc3339(&last_updated)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&self, config_hash: &str, command: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs (command, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![command, now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, command, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
            params![run_id],
            run_from_row,
        )
        .optional()?
        .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let conn = self.lock()?;
        let run = conn
            .query_row(
                "SELECT id, command, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn finish_run(&self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if changed == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Crawl Targets =====

    fn ensure_target(&self, key: &str) -> StorageResult<TargetRecord> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO targets (key, status, created_at, last_updated) VALUES (?1, ?2, ?3, ?3)",
            params![key, TargetStatus::ToCrawl.to_db_string(), now],
        )?;
        let target = conn.query_row(
            "SELECT key, status, error_message, created_at, last_updated FROM targets WHERE key = ?1",
            params![key],
            target_from_row,
        )?;
        Ok(target)
    }

    fn get_target(&self, key: &str) -> StorageResult<Option<TargetRecord>> {
        let conn = self.lock()?;
        let target = conn
            .query_row(
                "SELECT key, status, error_message, created_at, last_updated FROM targets WHERE key = ?1",
                params![key],
                target_from_row,
            )
            .optional()?;
        Ok(target)
    }

    fn claim_target(&self, key: &str) -> StorageResult<bool> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE targets SET status = ?1, last_updated = ?2 WHERE key = ?3 AND status = ?4",
            params![
                TargetStatus::Crawling.to_db_string(),
                now,
                key,
                TargetStatus::ToCrawl.to_db_string()
            ],
        )?;
        Ok(changed == 1)
    }

    fn finish_target(
        &self,
        key: &str,
        status: TargetStatus,
        error_message: Option<&str>,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "UPDATE targets SET status = ?1, error_message = ?2, last_updated = ?3 WHERE key = ?4",
            params![status.to_db_string(), error_message, now, key],
        )?;
        Ok(())
    }

    fn reset_targets(&self, from: &[TargetStatus]) -> StorageResult<usize> {
        if from.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "UPDATE targets SET status = ?1, error_message = NULL, last_updated = ?2 WHERE status IN ({})",
            placeholders(3, from.len())
        );
        let mut values = vec![
            Value::Text(TargetStatus::ToCrawl.to_db_string().to_string()),
            Value::Text(now),
        ];
        values.extend(from.iter().map(|s| Value::Text(s.to_db_string().to_string())));

        let conn = self.lock()?;
        Ok(conn.execute(&sql, params_from_iter(values))?)
    }

    fn count_targets_by_status(&self, status: TargetStatus) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM targets WHERE status = ?1",
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Entities =====

    fn upsert_parents(&self, records: &[ParentEntity]) -> StorageResult<UpsertOutcome> {
        self.upsert_records(records)
    }

    fn upsert_children(&self, records: &[ChildEntity]) -> StorageResult<UpsertOutcome> {
        self.upsert_records(records)
    }

    fn upsert_leaves(&self, records: &[LeafEntity]) -> StorageResult<UpsertOutcome> {
        self.upsert_records(records)
    }

    fn get_parent(&self, external_id: &str) -> StorageResult<Option<ParentEntity>> {
        self.get_record(external_id)
    }

    fn get_child(&self, external_id: &str) -> StorageResult<Option<ChildEntity>> {
        self.get_record(external_id)
    }

    fn get_leaf(&self, external_id: &str) -> StorageResult<Option<LeafEntity>> {
        self.get_record(external_id)
    }

    fn advance_status(
        &self,
        kind: EntityKind,
        external_ids: &[String],
        from_any_of: &[EntityStatus],
        to: EntityStatus,
    ) -> StorageResult<usize> {
        let table = status_table(kind, "advance_status")?;

        let invalid_target = !to.applies_to(kind);
        if let Some(from) = from_any_of
            .iter()
            .find(|from| invalid_target || !from.applies_to(kind) || !from.can_advance_to(to))
        {
            return Err(StorageError::InvalidTransition {
                kind,
                from: *from,
                to,
            });
        }
        if external_ids.is_empty() || from_any_of.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "UPDATE {} SET status = ?1, status_rank = ?2, modified_at = ?3 \
             WHERE external_id = ?4 AND status IN ({})",
            table,
            placeholders(5, from_any_of.len())
        );
        let now = Utc::now().to_rfc3339();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut advanced = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for external_id in external_ids {
                let mut values = vec![
                    Value::Text(to.to_db_string().to_string()),
                    Value::Integer(to.rank()),
                    Value::Text(now.clone()),
                    Value::Text(external_id.clone()),
                ];
                values.extend(
                    from_any_of
                        .iter()
                        .map(|s| Value::Text(s.to_db_string().to_string())),
                );
                advanced += stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        tracing::debug!(kind = %kind, to = %to, requested = external_ids.len(), advanced, "Advanced status");
        Ok(advanced)
    }

    fn statuses_of(
        &self,
        kind: EntityKind,
        external_ids: &[String],
    ) -> StorageResult<HashMap<String, EntityStatus>> {
        let table = status_table(kind, "statuses_of")?;
        let mut statuses = HashMap::with_capacity(external_ids.len());
        let conn = self.lock()?;

        for chunk in external_ids.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT external_id, status FROM {} WHERE external_id IN ({})",
                table,
                placeholders(1, chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    crate::storage::records::read_status(row, 1)?,
                ))
            })?;
            for row in rows {
                let (id, status) = row?;
                statuses.insert(id, status);
            }
        }

        Ok(statuses)
    }

    fn list_by_status(
        &self,
        kind: EntityKind,
        status: EntityStatus,
        skip: usize,
        limit: usize,
    ) -> StorageResult<Vec<String>> {
        let table = status_table(kind, "list_by_status")?;
        let conn = self.lock()?;
        let sql = format!(
            "SELECT external_id FROM {} WHERE status = ?1 ORDER BY rowid LIMIT ?2 OFFSET ?3",
            table
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(
                params![status.to_db_string(), limit as i64, skip as i64],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn reset_errors(&self, kind: EntityKind) -> StorageResult<usize> {
        let table = status_table(kind, "reset_errors")?;
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET status = ?1, status_rank = ?2, modified_at = ?3 WHERE status = ?4",
                table
            ),
            params![
                EntityStatus::ToCrawl.to_db_string(),
                EntityStatus::ToCrawl.rank(),
                now,
                EntityStatus::Error.to_db_string()
            ],
        )?;
        Ok(changed)
    }

    fn reopen_errors(&self, kind: EntityKind, external_ids: &[String]) -> StorageResult<usize> {
        let table = status_table(kind, "reopen_errors")?;
        if external_ids.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().to_rfc3339();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut reopened = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "UPDATE {} SET status = ?1, status_rank = ?2, modified_at = ?3 \
                 WHERE external_id = ?4 AND status = ?5",
                table
            ))?;
            for external_id in external_ids {
                reopened += stmt.execute(params![
                    EntityStatus::ToCrawl.to_db_string(),
                    EntityStatus::ToCrawl.rank(),
                    now,
                    external_id,
                    EntityStatus::Error.to_db_string()
                ])?;
            }
        }
        tx.commit()?;
        Ok(reopened)
    }

    // ===== Credentials =====

    fn add_credential(&self, credential: &Credential) -> StorageResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO credentials (id, secret, remaining_budget, status, generation, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                credential.id,
                credential.secret,
                credential.remaining_budget,
                credential.status.to_db_string(),
                credential.generation,
                credential.last_updated.to_rfc3339()
            ],
        )?;
        Ok(changed == 1)
    }

    fn load_credentials(&self) -> StorageResult<Vec<Credential>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, secret, remaining_budget, status, generation, last_updated
             FROM credentials ORDER BY last_updated ASC",
        )?;
        let credentials = stmt
            .query_map([], credential_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(credentials)
    }

    fn save_credential_snapshot(&self, snapshot: &[Credential]) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE credentials SET
                    remaining_budget = MIN(remaining_budget, ?2),
                    status = CASE WHEN ?3 = 'exhausted' OR MIN(remaining_budget, ?2) <= 0
                                  THEN 'exhausted' ELSE status END,
                    last_updated = ?4
                 WHERE id = ?1 AND generation = ?5",
            )?;
            for credential in snapshot {
                stmt.execute(params![
                    credential.id,
                    credential.remaining_budget,
                    credential.status.to_db_string(),
                    credential.last_updated.to_rfc3339(),
                    credential.generation
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn reset_credentials(&self, budget: i64) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let status = if budget > 0 {
            CredentialStatus::Active
        } else {
            CredentialStatus::Exhausted
        };
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE credentials SET remaining_budget = ?1, status = ?2,
                generation = generation + 1, last_updated = ?3",
            params![budget.max(0), status.to_db_string(), now],
        )?;
        Ok(changed)
    }

    fn record_usage(&self, unit: &str, ledger: &QuotaLedger) -> StorageResult<()> {
        if ledger.is_empty() {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO quota_usage (credential_id, unit, cost, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (credential_id, cost) in ledger.iter() {
                stmt.execute(params![credential_id, unit, cost, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn usage_totals(&self) -> StorageResult<Vec<(String, i64)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT credential_id, SUM(cost) FROM quota_usage GROUP BY credential_id ORDER BY credential_id",
        )?;
        let totals = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(totals)
    }

    // ===== Statistics =====

    fn count_by_status(&self, kind: EntityKind, status: EntityStatus) -> StorageResult<u64> {
        let table = status_table(kind, "count_by_status")?;
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE status = ?1", table),
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_entities(&self, kind: EntityKind) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table_for(kind)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_leaves_for_child(&self, child_external_id: &str) -> StorageResult<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM leaves WHERE child_external_id = ?1",
            params![child_external_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> SqliteStorage {
        SqliteStorage::new_in_memory().unwrap()
    }

    fn parents(ids: &[&str]) -> Vec<ParentEntity> {
        ids.iter().map(|id| ParentEntity::discovered(*id)).collect()
    }

    #[test]
    fn test_create_in_memory() {
        assert!(SqliteStorage::new_in_memory().is_ok());
    }

    #[test]
    fn test_run_lifecycle() {
        let storage = storage();
        let run_id = storage.create_run("hash", "keywords").unwrap();
        assert!(run_id > 0);

        storage.finish_run(run_id, RunStatus::Completed).unwrap();
        let run = storage.get_latest_run().unwrap().unwrap();
        assert_eq!(run.id, run_id);
        assert_eq!(run.command, "keywords");
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.finished_at.is_some());

        assert!(matches!(
            storage.get_run(999),
            Err(StorageError::RunNotFound(999))
        ));
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let storage = storage();
        let batch = parents(&["UC1", "UC2", "UC3"]);

        let first = storage.upsert_parents(&batch).unwrap();
        assert_eq!(first.inserted_count, 3);
        assert_eq!(first.updated_count, 0);
        assert_eq!(first.inserted_ids, vec!["UC1", "UC2", "UC3"]);

        let second = storage.upsert_parents(&batch).unwrap();
        assert_eq!(second.inserted_count, 0);
        assert_eq!(second.updated_count, 0);
        assert_eq!(storage.count_entities(EntityKind::Parent).unwrap(), 3);
    }

    #[test]
    fn test_upsert_merges_only_non_null_fields() {
        let storage = storage();
        let mut original = ParentEntity::discovered("UC1");
        original.title = Some("Cooking".to_string());
        original.country = Some("VN".to_string());
        storage.upsert_parents(&[original]).unwrap();

        let mut changed = ParentEntity::discovered("UC1");
        changed.title = Some("Cooking Daily".to_string());
        let outcome = storage.upsert_parents(&[changed]).unwrap();
        assert_eq!(outcome.inserted_count, 0);
        assert_eq!(outcome.updated_count, 1);

        let stored = storage.get_parent("UC1").unwrap().unwrap();
        assert_eq!(stored.title.as_deref(), Some("Cooking Daily"));
        assert_eq!(stored.country.as_deref(), Some("VN"));
    }

    #[test]
    fn test_upsert_never_lowers_status() {
        let storage = storage();
        let mut detailed = ParentEntity::discovered("UC1");
        detailed.status = EntityStatus::CrawledParent;
        storage.upsert_parents(&[detailed]).unwrap();

        // Rediscovered by a later search
        let outcome = storage.upsert_parents(&parents(&["UC1"])).unwrap();
        assert_eq!(outcome.updated_count, 0);
        let stored = storage.get_parent("UC1").unwrap().unwrap();
        assert_eq!(stored.status, EntityStatus::CrawledParent);
    }

    #[test]
    fn test_upsert_rejects_invalid_records_individually() {
        let storage = storage();
        let batch = vec![
            ChildEntity::discovered("v1", "UC1"),
            ChildEntity::discovered("v2", ""),
            ChildEntity::discovered("v3", "UC1"),
        ];
        let outcome = storage.upsert_children(&batch).unwrap();
        assert_eq!(outcome.inserted_count, 2);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].external_id, "v2");
    }

    #[test]
    fn test_list_fields_roundtrip() {
        let storage = storage();
        let mut child = ChildEntity::discovered("v1", "UC1");
        child.tags = Some(vec!["rust".to_string(), "sqlite".to_string()]);
        child.made_for_kids = Some(false);
        storage.upsert_children(&[child.clone()]).unwrap();

        assert_eq!(storage.get_child("v1").unwrap(), Some(child));
    }

    #[test]
    fn test_advance_status_is_conditional() {
        let storage = storage();
        storage.upsert_parents(&parents(&["UC1", "UC2"])).unwrap();
        let ids = vec!["UC1".to_string(), "UC2".to_string()];

        let advanced = storage
            .advance_status(
                EntityKind::Parent,
                &ids[..1],
                &[EntityStatus::ToCrawl],
                EntityStatus::CrawledParent,
            )
            .unwrap();
        assert_eq!(advanced, 1);

        // UC1 is no longer to_crawl, only UC2 moves
        let advanced = storage
            .advance_status(
                EntityKind::Parent,
                &ids,
                &[EntityStatus::ToCrawl],
                EntityStatus::CrawledParent,
            )
            .unwrap();
        assert_eq!(advanced, 1);
    }

    #[test]
    fn test_advance_status_rejects_backward_moves() {
        let storage = storage();
        let result = storage.advance_status(
            EntityKind::Child,
            &["v1".to_string()],
            &[EntityStatus::CrawledLeaf],
            EntityStatus::ToCrawl,
        );
        assert!(matches!(result, Err(StorageError::InvalidTransition { .. })));

        let result = storage.advance_status(
            EntityKind::Parent,
            &["UC1".to_string()],
            &[EntityStatus::ToCrawl],
            EntityStatus::CrawledDetail,
        );
        assert!(matches!(result, Err(StorageError::InvalidTransition { .. })));
    }

    #[test]
    fn test_leaves_have_no_status() {
        let storage = storage();
        let result = storage.list_by_status(EntityKind::Leaf, EntityStatus::ToCrawl, 0, 10);
        assert!(matches!(result, Err(StorageError::Unsupported { .. })));
    }

    #[test]
    fn test_statuses_and_listing() {
        let storage = storage();
        storage.upsert_parents(&parents(&["UC1", "UC2", "UC3"])).unwrap();
        storage
            .advance_status(
                EntityKind::Parent,
                &["UC2".to_string()],
                &[EntityStatus::ToCrawl],
                EntityStatus::CrawledParent,
            )
            .unwrap();

        let statuses = storage
            .statuses_of(
                EntityKind::Parent,
                &["UC1".to_string(), "UC2".to_string(), "UC9".to_string()],
            )
            .unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses["UC2"], EntityStatus::CrawledParent);

        let page = storage
            .list_by_status(EntityKind::Parent, EntityStatus::ToCrawl, 0, 10)
            .unwrap();
        assert_eq!(page, vec!["UC1", "UC3"]);
        let page = storage
            .list_by_status(EntityKind::Parent, EntityStatus::ToCrawl, 1, 10)
            .unwrap();
        assert_eq!(page, vec!["UC3"]);
    }

    #[test]
    fn test_reset_errors() {
        let storage = storage();
        storage.upsert_parents(&parents(&["UC1"])).unwrap();
        storage
            .advance_status(
                EntityKind::Parent,
                &["UC1".to_string()],
                &[EntityStatus::ToCrawl],
                EntityStatus::Error,
            )
            .unwrap();

        assert_eq!(storage.reset_errors(EntityKind::Parent).unwrap(), 1);
        let stored = storage.get_parent("UC1").unwrap().unwrap();
        assert_eq!(stored.status, EntityStatus::ToCrawl);
    }

    #[test]
    fn test_reopen_errors_touches_only_listed_errors() {
        let storage = storage();
        storage.upsert_parents(&parents(&["UC1", "UC2", "UC3"])).unwrap();
        storage
            .advance_status(
                EntityKind::Parent,
                &["UC1".to_string(), "UC2".to_string()],
                &[EntityStatus::ToCrawl],
                EntityStatus::Error,
            )
            .unwrap();
        storage
            .advance_status(
                EntityKind::Parent,
                &["UC3".to_string()],
                &[EntityStatus::ToCrawl],
                EntityStatus::CrawledParent,
            )
            .unwrap();

        let listed = vec!["UC1".to_string(), "UC3".to_string(), "UC9".to_string()];
        assert_eq!(storage.reopen_errors(EntityKind::Parent, &listed).unwrap(), 1);

        let status = |id: &str| storage.get_parent(id).unwrap().unwrap().status;
        assert_eq!(status("UC1"), EntityStatus::ToCrawl);
        assert_eq!(status("UC2"), EntityStatus::Error);
        assert_eq!(status("UC3"), EntityStatus::CrawledParent);
        assert!(storage.reopen_errors(EntityKind::Leaf, &listed).is_err());
    }

    #[test]
    fn test_target_claiming() {
        let storage = storage();
        let target = storage.ensure_target("demo").unwrap();
        assert_eq!(target.status, TargetStatus::ToCrawl);

        assert!(storage.claim_target("demo").unwrap());
        assert!(!storage.claim_target("demo").unwrap());

        storage
            .finish_target("demo", TargetStatus::Error, Some("exhausted"))
            .unwrap();
        let target = storage.ensure_target("demo").unwrap();
        assert_eq!(target.status, TargetStatus::Error);
        assert_eq!(target.error_message.as_deref(), Some("exhausted"));

        assert_eq!(storage.reset_targets(&[TargetStatus::Error]).unwrap(), 1);
        let target = storage.get_target("demo").unwrap().unwrap();
        assert_eq!(target.status, TargetStatus::ToCrawl);
        assert!(target.error_message.is_none());
    }

    #[test]
    fn test_credential_snapshot_only_lowers_budget() {
        let storage = storage();
        assert!(storage
            .add_credential(&Credential::new("k1", "secret", 1000))
            .unwrap());
        assert!(!storage
            .add_credential(&Credential::new("k1", "other", 5))
            .unwrap());

        let mut snapshot = storage.load_credentials().unwrap();
        snapshot[0].remaining_budget = 400;
        storage.save_credential_snapshot(&snapshot).unwrap();
        assert_eq!(storage.load_credentials().unwrap()[0].remaining_budget, 400);

        snapshot[0].remaining_budget = 900;
        storage.save_credential_snapshot(&snapshot).unwrap();
        assert_eq!(storage.load_credentials().unwrap()[0].remaining_budget, 400);
    }

    #[test]
    fn test_reset_credentials_bumps_generation() {
        let storage = storage();
        storage
            .add_credential(&Credential::new("k1", "secret", 10))
            .unwrap();
        let stale = storage.load_credentials().unwrap();

        assert_eq!(storage.reset_credentials(10_000).unwrap(), 1);
        let fresh = storage.load_credentials().unwrap();
        assert_eq!(fresh[0].generation, 1);
        assert_eq!(fresh[0].remaining_budget, 10_000);
        assert_eq!(fresh[0].status, CredentialStatus::Active);

        // A snapshot taken before the reset must not undo it
        let mut stale = stale;
        stale[0].remaining_budget = 0;
        storage.save_credential_snapshot(&stale).unwrap();
        assert_eq!(storage.load_credentials().unwrap()[0].remaining_budget, 10_000);
    }

    #[test]
    fn test_usage_totals() {
        let storage = storage();
        let mut ledger = QuotaLedger::new();
        ledger.add("k1", 101);
        ledger.add("k2", 3);
        storage.record_usage("keyword:demo", &ledger).unwrap();
        storage.record_usage("keyword:other", &ledger).unwrap();

        let totals = storage.usage_totals().unwrap();
        assert_eq!(
            totals,
            vec![("k1".to_string(), 202), ("k2".to_string(), 6)]
        );
    }

    #[test]
    fn test_leaf_counts() {
        let storage = storage();
        let leaves: Vec<LeafEntity> = (0..4)
            .map(|i| LeafEntity::new(format!("c{}", i), "v1"))
            .collect();
        storage.upsert_leaves(&leaves).unwrap();
        assert_eq!(storage.count_leaves_for_child("v1").unwrap(), 4);
        assert_eq!(storage.count_leaves_for_child("v2").unwrap(), 0);
        assert!(storage.get_leaf("c2").unwrap().is_some());
    }
}
