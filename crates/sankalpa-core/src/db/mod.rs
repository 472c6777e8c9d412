// ============================================================================
// HabitDb - Embedded Database (redb)
// ============================================================================
// Persistence gateway for habit logs. Every query is scoped to a user key
// and skips soft-deleted rows.
// Default path: ~/.sankalpa/habits.redb (override via SANKALPA_DB_PATH env var)
// ============================================================================

pub mod types;

pub use types::{CompletionOutcome, DbStats, HabitLogEntry};

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::identity::UserKey;
use crate::types::HabitCandidate;

// Table definitions
const HABIT_LOGS: TableDefinition<&str, &[u8]> = TableDefinition::new("habit_logs");

/// Row store consumed by the request boundary.
/// Implemented by `HabitDb`; tests substitute failing stores.
pub trait HabitStore: Send + Sync {
    /// Insert one row per candidate, all or nothing. Returns rows in input order.
    fn save_candidates(
        &self,
        user_key: &UserKey,
        candidates: &[HabitCandidate],
        voice_input: &str,
        today: NaiveDate,
    ) -> Result<Vec<HabitLogEntry>>;

    /// Fill in quantity/unit and mark complete, only on a live, still incomplete
    /// row owned by `user_key`
    fn complete_entry(
        &self,
        id: &str,
        user_key: &UserKey,
        quantity: f64,
        unit: Option<&str>,
    ) -> Result<CompletionOutcome>;

    /// Live rows dated on or after `from`, newest first
    fn logs_since(&self, user_key: &UserKey, from: NaiveDate) -> Result<Vec<HabitLogEntry>>;
}

/// Embedded database for habit logs
pub struct HabitDb {
    db: Database,
    path: PathBuf,
}

impl HabitDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses SANKALPA_DB_PATH env var or ~/.sankalpa/habits.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("SANKALPA_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let data_dir = home.join(".sankalpa");
            std::fs::create_dir_all(&data_dir)
                .map_err(|e| anyhow!("Failed to create .sankalpa directory: {}", e))?;
            data_dir.join("habits.redb")
        };

        info!("Opening database at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        // Ensure the table exists by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(HABIT_LOGS)
                .map_err(|e| anyhow!("Failed to create habit_logs table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        info!("Database ready");

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Habit Log Operations
    // ========================================================================

    pub fn save_candidates(
        &self,
        user_key: &UserKey,
        candidates: &[HabitCandidate],
        voice_input: &str,
        today: NaiveDate,
    ) -> Result<Vec<HabitLogEntry>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(pos) = candidates.iter().position(|c| !c.has_name()) {
            return Err(anyhow!("Habit at position {} has an empty name", pos));
        }

        let created_base = Utc::now().timestamp_micros();
        let entries: Vec<HabitLogEntry> = candidates
            .iter()
            .enumerate()
            .map(|(i, candidate)| {
                let quantity = candidate.quantity.filter(|q| q.is_finite());
                HabitLogEntry {
                    id: uuid::Uuid::new_v4().to_string(),
                    user_key: user_key.as_str().to_string(),
                    habit_name: candidate.habit_name.trim().to_string(),
                    quantity,
                    unit: normalize_unit(candidate.unit.as_deref()),
                    date: today,
                    voice_input: voice_input.to_string(),
                    is_complete: quantity.is_some(),
                    is_deleted: false,
                    created_at: created_base + i as i64,
                }
            })
            .collect();

        // One transaction for the whole batch: either every row lands or none does
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn
                .open_table(HABIT_LOGS)
                .map_err(|e| anyhow!("Failed to open habit_logs table: {}", e))?;
            for entry in &entries {
                let value = bincode::serialize(entry)
                    .map_err(|e| anyhow!("Failed to serialize habit log: {}", e))?;
                table
                    .insert(entry.id.as_str(), value.as_slice())
                    .map_err(|e| anyhow!("Failed to insert habit log: {}", e))?;
            }
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        info!("Stored {} habit logs for {}", entries.len(), user_key);
        Ok(entries)
    }

    pub fn complete_entry(
        &self,
        id: &str,
        user_key: &UserKey,
        quantity: f64,
        unit: Option<&str>,
    ) -> Result<CompletionOutcome> {
        // Completion happens once: an already complete row is not a match
        let updated = self.update_live_entry(id, user_key, |entry| {
            if entry.is_complete {
                return false;
            }
            entry.quantity = Some(quantity);
            entry.unit = normalize_unit(unit);
            entry.is_complete = true;
            true
        })?;

        if !updated {
            debug!("No incomplete live habit log {} for {}", id, user_key);
            return Ok(CompletionOutcome::NotFound);
        }
        debug!("Completed habit log {}", id);
        Ok(CompletionOutcome::Updated)
    }

    pub fn get_entry(&self, id: &str) -> Result<Option<HabitLogEntry>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(HABIT_LOGS)
            .map_err(|e| anyhow!("Failed to open habit_logs table: {}", e))?;

        match table.get(id).map_err(|e| anyhow!("Failed to get habit log: {}", e))? {
            Some(value) => {
                let entry: HabitLogEntry = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize habit log: {}", e))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    pub fn logs_since(&self, user_key: &UserKey, from: NaiveDate) -> Result<Vec<HabitLogEntry>> {
        self.scan(|entry| {
            entry.user_key == user_key.as_str() && !entry.is_deleted && entry.date >= from
        })
    }

    /// Live rows for a user, newest first, optionally only the incomplete ones
    pub fn list_logs(
        &self,
        user_key: &UserKey,
        incomplete_only: bool,
    ) -> Result<Vec<HabitLogEntry>> {
        self.scan(|entry| {
            entry.user_key == user_key.as_str()
                && !entry.is_deleted
                && (!incomplete_only || !entry.is_complete)
        })
    }

    /// Flag a row as deleted. Not reachable from the logging flow.
    pub fn soft_delete(&self, id: &str, user_key: &UserKey) -> Result<bool> {
        let deleted = self.update_live_entry(id, user_key, |entry| {
            entry.is_deleted = true;
            true
        })?;
        if deleted {
            debug!("Soft-deleted habit log {}", id);
        }
        Ok(deleted)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn stats(&self) -> Result<DbStats> {
        let all = self.scan(|_| true)?;

        let live: Vec<&HabitLogEntry> = all.iter().filter(|e| !e.is_deleted).collect();
        let users: HashSet<&str> = live.iter().map(|e| e.user_key.as_str()).collect();
        let habits: HashSet<String> = live
            .iter()
            .map(|e| e.habit_name.trim().to_lowercase())
            .collect();

        Ok(DbStats {
            total_logs: live.len(),
            incomplete_logs: live.iter().filter(|e| !e.is_complete).count(),
            deleted_logs: all.len() - live.len(),
            distinct_users: users.len(),
            distinct_habits: habits.len(),
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Read, modify and write one row owned by `user_key` in a single write
    /// transaction. Returns false (and writes nothing) when the row is missing,
    /// owned by someone else, deleted, or refused by `modify`.
    fn update_live_entry<F>(&self, id: &str, user_key: &UserKey, modify: F) -> Result<bool>
    where
        F: FnOnce(&mut HabitLogEntry) -> bool,
    {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;

        let updated = {
            let mut table = write_txn
                .open_table(HABIT_LOGS)
                .map_err(|e| anyhow!("Failed to open habit_logs table: {}", e))?;

            let existing = table
                .get(id)
                .map_err(|e| anyhow!("Failed to get habit log: {}", e))?
                .map(|value| value.value().to_vec());

            let entry = match existing {
                Some(bytes) => Some(
                    bincode::deserialize::<HabitLogEntry>(&bytes)
                        .map_err(|e| anyhow!("Failed to deserialize habit log: {}", e))?,
                ),
                None => None,
            };

            match entry {
                Some(mut entry) if entry.user_key == user_key.as_str() && !entry.is_deleted => {
                    if modify(&mut entry) {
                        let value = bincode::serialize(&entry)
                            .map_err(|e| anyhow!("Failed to serialize habit log: {}", e))?;
                        table
                            .insert(id, value.as_slice())
                            .map_err(|e| anyhow!("Failed to update habit log: {}", e))?;
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            }
        };

        if !updated {
            write_txn.abort().map_err(|e| anyhow!("Failed to abort: {}", e))?;
            return Ok(false);
        }

        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;
        Ok(true)
    }

    /// Full-table scan with a row filter, sorted newest first
    fn scan<F>(&self, mut keep: F) -> Result<Vec<HabitLogEntry>>
    where
        F: FnMut(&HabitLogEntry) -> bool,
    {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(HABIT_LOGS)
            .map_err(|e| anyhow!("Failed to open habit_logs table: {}", e))?;

        let mut results = Vec::new();
        let iter = table
            .range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate habit logs: {}", e))?;
        for item in iter {
            let (_key, value) = item.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let entry: HabitLogEntry = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize habit log: {}", e))?;
            if keep(&entry) {
                results.push(entry);
            }
        }

        results.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));
        Ok(results)
    }
}

impl HabitStore for HabitDb {
    fn save_candidates(
        &self,
        user_key: &UserKey,
        candidates: &[HabitCandidate],
        voice_input: &str,
        today: NaiveDate,
    ) -> Result<Vec<HabitLogEntry>> {
        HabitDb::save_candidates(self, user_key, candidates, voice_input, today)
    }

    fn complete_entry(
        &self,
        id: &str,
        user_key: &UserKey,
        quantity: f64,
        unit: Option<&str>,
    ) -> Result<CompletionOutcome> {
        HabitDb::complete_entry(self, id, user_key, quantity, unit)
    }

    fn logs_since(&self, user_key: &UserKey, from: NaiveDate) -> Result<Vec<HabitLogEntry>> {
        HabitDb::logs_since(self, user_key, from)
    }
}

fn normalize_unit(unit: Option<&str>) -> Option<String> {
    unit.map(str::trim).filter(|u| !u.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, HabitDb) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("habits.redb");
        let db = HabitDb::open(Some(path.to_str().unwrap())).unwrap();
        (dir, db)
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    /// Save one quantity-less habit and return its row
    fn save_one(db: &HabitDb, user: &UserKey, name: &str, date: &str) -> HabitLogEntry {
        let candidate = HabitCandidate::new(name, None, None);
        db.save_candidates(user, &[candidate], name, day(date))
            .unwrap()
            .remove(0)
    }

    #[test]
    fn test_save_normalizes_and_flags_completeness() {
        let (_dir, db) = open_temp();
        let user = UserKey::derive("alice");
        let candidates = vec![
            HabitCandidate::new("  yoga ", Some(30.0), Some(" minutes ")),
            HabitCandidate::new("meditate", None, Some("   ")),
        ];

        let saved = db
            .save_candidates(&user, &candidates, "yoga and meditate", day("2026-03-10"))
            .unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].habit_name, "yoga");
        assert_eq!(saved[0].unit.as_deref(), Some("minutes"));
        assert!(saved[0].is_complete);
        assert_eq!(saved[1].habit_name, "meditate");
        assert_eq!(saved[1].unit, None);
        assert!(!saved[1].is_complete);
        assert!(saved.iter().all(|e| e.date == day("2026-03-10") && !e.is_deleted));

        let stored = db.get_entry(&saved[0].id).unwrap().unwrap();
        assert_eq!(stored, saved[0]);
    }

    #[test]
    fn test_save_rejects_nameless_batch_atomically() {
        let (_dir, db) = open_temp();
        let user = UserKey::derive("alice");
        let candidates = vec![
            HabitCandidate::new("yoga", Some(30.0), None),
            HabitCandidate::new("   ", Some(1.0), None),
        ];

        assert!(db.save_candidates(&user, &candidates, "x", day("2026-03-10")).is_err());
        assert_eq!(db.stats().unwrap().total_logs, 0);
    }

    #[test]
    fn test_complete_entry_updates_owned_row() {
        let (_dir, db) = open_temp();
        let user = UserKey::derive("alice");
        let saved = save_one(&db, &user, "run", "2026-03-10");

        let outcome = db.complete_entry(&saved.id, &user, 5.0, Some(" km ")).unwrap();
        assert_eq!(outcome, CompletionOutcome::Updated);

        let stored = db.get_entry(&saved.id).unwrap().unwrap();
        assert_eq!(stored.quantity, Some(5.0));
        assert_eq!(stored.unit.as_deref(), Some("km"));
        assert!(stored.is_complete);
        assert_eq!(stored.date, saved.date);
    }

    #[test]
    fn test_complete_entry_not_found_cases() {
        let (_dir, db) = open_temp();
        let alice = UserKey::derive("alice");
        let bob = UserKey::derive("bob");
        let id = save_one(&db, &alice, "run", "2026-03-10").id;

        let missing = db.complete_entry("missing-id", &alice, 1.0, None).unwrap();
        assert_eq!(missing, CompletionOutcome::NotFound);
        assert_eq!(db.complete_entry(&id, &bob, 1.0, None).unwrap(), CompletionOutcome::NotFound);

        assert!(db.soft_delete(&id, &alice).unwrap());
        assert_eq!(db.complete_entry(&id, &alice, 1.0, None).unwrap(), CompletionOutcome::NotFound);

        // Row untouched by the rejected updates
        let stored = db.get_entry(&id).unwrap().unwrap();
        assert_eq!(stored.quantity, None);
        assert!(!stored.is_complete);
    }

    #[test]
    fn test_complete_entry_only_once() {
        let (_dir, db) = open_temp();
        let user = UserKey::derive("alice");
        let id = save_one(&db, &user, "run", "2026-03-10").id;

        let first = db.complete_entry(&id, &user, 5.0, Some("km")).unwrap();
        let second = db.complete_entry(&id, &user, 9.0, Some("mi")).unwrap();
        assert_eq!(first, CompletionOutcome::Updated);
        assert_eq!(second, CompletionOutcome::NotFound);

        let stored = db.get_entry(&id).unwrap().unwrap();
        assert_eq!(stored.quantity, Some(5.0));
        assert_eq!(stored.unit.as_deref(), Some("km"));
    }

    #[test]
    fn test_soft_delete_keeps_completed_fields() {
        let (_dir, db) = open_temp();
        let alice = UserKey::derive("alice");
        let bob = UserKey::derive("bob");
        let id = save_one(&db, &alice, "read", "2026-03-10").id;

        db.complete_entry(&id, &alice, 12.0, Some("pages")).unwrap();
        assert!(!db.soft_delete(&id, &bob).unwrap());
        assert!(db.soft_delete(&id, &alice).unwrap());
        assert!(!db.soft_delete(&id, &alice).unwrap());

        let stored = db.get_entry(&id).unwrap().unwrap();
        assert!(stored.is_deleted);
        assert!(stored.is_complete);
        assert_eq!(stored.quantity, Some(12.0));
        assert_eq!(stored.unit.as_deref(), Some("pages"));
        assert!(db.list_logs(&alice, false).unwrap().is_empty());
        assert_eq!(db.stats().unwrap().deleted_logs, 1);
    }

    #[test]
    fn test_logs_since_scopes_and_orders() {
        let (_dir, db) = open_temp();
        let alice = UserKey::derive("alice");
        let bob = UserKey::derive("bob");

        save_one(&db, &alice, "old", "2026-01-01");
        save_one(&db, &alice, "mid", "2026-03-01");
        save_one(&db, &alice, "new", "2026-03-09");
        save_one(&db, &bob, "bobs", "2026-03-09");

        let rows = db.logs_since(&alice, day("2026-02-15")).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.habit_name.as_str()).collect();
        assert_eq!(names, vec!["new", "mid"]);
    }

    #[test]
    fn test_list_logs_incomplete_and_stats() {
        let (_dir, db) = open_temp();
        let alice = UserKey::derive("alice");
        let bob = UserKey::derive("bob");
        db.save_candidates(
            &alice,
            &[
                HabitCandidate::new("Yoga", Some(10.0), None),
                HabitCandidate::new("read", None, None),
            ],
            "x",
            day("2026-03-09"),
        )
        .unwrap();
        save_one(&db, &bob, "yoga", "2026-03-09");

        let incomplete = db.list_logs(&alice, true).unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].habit_name, "read");

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_logs, 3);
        assert_eq!(stats.incomplete_logs, 2);
        assert_eq!(stats.distinct_users, 2);
        assert_eq!(stats.distinct_habits, 2);
        assert_eq!(stats.deleted_logs, 0);
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("habits.redb");
        let user = UserKey::derive("alice");
        {
            let db = HabitDb::open(Some(path.to_str().unwrap())).unwrap();
            save_one(&db, &user, "yoga", "2026-03-09");
        }
        let db = HabitDb::open(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(db.list_logs(&user, false).unwrap().len(), 1);
    }
}
