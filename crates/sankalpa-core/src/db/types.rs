//! ============================================================================
//! Database Types - Serializable records for redb storage
//! ============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::summary::LogRow;
use crate::types::SavedLog;

/// One persisted habit log.
/// `id`, `user_key` and `date` never change after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HabitLogEntry {
    pub id: String,
    pub user_key: String,
    /// Trimmed habit label
    pub habit_name: String,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    /// Day the entry was created
    pub date: NaiveDate,
    /// Utterance the entry was extracted from
    pub voice_input: String,
    /// True iff a quantity was known at save time, or was filled in later
    pub is_complete: bool,
    /// Soft delete flag, owned by tooling outside the logging flow
    pub is_deleted: bool,
    /// Microseconds since epoch, orders rows of the same day
    pub created_at: i64,
}

impl HabitLogEntry {
    /// Projection returned from a batch insert
    pub fn to_saved(&self) -> SavedLog {
        SavedLog {
            id: self.id.clone(),
            habit_name: self.habit_name.clone(),
            quantity: self.quantity,
            unit: self.unit.clone(),
            is_complete: self.is_complete,
        }
    }

    /// Columns the summary engine reads
    pub fn to_row(&self) -> LogRow {
        LogRow {
            habit_name: self.habit_name.clone(),
            quantity: self.quantity,
            unit: self.unit.clone(),
            date: self.date,
        }
    }
}

/// Outcome of a progressive-completion update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionOutcome {
    Updated,
    /// No row matched id + owner + not deleted
    NotFound,
}

/// Store statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStats {
    pub total_logs: usize,
    pub incomplete_logs: usize,
    pub deleted_logs: usize,
    pub distinct_users: usize,
    pub distinct_habits: usize,
}
